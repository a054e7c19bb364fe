//! Grounded test-case generation.
//!
//! A request is answered in four steps:
//!
//! 1. Retrieve the top-k chunks for the request text.
//! 2. Render them under `### Source:` headers within the context budget.
//! 3. Ask the generator for `{"test_cases": [...]}` under a JSON schema.
//! 4. Recover the JSON from the completion, validate it strictly, and drop
//!    every case whose `based_on` names a source that was not in the prompt.
//!
//! Nothing is retried here; a caller facing [`Error::GenerationParse`] can
//! lower `k` or the context budget and try again.

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::generation::{GenerationRequest, Generator};
use crate::index::KnowledgeIndex;
use crate::models::{SourceRef, TestCase};
use crate::retrieve::{assemble_context, retrieve};

/// Sampling and budget settings for one generator.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_context_chars: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            max_tokens: 2000,
            temperature: 0.1,
            max_context_chars: 2000,
        }
    }
}

pub struct TestCaseGenerator {
    generator: Arc<dyn Generator>,
    settings: GenerationSettings,
}

impl TestCaseGenerator {
    pub fn new(generator: Arc<dyn Generator>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// Generate test cases for `request` grounded in the `k` most relevant
    /// chunks.
    pub async fn generate(
        &self,
        index: &KnowledgeIndex,
        request: &str,
        k: usize,
    ) -> Result<Vec<TestCase>> {
        self.generate_with_budget(index, request, k, self.settings.max_context_chars)
            .await
    }

    /// Like [`generate`](Self::generate) with an explicit context budget.
    pub async fn generate_with_budget(
        &self,
        index: &KnowledgeIndex,
        request: &str,
        k: usize,
        max_context_chars: usize,
    ) -> Result<Vec<TestCase>> {
        let retrieved = retrieve(index, request, k).await?;
        let context = assemble_context(&retrieved, max_context_chars);
        let prompt = build_prompt(&context.text, &context.sources, request);
        let schema = test_case_schema();

        let raw = self
            .generator
            .generate(&GenerationRequest {
                prompt: &prompt,
                schema: Some(&schema),
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            })
            .await
            .map_err(Error::GenerationService)?;

        let parsed = parse_test_cases(&raw)?;
        let total = parsed.len();
        let grounded = enforce_grounding(parsed, &context.sources)?;
        tracing::info!(
            model = self.generator.model_name(),
            returned = total,
            kept = grounded.len(),
            "test cases generated"
        );
        Ok(grounded)
    }
}

fn build_prompt(context: &str, sources: &BTreeSet<String>, request: &str) -> String {
    let source_list = sources
        .iter()
        .map(|s| format!("\"{}\"", s))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"You are a test case generator. Based on the reference documentation below, generate test cases as JSON.

Reference Documentation:
{context}
User Request: {request}

Return a JSON object with a single field "test_cases" holding an array of test case objects. Each object must have these exact fields:
- "id": unique identifier (string)
- "title": brief test case title (string)
- "scenario": description of the scenario (string)
- "steps": array of step strings
- "expected": expected outcome (string)
- "based_on": the source document the case is derived from, exactly one of: {source_list}

Important:
- Generate both positive and negative test cases based on the user request
- Use only information from the reference documentation
- Return ONLY valid JSON, no markdown, no explanations

Example format:
{{"test_cases": [
  {{
    "id": "TC001",
    "title": "Valid discount code application",
    "scenario": "User applies a valid discount code",
    "steps": ["Navigate to checkout", "Enter discount code", "Apply code"],
    "expected": "Discount is applied successfully",
    "based_on": "discount_policy.pdf"
  }}
]}}

Now generate the test cases:"#
    )
}

/// JSON schema for the completion. The root is an object because strict
/// structured-output modes reject array roots.
pub fn test_case_schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "test_cases": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "title": { "type": "string" },
                        "scenario": { "type": "string" },
                        "steps": { "type": "array", "items": { "type": "string" } },
                        "expected": { "type": "string" },
                        "based_on": { "type": "string" }
                    },
                    "required": ["id", "title", "scenario", "steps", "expected", "based_on"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["test_cases"],
        "additionalProperties": false
    })
}

/// Locate the JSON payload in a model completion.
///
/// Prefers the body of a fenced code block; otherwise takes the span from
/// the first `[` or `{` to the last matching closer. Returns the trimmed
/// input when neither is found.
pub fn extract_json(text: &str) -> &str {
    let text = text.trim();

    if let Some(open) = text.find("```") {
        let after = &text[open + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let fence_tag = after[..body_start].trim();
        if fence_tag.is_empty() || fence_tag.eq_ignore_ascii_case("json") {
            let body = &after[body_start..];
            if let Some(close) = body.find("```") {
                let inner = body[..close].trim();
                if inner.starts_with('[') || inner.starts_with('{') {
                    return inner;
                }
            }
        }
    }

    let start = match (text.find('['), text.find('{')) {
        (Some(a), Some(o)) => Some(a.min(o)),
        (a, o) => a.or(o),
    };
    if let Some(start) = start {
        let closer = if text[start..].starts_with('[') { ']' } else { '}' };
        if let Some(end) = text.rfind(closer) {
            if end > start {
                return &text[start..=end];
            }
        }
    }

    text
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope {
    Wrapped { test_cases: Vec<TestCase> },
    Bare(Vec<TestCase>),
}

/// Strictly parse a completion into test cases.
///
/// Fails with [`Error::GenerationParse`] when the JSON is invalid, does not
/// match the test-case shape, is empty, or contains a case without an id.
pub fn parse_test_cases(raw: &str) -> Result<Vec<TestCase>> {
    let json = extract_json(raw);
    let envelope: Envelope = serde_json::from_str(json).map_err(|e| {
        Error::GenerationParse(format!("output is not a list of test cases: {}", e))
    })?;
    let cases = match envelope {
        Envelope::Wrapped { test_cases } => test_cases,
        Envelope::Bare(cases) => cases,
    };

    if cases.is_empty() {
        return Err(Error::GenerationParse("no test cases in output".into()));
    }
    if cases.iter().any(|c| c.id.trim().is_empty()) {
        return Err(Error::GenerationParse("test case with empty id".into()));
    }
    Ok(cases)
}

/// Keep only cases citing a supplied source. Among grounded cases the first
/// with a given id wins; a list-valued `based_on` is narrowed to the
/// supplied ids.
///
/// Fails with [`Error::NoGroundedOutput`] when nothing survives.
pub fn enforce_grounding(
    cases: Vec<TestCase>,
    supplied: &BTreeSet<String>,
) -> Result<Vec<TestCase>> {
    let total = cases.len();
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(total);

    for mut case in cases {
        let grounded = match &case.grounded_in {
            SourceRef::One(id) => supplied.contains(id),
            SourceRef::Many(ids) => {
                let narrowed: Vec<String> =
                    ids.iter().filter(|id| supplied.contains(*id)).cloned().collect();
                let any = !narrowed.is_empty();
                case.grounded_in = SourceRef::Many(narrowed);
                any
            }
        };

        if !grounded {
            tracing::warn!(id = %case.id, "test case cites a source outside the retrieved context; discarded");
        } else if !seen.insert(case.id.clone()) {
            tracing::warn!(id = %case.id, "duplicate test case id discarded");
        } else {
            kept.push(case);
        }
    }

    if kept.is_empty() {
        return Err(Error::NoGroundedOutput { discarded: total });
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supplied(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn case(id: &str, based_on: SourceRef) -> TestCase {
        TestCase {
            id: id.into(),
            title: "t".into(),
            scenario: "s".into(),
            steps: vec!["a".into()],
            expected: "e".into(),
            grounded_in: based_on,
        }
    }

    const ONE_CASE: &str = r#"[{"id":"TC001","title":"t","scenario":"s","steps":["a","b"],"expected":"e","based_on":"product_specs.md"}]"#;

    #[test]
    fn extracts_fenced_json() {
        let raw = format!("Here you go:\n```json\n{}\n```\nEnjoy.", ONE_CASE);
        assert_eq!(extract_json(&raw), ONE_CASE);
    }

    #[test]
    fn extracts_json_surrounded_by_prose() {
        let raw = format!("Sure! {} Hope this helps.", ONE_CASE);
        assert_eq!(extract_json(&raw), ONE_CASE);
    }

    #[test]
    fn parses_wrapped_and_bare_forms() {
        let wrapped = format!("{{\"test_cases\": {}}}", ONE_CASE);
        assert_eq!(parse_test_cases(&wrapped).unwrap().len(), 1);
        let cases = parse_test_cases(ONE_CASE).unwrap();
        assert_eq!(cases[0].steps, vec!["a", "b"]);
    }

    #[test]
    fn rejects_wrong_shape_and_empty_lists() {
        assert!(matches!(
            parse_test_cases("[{\"id\": \"TC1\", \"title\": \"missing fields\"}]"),
            Err(Error::GenerationParse(_))
        ));
        assert!(matches!(
            parse_test_cases("I could not find anything relevant."),
            Err(Error::GenerationParse(_))
        ));
        assert!(matches!(
            parse_test_cases("{\"test_cases\": []}"),
            Err(Error::GenerationParse(_))
        ));
    }

    #[test]
    fn ungrounded_case_is_discarded() {
        let kept = enforce_grounding(
            vec![
                case("TC001", SourceRef::One("product_specs.md".into())),
                case("TC002", SourceRef::One("nonexistent.md".into())),
            ],
            &supplied(&["product_specs.md", "ui_ux_guide.txt"]),
        )
        .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id, "TC001");
    }

    #[test]
    fn matching_is_exact() {
        let err = enforce_grounding(
            vec![case("TC001", SourceRef::One("Product_Specs.md".into()))],
            &supplied(&["product_specs.md"]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::NoGroundedOutput { discarded: 1 }));
    }

    #[test]
    fn list_sources_are_narrowed() {
        let kept = enforce_grounding(
            vec![case(
                "TC001",
                SourceRef::Many(vec!["nonexistent.md".into(), "ui_ux_guide.txt".into()]),
            )],
            &supplied(&["ui_ux_guide.txt"]),
        )
        .unwrap();
        assert_eq!(
            kept[0].grounded_in,
            SourceRef::Many(vec!["ui_ux_guide.txt".into()])
        );
    }

    #[test]
    fn first_duplicate_id_wins() {
        let mut second = case("TC001", SourceRef::One("a.md".into()));
        second.title = "second".into();
        let kept = enforce_grounding(
            vec![case("TC001", SourceRef::One("a.md".into())), second],
            &supplied(&["a.md"]),
        )
        .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "t");
    }

    #[test]
    fn ungrounded_duplicate_does_not_shadow_grounded_case() {
        let mut grounded = case("TC001", SourceRef::One("a.md".into()));
        grounded.title = "grounded".into();
        let kept = enforce_grounding(
            vec![case("TC001", SourceRef::One("elsewhere.md".into())), grounded],
            &supplied(&["a.md"]),
        )
        .unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].title, "grounded");
    }

    #[test]
    fn prompt_lists_supplied_sources() {
        let prompt = build_prompt(
            "### Source: a.md\nalpha\n\n",
            &supplied(&["a.md"]),
            "checkout",
        );
        assert!(prompt.contains("exactly one of: \"a.md\""));
        assert!(prompt.contains("User Request: checkout"));
    }
}
