//! Automation script synthesis for a single test case.
//!
//! The synthesizer retrieves documentation for the test case's scenario,
//! inventories the selectors the page markup actually offers, and asks the
//! generator for a complete script in the configured framework. The result
//! is returned as text; it is never executed or linted here.

use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::generation::{GenerationRequest, Generator};
use crate::index::KnowledgeIndex;
use crate::models::{ScriptArtifact, TestCase};
use crate::retrieve::{assemble_context, retrieve};

/// Target automation framework for generated scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScriptFramework {
    #[default]
    SeleniumPython,
    PlaywrightPython,
}

impl ScriptFramework {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScriptFramework::SeleniumPython => "selenium-python",
            ScriptFramework::PlaywrightPython => "playwright-python",
        }
    }

    fn expert(&self) -> &'static str {
        match self {
            ScriptFramework::SeleniumPython => "Selenium Python",
            ScriptFramework::PlaywrightPython => "Playwright Python",
        }
    }

    fn requirements(&self) -> &'static str {
        match self {
            ScriptFramework::SeleniumPython => {
                "- Import everything needed: webdriver, By, WebDriverWait, expected_conditions as EC\n\
                 - Use Chrome WebDriver with proper setup\n\
                 - Use EXPLICIT WAITS (WebDriverWait with expected_conditions) before EVERY element interaction; never use time.sleep() for waiting\n\
                 - Quit the driver in a finally block"
            }
            ScriptFramework::PlaywrightPython => {
                "- Use the sync API: from playwright.sync_api import sync_playwright, expect\n\
                 - Launch Chromium and open a new page\n\
                 - Before EVERY element interaction wait explicitly with locator.wait_for(state=\"visible\"); use expect() for assertions; never use time.sleep() for waiting\n\
                 - Close the browser in a finally block"
            }
        }
    }
}

impl fmt::Display for ScriptFramework {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a selector was derived from the markup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    Id,
    Name,
    TestId,
    Class,
    Structural,
}

/// A selector the page offers, with the element it points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionTarget {
    pub selector: String,
    #[serde(rename = "type")]
    pub kind: TargetKind,
    pub tag: String,
    pub text: String,
}

const INTERACTIVE_TAGS: &[&str] = &["a", "button", "input", "select", "textarea", "form", "label"];
const TARGET_TEXT_CHARS: usize = 50;

fn is_css_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '-' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn attr_selector(attr: &str, value: &str) -> String {
    format!("[{}='{}']", attr, value.replace('\'', "\\'"))
}

/// `.name` when the class is a plain identifier, else a word match on the
/// attribute (`md:flex`, `w-1/2`).
fn class_selector(class: &str) -> String {
    if is_css_ident(class) {
        format!(".{}", class)
    } else {
        format!("[class~='{}']", class.replace('\'', "\\'"))
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    let joined = el.text().collect::<Vec<_>>().join(" ");
    let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(TARGET_TEXT_CHARS).collect()
}

/// `parent > tag:nth-of-type(n)` for an element without stable attributes.
fn structural_selector(el: &ElementRef<'_>) -> String {
    let tag = el.value().name();
    let position = 1 + el
        .prev_siblings()
        .filter_map(ElementRef::wrap)
        .filter(|sibling| sibling.value().name() == tag)
        .count();
    let parent = el
        .parent()
        .and_then(ElementRef::wrap)
        .map(|p| match p.value().id() {
            Some(id) if is_css_ident(id) => format!("#{}", id),
            _ => p.value().name().to_string(),
        });

    match parent {
        Some(parent) => format!("{} > {}:nth-of-type({})", parent, tag, position),
        None => format!("{}:nth-of-type({})", tag, position),
    }
}

/// Inventory the selectors `markup` supports.
///
/// Id selectors come first, then `name`, `data-testid` and class selectors,
/// then structural selectors for interactive elements that carry none of
/// those attributes. Duplicates are dropped and the list is capped at
/// `max_targets`.
pub fn extract_targets(markup: &str, max_targets: usize) -> Vec<InteractionTarget> {
    let document = Html::parse_document(markup);
    let mut buckets: [Vec<InteractionTarget>; 5] = Default::default();

    for node in document.root_element().descendants() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let value = el.value();
        let tag = value.name().to_string();
        let text = element_text(&el);
        let target = |selector: String, kind: TargetKind| InteractionTarget {
            selector,
            kind,
            tag: tag.clone(),
            text: text.clone(),
        };

        let mut anchored = false;
        if let Some(id) = value.id() {
            let selector = if is_css_ident(id) {
                format!("#{}", id)
            } else {
                attr_selector("id", id)
            };
            buckets[0].push(target(selector, TargetKind::Id));
            anchored = true;
        }
        if let Some(name) = value.attr("name") {
            buckets[1].push(target(attr_selector("name", name), TargetKind::Name));
            anchored = true;
        }
        if let Some(test_id) = value.attr("data-testid") {
            buckets[2].push(target(attr_selector("data-testid", test_id), TargetKind::TestId));
            anchored = true;
        }
        for class in value.classes() {
            buckets[3].push(target(class_selector(class), TargetKind::Class));
        }
        if !anchored && INTERACTIVE_TAGS.contains(&tag.as_str()) {
            buckets[4].push(target(structural_selector(&el), TargetKind::Structural));
        }
    }

    let mut seen = HashSet::new();
    buckets
        .into_iter()
        .flatten()
        .filter(|t| seen.insert(t.selector.clone()))
        .take(max_targets)
        .collect()
}

/// Remove a surrounding Markdown code fence, if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(open) = trimmed.find("```") else {
        return trimmed;
    };
    let after = &trimmed[open + 3..];
    let body = match after.find('\n') {
        Some(newline) => &after[newline + 1..],
        None => after,
    };
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

/// Limits and sampling for script synthesis.
#[derive(Debug, Clone, Copy)]
pub struct ScriptSettings {
    pub framework: ScriptFramework,
    pub max_markup_chars: usize,
    pub max_selectors: usize,
    pub max_context_chars: usize,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ScriptSettings {
    fn default() -> Self {
        Self {
            framework: ScriptFramework::default(),
            max_markup_chars: 3000,
            max_selectors: 150,
            max_context_chars: 2000,
            max_tokens: 2000,
            temperature: 0.1,
        }
    }
}

pub struct ScriptSynthesizer {
    generator: Arc<dyn Generator>,
    settings: ScriptSettings,
}

impl ScriptSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, settings: ScriptSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    pub fn framework(&self) -> ScriptFramework {
        self.settings.framework
    }

    /// Generate a script automating `test_case` against `page_markup`.
    ///
    /// Fails with [`Error::MissingMarkup`] for blank markup before any
    /// service is called, and with [`Error::GenerationParse`] when the
    /// completion is empty once code fences are removed.
    pub async fn synthesize(
        &self,
        index: &KnowledgeIndex,
        test_case: &TestCase,
        page_markup: &str,
        k: usize,
    ) -> Result<ScriptArtifact> {
        if page_markup.trim().is_empty() {
            return Err(Error::MissingMarkup);
        }

        let retrieved = retrieve(index, &test_case.scenario, k).await?;
        let context = assemble_context(&retrieved, self.settings.max_context_chars);
        let targets = extract_targets(page_markup, self.settings.max_selectors);
        let prompt = self.build_prompt(test_case, page_markup, &targets, &context.text);

        let raw = self
            .generator
            .generate(&GenerationRequest {
                prompt: &prompt,
                schema: None,
                max_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            })
            .await
            .map_err(Error::GenerationService)?;

        let script = strip_code_fences(&raw);
        if script.is_empty() {
            return Err(Error::GenerationParse("generated script is empty".into()));
        }

        tracing::info!(
            test_case = %test_case.id,
            framework = %self.settings.framework,
            selectors = targets.len(),
            "script generated"
        );

        Ok(ScriptArtifact {
            id: uuid::Uuid::new_v4().to_string(),
            text: script.to_string(),
            based_on: test_case.id.clone(),
            framework: self.settings.framework.to_string(),
            generated_at: chrono::Utc::now(),
        })
    }

    fn build_prompt(
        &self,
        test_case: &TestCase,
        markup: &str,
        targets: &[InteractionTarget],
        context: &str,
    ) -> String {
        let framework = self.settings.framework;
        let markup: String = markup.chars().take(self.settings.max_markup_chars).collect();
        let case_json = serde_json::to_string_pretty(test_case).unwrap_or_default();
        let steps = test_case
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| format!("{}. {}", i + 1, s))
            .collect::<Vec<_>>()
            .join("\n");
        let selectors = serde_json::to_string_pretty(targets).unwrap_or_default();
        let context = if context.is_empty() {
            "No additional documentation available."
        } else {
            context
        };

        format!(
            r#"You are a {expert} expert. Generate a complete, runnable {expert} script.

TEST CASE TO AUTOMATE:
{case_json}

Test Scenario: {scenario}
Expected Result: {expected}
Test Steps (follow in this exact order):
{steps}

PAGE HTML:
{markup}

AVAILABLE SELECTORS (extracted from the page; use only these, preferring id, then name, then data-testid, then class):
{selectors}

RELEVANT DOCUMENTATION:
{context}
REQUIREMENTS:
{requirements}
- Use ONLY selectors from the list above or selectors directly derivable from the PAGE HTML
- Perform the test steps in order, one block per step, with a short comment naming the step
- Finish by asserting the expected result: {expected}
- Include a main execution block (if __name__ == "__main__")
- Return ONLY Python code, no markdown, no explanations

Generate the complete script now:"#,
            expert = framework.expert(),
            scenario = test_case.scenario,
            expected = test_case.expected,
            requirements = framework.requirements(),
        )
    }
}
