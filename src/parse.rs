//! Parser dispatch: raw uploads to normalized text.
//!
//! Dispatch is by declared [`DocumentFormat`]. Each format has exactly one
//! normalization function, looked up in [`DocumentFormat::normalizer`].
//! Content is sniffed in one place only: a `pdf` (rich-document) upload
//! that starts with ZIP magic is read as DOCX. No other format, and no
//! other family, is ever chosen from the bytes.
//!
//! | Format | Family | Normalization |
//! |--------|--------|---------------|
//! | `pdf` | rich-document | per-page text joined with form feeds |
//! | `docx` | rich-document | `word/document.xml` runs, one paragraph per line |
//! | `html` | structured-markup | visible text plus `[#id]`/`[name=…]` markers, whitespace collapsed |
//! | `json` | tagged-data | flattened `key.path: value` lines |
//! | `text` | plain-text | unchanged |
//!
//! Nothing here touches the filesystem or network.

use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use scraper::{ElementRef, Html, Node};
use serde_json::Value;

use crate::error::{Error, Result};

/// Separator placed between PDF pages.
pub const PAGE_BREAK: &str = "\n\u{000C}\n";

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Elements whose text content is never visible.
const INVISIBLE_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head"];

/// Declared format of an uploaded document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Docx,
    Html,
    Json,
    Text,
}

type Normalizer = fn(&[u8]) -> Result<String>;

impl DocumentFormat {
    /// The format family name used in error messages.
    pub fn family(self) -> &'static str {
        match self {
            DocumentFormat::Pdf | DocumentFormat::Docx => "rich-document",
            DocumentFormat::Html => "structured-markup",
            DocumentFormat::Json => "tagged-data",
            DocumentFormat::Text => "plain-text",
        }
    }

    fn normalizer(self) -> Normalizer {
        match self {
            DocumentFormat::Pdf => normalize_pdf,
            DocumentFormat::Docx => normalize_docx,
            DocumentFormat::Html => normalize_markup,
            DocumentFormat::Json => normalize_tagged_data,
            DocumentFormat::Text => normalize_plain_text,
        }
    }

    /// Declared format for an upload, from its file extension.
    ///
    /// Unknown extensions are treated as plain text, as the upload form
    /// accepts `.txt` and `.md` alongside arbitrary notes.
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        ext.parse().unwrap_or(DocumentFormat::Text)
    }
}

impl FromStr for DocumentFormat {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "pdf" | "rich-document" => Ok(DocumentFormat::Pdf),
            "docx" => Ok(DocumentFormat::Docx),
            "html" | "htm" | "xhtml" | "structured-markup" => Ok(DocumentFormat::Html),
            "json" | "tagged-data" => Ok(DocumentFormat::Json),
            "txt" | "text" | "md" | "markdown" | "plain-text" => Ok(DocumentFormat::Text),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Normalize raw content by its declared format tag.
pub fn normalize_tagged(format_tag: &str, raw: &[u8]) -> Result<String> {
    normalize(format_tag.parse()?, raw)
}

/// Normalize raw content into a single text body.
pub fn normalize(format: DocumentFormat, raw: &[u8]) -> Result<String> {
    (format.normalizer())(raw)
}

fn utf8(raw: &[u8], format: DocumentFormat) -> Result<&str> {
    std::str::from_utf8(raw).map_err(|e| Error::malformed(format.family(), e))
}

// ============ rich-document ============

fn normalize_pdf(raw: &[u8]) -> Result<String> {
    // rich-document uploads may be DOCX (a ZIP container) rather than PDF
    if raw.starts_with(b"PK\x03\x04") {
        return normalize_docx(raw);
    }
    let pages = pdf_extract::extract_text_from_mem_by_pages(raw)
        .map_err(|e| Error::malformed("rich-document", e))?;
    let pages: Vec<&str> = pages.iter().map(|p| p.trim()).collect();
    Ok(pages.join(PAGE_BREAK))
}

fn normalize_docx(raw: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(raw))
        .map_err(|e| Error::malformed("rich-document", e))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| Error::malformed("rich-document", e))?;
    let mut xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut xml)
        .map_err(|e| Error::malformed("rich-document", e))?;
    if xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(Error::malformed(
            "rich-document",
            "word/document.xml exceeds size limit",
        ));
    }
    docx_paragraphs(&xml)
}

/// Collect `<w:t>` runs, one line per `<w:p>` paragraph.
fn docx_paragraphs(xml: &[u8]) -> Result<String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| Error::malformed("rich-document", e))?;
                current.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if !current.trim().is_empty() {
                        lines.push(current.trim().to_string());
                    }
                    current.clear();
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::malformed("rich-document", e)),
            _ => {}
        }
        buf.clear();
    }
    if !current.trim().is_empty() {
        lines.push(current.trim().to_string());
    }
    Ok(lines.join("\n"))
}

// ============ structured-markup ============

fn normalize_markup(raw: &[u8]) -> Result<String> {
    let source = utf8(raw, DocumentFormat::Html)?;
    let html = Html::parse_document(source);
    let mut tokens: Vec<String> = Vec::new();

    for node in html.root_element().descendants() {
        match node.value() {
            Node::Element(el) => {
                if INVISIBLE_ELEMENTS.contains(&el.name()) {
                    continue;
                }
                if let Some(id) = el.attr("id").filter(|v| !v.trim().is_empty()) {
                    tokens.push(format!("[#{}]", id.trim()));
                }
                if let Some(name) = el.attr("name").filter(|v| !v.trim().is_empty()) {
                    tokens.push(format!("[name={}]", name.trim()));
                }
            }
            Node::Text(text) => {
                let hidden = node
                    .ancestors()
                    .filter_map(ElementRef::wrap)
                    .any(|el| INVISIBLE_ELEMENTS.contains(&el.value().name()));
                if hidden {
                    continue;
                }
                tokens.extend(text.split_whitespace().map(str::to_string));
            }
            _ => {}
        }
    }

    Ok(tokens.join(" "))
}

// ============ tagged-data ============

fn normalize_tagged_data(raw: &[u8]) -> Result<String> {
    let value: Value =
        serde_json::from_slice(raw).map_err(|e| Error::malformed("tagged-data", e))?;
    let mut lines = Vec::new();
    flatten_value("", &value, &mut lines);
    Ok(lines.join("\n"))
}

fn flatten_value(path: &str, value: &Value, lines: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, v) in map {
                let child = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", path, key)
                };
                flatten_value(&child, v, lines);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_value(&format!("{}[{}]", path, i), v, lines);
            }
        }
        scalar => {
            let rendered = match scalar {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if path.is_empty() {
                lines.push(rendered);
            } else {
                lines.push(format!("{}: {}", path, rendered));
            }
        }
    }
}

// ============ plain-text ============

fn normalize_plain_text(raw: &[u8]) -> Result<String> {
    utf8(raw, DocumentFormat::Text).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tag_is_unsupported() {
        let err = normalize_tagged("application/octet-stream", b"foo").unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat(_)));
    }

    #[test]
    fn declared_family_tags_dispatch() {
        assert_eq!(
            "structured-markup".parse::<DocumentFormat>().unwrap(),
            DocumentFormat::Html
        );
        assert_eq!(
            "tagged-data".parse::<DocumentFormat>().unwrap(),
            DocumentFormat::Json
        );
        assert_eq!(
            "PLAIN-TEXT".parse::<DocumentFormat>().unwrap(),
            DocumentFormat::Text
        );
    }

    #[test]
    fn extension_dispatch_defaults_to_text() {
        assert_eq!(
            DocumentFormat::from_path(Path::new("specs/checkout.HTML")),
            DocumentFormat::Html
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("ui_ux_guide.txt")),
            DocumentFormat::Text
        );
        assert_eq!(
            DocumentFormat::from_path(Path::new("NOTES")),
            DocumentFormat::Text
        );
    }

    #[test]
    fn plain_text_passes_through() {
        let raw = "Line one\n\n  indented   words\n";
        assert_eq!(normalize(DocumentFormat::Text, raw.as_bytes()).unwrap(), raw);
    }

    #[test]
    fn invalid_utf8_text_is_malformed() {
        let err = normalize(DocumentFormat::Text, &[0xff, 0xfe, 0x00]).unwrap_err();
        assert!(matches!(err, Error::MalformedContent { .. }));
    }

    #[test]
    fn markup_keeps_visible_text_and_identifiers() {
        let html = r#"<html><head><title>Checkout</title><style>.x{color:red}</style></head>
            <body>
              <h1>Checkout</h1>
              <script>var secret = 1;</script>
              <form id="checkout-form">
                <label>Discount   code</label>
                <input id="discount" name="promo" type="text">
                <button id="apply-btn">Apply</button>
              </form>
            </body></html>"#;
        let text = normalize(DocumentFormat::Html, html.as_bytes()).unwrap();
        assert_eq!(
            text,
            "Checkout [#checkout-form] Discount code [#discount] [name=promo] [#apply-btn] Apply"
        );
        assert!(!text.contains("secret"));
        assert!(!text.contains("color"));
    }

    #[test]
    fn tagged_data_flattens_to_key_value_lines() {
        let json = r#"{"discounts": {"SAVE15": {"percent": 15, "active": true}},
                       "shipping": [{"method": "express", "cost": 10}]}"#;
        let text = normalize(DocumentFormat::Json, json.as_bytes()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines.contains(&"discounts.SAVE15.percent: 15"));
        assert!(lines.contains(&"discounts.SAVE15.active: true"));
        assert!(lines.contains(&"shipping[0].method: express"));
        assert!(lines.contains(&"shipping[0].cost: 10"));
    }

    #[test]
    fn invalid_json_is_malformed() {
        let err = normalize(DocumentFormat::Json, b"{\"a\": ").unwrap_err();
        match err {
            Error::MalformedContent { format, .. } => assert_eq!(format, "tagged-data"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn invalid_pdf_is_malformed() {
        let err = normalize(DocumentFormat::Pdf, b"not a pdf").unwrap_err();
        assert!(matches!(err, Error::MalformedContent { .. }));
    }

    #[test]
    fn invalid_zip_is_malformed_docx() {
        let err = normalize(DocumentFormat::Docx, b"not a zip").unwrap_err();
        assert!(matches!(err, Error::MalformedContent { .. }));
    }

    #[test]
    fn docx_paragraphs_become_lines() {
        let xml = br#"<?xml version="1.0"?><w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body><w:p><w:r><w:t>Free shipping</w:t></w:r><w:r><w:t xml:space="preserve"> over $50</w:t></w:r></w:p><w:p><w:r><w:t>Codes expire &amp; reset</w:t></w:r></w:p></w:body></w:document>"#;
        let text = docx_paragraphs(xml).unwrap();
        assert_eq!(text, "Free shipping over $50\nCodes expire & reset");
    }
}
