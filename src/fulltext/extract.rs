//! Turning downloaded documents into plain text.

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;

use super::FetchError;

/// Bytes searched for the `%PDF` magic number
const PDF_SNIFF_WINDOW: usize = 1024;

/// Elements whose text never counts as article content
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "nav", "noscript", "header", "footer"];

static CONTENT_SELECTORS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["article", "main", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .collect()
});

/// What a downloaded body turned out to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    Html,
    PlainText,
}

/// Decide how to read `body`, trusting the bytes over the declared content type
pub fn sniff(body: &[u8], content_type: Option<&str>) -> Result<DocumentKind, FetchError> {
    let head = &body[..body.len().min(PDF_SNIFF_WINDOW)];
    if head.windows(4).any(|w| w == b"%PDF") {
        return Ok(DocumentKind::Pdf);
    }

    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => Ok(DocumentKind::Html),
        "text/plain" => Ok(DocumentKind::PlainText),
        "" | "application/octet-stream" if looks_like_html(head) => Ok(DocumentKind::Html),
        "" => Err(FetchError::UnsupportedContentType("unknown".to_string())),
        other => Err(FetchError::UnsupportedContentType(other.to_string())),
    }
}

fn looks_like_html(head: &[u8]) -> bool {
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

/// Main readable text of an HTML page
///
/// The first of `article`, `main`, `body` holding any text wins.
pub fn html_main_text(html: &str) -> String {
    let document = Html::parse_document(html);
    for selector in CONTENT_SELECTORS.iter() {
        if let Some(element) = document.select(selector).next() {
            let text = element_text(element);
            if !text.is_empty() {
                return text;
            }
        }
    }
    String::new()
}

fn element_text(element: ElementRef<'_>) -> String {
    let mut parts = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !skipped {
            parts.extend(text.split_whitespace());
        }
    }
    parts.join(" ")
}

/// Something that turns a document body into plain text
#[async_trait]
pub trait TextExtractor: Send + Sync + std::fmt::Debug {
    async fn extract(&self, body: Vec<u8>, content_type: Option<String>) -> Result<String, FetchError>;
}

/// PDF via `pdf-extract`, HTML via `scraper`, plain text as-is
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtractor;

#[async_trait]
impl TextExtractor for DefaultExtractor {
    async fn extract(&self, body: Vec<u8>, content_type: Option<String>) -> Result<String, FetchError> {
        let text = match sniff(&body, content_type.as_deref())? {
            DocumentKind::Pdf => tokio::task::spawn_blocking(move || {
                pdf_extract::extract_text_from_mem(&body)
                    .map_err(|e| FetchError::Extraction(e.to_string()))
            })
            .await
            .map_err(|e| FetchError::Extraction(format!("PDF worker failed: {}", e)))??,
            DocumentKind::Html => html_main_text(&String::from_utf8_lossy(&body)),
            DocumentKind::PlainText => String::from_utf8_lossy(&body).into_owned(),
        };

        if text.trim().is_empty() {
            // Scanned PDFs and script-rendered pages land here
            return Err(FetchError::Extraction("no extractable text".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sniff_pdf_magic_wins() {
        let body = b"\n\n%PDF-1.7 rest of file";
        assert_eq!(sniff(body, Some("text/html")).unwrap(), DocumentKind::Pdf);
        assert_eq!(sniff(body, None).unwrap(), DocumentKind::Pdf);
    }

    #[test]
    fn test_sniff_by_content_type() {
        assert_eq!(
            sniff(b"<p>hi</p>", Some("text/html; charset=utf-8")).unwrap(),
            DocumentKind::Html
        );
        assert_eq!(sniff(b"hi", Some("text/plain")).unwrap(), DocumentKind::PlainText);
        assert_eq!(
            sniff(b"<!DOCTYPE html><html>", None).unwrap(),
            DocumentKind::Html
        );
        assert!(matches!(
            sniff(b"PK\x03\x04", Some("application/zip")),
            Err(FetchError::UnsupportedContentType(ct)) if ct == "application/zip"
        ));
    }

    #[test]
    fn test_html_main_text_prefers_article() {
        let html = r#"<html><head><style>p { color: red }</style></head>
            <body><nav>Home | About</nav>
            <article><h1>Results</h1><p>We used the   AHRQ Compendium.</p>
            <script>track()</script></article>
            <footer>Copyright</footer></body></html>"#;
        assert_eq!(html_main_text(html), "Results We used the AHRQ Compendium.");
    }

    #[test]
    fn test_html_main_text_falls_back_to_body() {
        let html = "<html><body><nav>Menu</nav><div>Plain page body</div></body></html>";
        assert_eq!(html_main_text(html), "Plain page body");
    }

    #[tokio::test]
    async fn test_default_extractor_plain_and_empty() {
        let extractor = DefaultExtractor;
        let text = extractor
            .extract(b"linked to the compendium".to_vec(), Some("text/plain".to_string()))
            .await
            .unwrap();
        assert_eq!(text, "linked to the compendium");

        let empty = extractor
            .extract(b"<html><body><script>x()</script></body></html>".to_vec(), Some("text/html".to_string()))
            .await;
        assert!(matches!(empty, Err(FetchError::Extraction(_))));
    }
}
