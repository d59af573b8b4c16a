//! PubMed source using the NCBI E-utilities API.

use async_trait::async_trait;
use quick_xml::de::from_str;
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;

use super::{ensure_success, Page, PageCursor, Source, SourceCapabilities, SourceError};
use crate::config::PubMedConfig;
use crate::models::{RawRecord, SearchTerm, SourceKind};
use crate::utils::{HttpClient, Throttle};

/// PubMed source
///
/// Pages through ESearch for PMIDs, then pulls the full `PubmedArticle`
/// records for each page with EFetch. NCBI policy requires a contact email.
#[derive(Debug)]
pub struct PubMedSource {
    client: HttpClient,
    throttle: Throttle,
    base_url: String,
    email: String,
    tool: String,
    api_key: Option<String>,
    page_size: usize,
}

impl PubMedSource {
    /// Create a PubMed client; fails without a contact email
    pub fn new(config: &PubMedConfig, contact: Option<&str>) -> Result<Self, SourceError> {
        let email = contact.ok_or_else(|| {
            SourceError::Unauthorized("NCBI E-utilities require a contact email".to_string())
        })?;
        let throttle = Throttle::per_second(config.requests_per_second())
            .map_err(|e| SourceError::InvalidRequest(e.to_string()))?;

        Ok(Self {
            client: HttpClient::new(Some(email))?,
            throttle,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
            tool: config.tool.clone(),
            api_key: config.api_key.clone().filter(|k| !k.trim().is_empty()),
            page_size: config.page_size.max(1),
        })
    }

    fn common_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("tool", self.tool.clone()),
            ("email", self.email.clone()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        params
    }

    /// Build E-utilities search URL
    fn build_search_url(&self, term: &str, retstart: usize, retmax: usize) -> String {
        let mut params = self.common_params();
        params.push(("term", term.to_string()));
        params.push(("retstart", retstart.to_string()));
        params.push(("retmax", retmax.to_string()));

        format!("{}/esearch.fcgi?{}", self.base_url, encode_params(&params))
    }

    /// Build E-utilities fetch URL for specific PubMed IDs
    fn build_fetch_url(&self, ids: &[String]) -> String {
        let mut params = self.common_params();
        params.push(("id", ids.join(",")));
        params.push(("retmode", "xml".to_string()));

        format!("{}/efetch.fcgi?{}", self.base_url, encode_params(&params))
    }

    async fn get_text(&self, url: &str, context: &str) -> Result<String, SourceError> {
        self.throttle.acquire().await?;
        let response = self.client.get(url).send().await?;
        Ok(ensure_success(response, context)?.text().await?)
    }
}

fn encode_params(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// PMIDs on one ESearch page and the total hit count
fn parse_search_response(xml: &str) -> Result<(Vec<String>, usize), SourceError> {
    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct ESearchResult {
        Count: Option<String>,
        IdList: Option<IdList>,
        ERROR: Option<String>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct IdList {
        #[serde(rename = "Id", default)]
        ids: Vec<String>,
    }

    let result: ESearchResult = from_str(xml)
        .map_err(|e| SourceError::Parse(format!("Failed to parse PubMed search XML: {}", e)))?;

    if let Some(error) = result.ERROR {
        return Err(SourceError::Api(format!("ESearch error: {}", error)));
    }

    let count = result
        .Count
        .and_then(|c| c.trim().parse().ok())
        .unwrap_or(0);
    Ok((result.IdList.map(|l| l.ids).unwrap_or_default(), count))
}

/// Cut an EFetch `PubmedArticleSet` into one XML string per `<PubmedArticle>`
fn split_articles(xml: &str) -> Result<Vec<String>, SourceError> {
    let mut reader = Reader::from_str(xml);
    let mut articles = Vec::new();
    let mut start = None;

    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event() {
            Ok(Event::Start(e)) if e.name().as_ref() == b"PubmedArticle" => {
                start = Some(before);
            }
            Ok(Event::End(e)) if e.name().as_ref() == b"PubmedArticle" => {
                if let Some(begin) = start.take() {
                    let end = reader.buffer_position() as usize;
                    articles.push(xml[begin..end].to_string());
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SourceError::Parse(format!(
                    "Failed to parse PubMed fetch XML near byte {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    Ok(articles)
}

#[async_trait]
impl Source for PubMedSource {
    fn kind(&self) -> SourceKind {
        SourceKind::PubMed
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities::KEYWORD_SEARCH | SourceCapabilities::REQUIRES_CONTACT
    }

    async fn fetch_page(
        &self,
        term: &SearchTerm,
        cursor: &PageCursor,
        remaining: usize,
    ) -> Result<Page, SourceError> {
        let retstart = match cursor {
            PageCursor::Start => 0,
            PageCursor::Offset(offset) => *offset,
            other => {
                return Err(SourceError::InvalidRequest(format!(
                    "unexpected PubMed cursor {:?}",
                    other
                )))
            }
        };
        let retmax = self.page_size.min(remaining).max(1);

        let search_xml = self
            .get_text(
                &self.build_search_url(&term.text, retstart, retmax),
                "PubMed ESearch",
            )
            .await?;
        let (ids, count) = parse_search_response(&search_xml)?;
        if ids.is_empty() {
            return Ok(Page::last(Vec::new()));
        }

        let fetch_xml = self
            .get_text(&self.build_fetch_url(&ids), "PubMed EFetch")
            .await?;
        let records = split_articles(&fetch_xml)?
            .into_iter()
            .map(|xml| RawRecord::xml(SourceKind::PubMed, term.text.clone(), xml))
            .collect();

        let consumed = retstart + ids.len();
        let next = (consumed < count).then_some(PageCursor::Offset(consumed));
        Ok(Page::new(records, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    const ESEARCH: &str = r#"<?xml version="1.0" encoding="UTF-8" ?>
<!DOCTYPE eSearchResult PUBLIC "-//NLM//DTD esearch 20060628//EN" "https://eutils.ncbi.nlm.nih.gov/eutils/dtd/20060628/esearch.dtd">
<eSearchResult><Count>3</Count><RetMax>2</RetMax><RetStart>0</RetStart>
<IdList>
<Id>33445566</Id>
<Id>31234567</Id>
</IdList></eSearchResult>"#;

    const EFETCH: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">33445566</PMID>
    <Article><ArticleTitle>Vertical Integration and Physician Prices</ArticleTitle></Article>
  </MedlineCitation>
</PubmedArticle>
<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">31234567</PMID>
    <Article><ArticleTitle>Health System Consolidation Trends</ArticleTitle></Article>
  </MedlineCitation>
</PubmedArticle>
</PubmedArticleSet>"#;

    fn source(base_url: String) -> PubMedSource {
        let config = PubMedConfig {
            base_url,
            api_key: None,
            page_size: 2,
            ..PubMedConfig::default()
        };
        PubMedSource::new(&config, Some("ops@example.org")).unwrap()
    }

    #[test]
    fn test_requires_contact() {
        let result = PubMedSource::new(&PubMedConfig::default(), None);
        assert!(matches!(result, Err(SourceError::Unauthorized(_))));
    }

    #[test]
    fn test_parse_search_response() {
        let (ids, count) = parse_search_response(ESEARCH).unwrap();
        assert_eq!(ids, vec!["33445566", "31234567"]);
        assert_eq!(count, 3);
    }

    #[test]
    fn test_split_articles() {
        let articles = split_articles(EFETCH).unwrap();
        assert_eq!(articles.len(), 2);
        assert!(articles[0].starts_with("<PubmedArticle>"));
        assert!(articles[0].ends_with("</PubmedArticle>"));
        assert!(articles[1].contains("31234567"));
    }

    #[test]
    fn test_search_url_carries_contact() {
        let source = source("https://eutils.example".to_string());
        let url = source.build_search_url("AHRQ Compendium", 200, 100);
        assert!(url.starts_with("https://eutils.example/esearch.fcgi?db=pubmed"));
        assert!(url.contains("email=ops%40example.org"));
        assert!(url.contains("term=AHRQ%20Compendium"));
        assert!(url.contains("retstart=200"));
        assert!(!url.contains("api_key"));
    }

    #[tokio::test]
    async fn test_fetch_page() {
        let mut server = mockito::Server::new_async().await;
        let search = server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("term".into(), "AHRQ Compendium".into()),
                Matcher::UrlEncoded("retstart".into(), "0".into()),
            ]))
            .with_body(ESEARCH)
            .create_async()
            .await;
        let fetch = server
            .mock("GET", "/efetch.fcgi")
            .match_query(Matcher::UrlEncoded("id".into(), "33445566,31234567".into()))
            .with_body(EFETCH)
            .create_async()
            .await;

        let source = source(server.url());
        let term = SearchTerm::new("AHRQ Compendium");
        let page = source
            .fetch_page(&term, &PageCursor::Start, 10)
            .await
            .unwrap();

        search.assert_async().await;
        fetch.assert_async().await;
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.next, Some(PageCursor::Offset(2)));
        assert_eq!(page.records[0].matched_term, "AHRQ Compendium");
    }

    #[tokio::test]
    async fn test_forbidden_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/esearch.fcgi")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let source = source(server.url());
        let result = source
            .fetch_page(&SearchTerm::new("AHRQ"), &PageCursor::Start, 10)
            .await;
        assert!(matches!(result, Err(SourceError::Unauthorized(_))));
    }
}
