//! Open-access location lookup through Unpaywall.
//!
//! API documentation: <https://unpaywall.org/products/api>

use async_trait::async_trait;
use serde::Deserialize;

use crate::sources::{ensure_success, SourceError};
use crate::utils::{api_retry_config, with_retry, HttpClient};

/// Finds a freely readable copy of a work by DOI
#[async_trait]
pub trait OaResolver: Send + Sync + std::fmt::Debug {
    async fn locate(&self, doi: &str) -> Result<Option<String>, SourceError>;
}

/// Unpaywall `best_oa_location` resolver; requires a contact email
#[derive(Debug, Clone)]
pub struct UnpaywallResolver {
    client: HttpClient,
    base_url: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct UnpaywallResponse {
    best_oa_location: Option<UnpaywallLocation>,
}

#[derive(Debug, Deserialize)]
struct UnpaywallLocation {
    url_for_pdf: Option<String>,
    url: Option<String>,
}

impl UnpaywallResolver {
    pub fn new(base_url: &str, email: &str) -> Result<Self, SourceError> {
        Ok(Self {
            client: HttpClient::new(Some(email))?,
            base_url: base_url.trim_end_matches('/').to_string(),
            email: email.to_string(),
        })
    }

    fn lookup_url(&self, doi: &str) -> String {
        format!(
            "{}/{}?email={}",
            self.base_url,
            urlencoding::encode(doi),
            urlencoding::encode(&self.email)
        )
    }
}

#[async_trait]
impl OaResolver for UnpaywallResolver {
    async fn locate(&self, doi: &str) -> Result<Option<String>, SourceError> {
        let url = self.lookup_url(doi);
        let (client, url) = (&self.client, url.as_str());

        let result = with_retry(api_retry_config(), || async move {
            let response = client.get(url).send().await?;
            let response = ensure_success(response, "Unpaywall")?;
            response
                .json::<UnpaywallResponse>()
                .await
                .map_err(|e| SourceError::Parse(format!("Failed to parse Unpaywall response: {}", e)))
        })
        .await;

        let data = match result {
            Ok(data) => data,
            Err(SourceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(data.best_oa_location.and_then(|location| {
            location
                .url_for_pdf
                .filter(|u| !u.trim().is_empty())
                .or(location.url.filter(|u| !u.trim().is_empty()))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_lookup_url() {
        let resolver = UnpaywallResolver::new("https://api.unpaywall.org/v2/", "ops@example.org").unwrap();
        assert_eq!(
            resolver.lookup_url("10.1001/example.2024.1"),
            "https://api.unpaywall.org/v2/10.1001%2Fexample.2024.1?email=ops%40example.org"
        );
    }

    #[tokio::test]
    async fn test_prefers_pdf_url() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Any)
            .match_query(Matcher::UrlEncoded("email".into(), "ops@example.org".into()))
            .with_body(
                json!({"best_oa_location": {
                    "url_for_pdf": "https://repo.example/a.pdf",
                    "url": "https://repo.example/a"
                }})
                .to_string(),
            )
            .create_async()
            .await;

        let resolver = UnpaywallResolver::new(&server.url(), "ops@example.org").unwrap();
        assert_eq!(
            resolver.locate("10.1/a").await.unwrap().as_deref(),
            Some("https://repo.example/a.pdf")
        );
    }

    #[tokio::test]
    async fn test_closed_or_unknown_doi() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", Matcher::Regex("closed".to_string()))
            .match_query(Matcher::Any)
            .with_body(json!({"best_oa_location": null}).to_string())
            .create_async()
            .await;
        server
            .mock("GET", Matcher::Regex("missing".to_string()))
            .match_query(Matcher::Any)
            .with_status(404)
            .create_async()
            .await;

        let resolver = UnpaywallResolver::new(&server.url(), "ops@example.org").unwrap();
        assert_eq!(resolver.locate("10.1/closed").await.unwrap(), None);
        assert_eq!(resolver.locate("10.1/missing").await.unwrap(), None);
    }
}
