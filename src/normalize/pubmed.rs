//! PubMed `<PubmedArticle>` XML into a canonical record.

use quick_xml::de::from_str;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

use super::{clean_text, normalize_doi, normalize_pmid, parse_year, NormalizeError};
use crate::models::{CanonicalRecord, RecordBuilder, SourceKind};

// Inline formatting inside titles and abstracts breaks `$text` deserialization
static INLINE_MARKUP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"</?(?:i|b|u|em|strong|sup|sub|sc)(?:\s[^>]*)?>")
        .expect("static regex: inline markup")
});

pub(super) fn normalize(xml: &str, matched_term: &str) -> Result<CanonicalRecord, NormalizeError> {
    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubmedArticle {
        MedlineCitation: Option<MedlineCitation>,
        PubmedData: Option<PubmedData>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct MedlineCitation {
        PMID: Option<TextNode>,
        Article: Option<Article>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Article {
        Journal: Option<Journal>,
        ArticleTitle: Option<TextNode>,
        Abstract: Option<Abstract>,
        AuthorList: Option<AuthorList>,
        #[serde(rename = "ELocationID", default)]
        elocation_ids: Vec<TypedId>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Journal {
        Title: Option<TextNode>,
        JournalIssue: Option<JournalIssue>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct JournalIssue {
        PubDate: Option<PubDate>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubDate {
        Year: Option<TextNode>,
        MedlineDate: Option<TextNode>,
    }

    #[derive(Debug, Deserialize)]
    struct TextNode {
        #[serde(rename = "$text", default)]
        text: String,
    }

    #[derive(Debug, Deserialize)]
    struct Abstract {
        #[serde(rename = "AbstractText", default)]
        sections: Vec<TextNode>,
    }

    #[derive(Debug, Deserialize)]
    struct AuthorList {
        #[serde(rename = "Author", default)]
        authors: Vec<Author>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct Author {
        LastName: Option<TextNode>,
        ForeName: Option<TextNode>,
        CollectiveName: Option<TextNode>,
    }

    #[derive(Debug, Deserialize)]
    #[allow(non_snake_case)]
    struct PubmedData {
        ArticleIdList: Option<ArticleIdList>,
    }

    #[derive(Debug, Deserialize)]
    struct ArticleIdList {
        #[serde(rename = "ArticleId", default)]
        ids: Vec<TypedId>,
    }

    /// `<ArticleId IdType="doi">` and `<ELocationID EIdType="doi">`
    #[derive(Debug, Deserialize)]
    struct TypedId {
        #[serde(rename = "@IdType", default)]
        id_type: Option<String>,
        #[serde(rename = "@EIdType", default)]
        eid_type: Option<String>,
        #[serde(rename = "$text", default)]
        value: String,
    }

    impl TypedId {
        fn is(&self, kind: &str) -> bool {
            self.id_type.as_deref() == Some(kind) || self.eid_type.as_deref() == Some(kind)
        }
    }

    let cleaned = INLINE_MARKUP.replace_all(xml, "");
    let article: PubmedArticle = from_str(&cleaned).map_err(|e| NormalizeError::Parse {
        kind: SourceKind::PubMed,
        message: format!("XML: {}", e),
    })?;

    let citation = article.MedlineCitation.as_ref();
    let body = citation.and_then(|m| m.Article.as_ref());
    let article_ids: &[TypedId] = article
        .PubmedData
        .as_ref()
        .and_then(|pd| pd.ArticleIdList.as_ref())
        .map(|list| list.ids.as_slice())
        .unwrap_or_default();

    let pmid = citation
        .and_then(|m| m.PMID.as_ref())
        .and_then(|p| normalize_pmid(&p.text))
        .or_else(|| {
            article_ids
                .iter()
                .find(|id| id.is("pubmed"))
                .and_then(|id| normalize_pmid(&id.value))
        });

    let doi = article_ids
        .iter()
        .chain(body.map(|a| a.elocation_ids.as_slice()).unwrap_or_default())
        .filter(|id| id.is("doi"))
        .find_map(|id| normalize_doi(&id.value));

    let pmc_url = article_ids
        .iter()
        .find(|id| id.is("pmc"))
        .map(|id| id.value.trim())
        .filter(|v| !v.is_empty())
        .map(|pmcid| format!("https://www.ncbi.nlm.nih.gov/pmc/articles/{}/", pmcid));

    let title = body
        .and_then(|a| a.ArticleTitle.as_ref())
        .map(|t| clean_text(&t.text))
        .unwrap_or_default();

    let abstract_text = body.and_then(|a| a.Abstract.as_ref()).map(|ab| {
        clean_text(
            &ab.sections
                .iter()
                .map(|s| s.text.as_str())
                .collect::<Vec<_>>()
                .join(" "),
        )
    });

    let authors = body
        .and_then(|a| a.AuthorList.as_ref())
        .map(|list| {
            list.authors
                .iter()
                .map(|author| match &author.CollectiveName {
                    Some(collective) => collective.text.clone(),
                    None => {
                        let fore = author.ForeName.as_ref().map(|f| f.text.as_str()).unwrap_or("");
                        let last = author.LastName.as_ref().map(|l| l.text.as_str()).unwrap_or("");
                        format!("{} {}", fore, last).trim().to_string()
                    }
                })
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let journal = body.and_then(|a| a.Journal.as_ref());
    let year = journal
        .and_then(|j| j.JournalIssue.as_ref())
        .and_then(|ji| ji.PubDate.as_ref())
        .and_then(|pd| pd.Year.as_ref().or(pd.MedlineDate.as_ref()))
        .and_then(|y| parse_year(&y.text));
    let journal_title = journal.and_then(|j| j.Title.as_ref()).map(|t| clean_text(&t.text));

    let url = pmid
        .as_ref()
        .map(|p| format!("https://pubmed.ncbi.nlm.nih.gov/{}/", p));

    Ok(RecordBuilder::new(SourceKind::PubMed, title)
        .doi(doi)
        .pmid(pmid)
        .year(year)
        .keyword(matched_term)
        .abstract_text(abstract_text)
        .authors(authors)
        .journal(journal_title)
        .url(url)
        .oa_url(pmc_url)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">30674227</PMID>
    <Article PubModel="Print">
      <Journal>
        <Title>Health services research</Title>
        <JournalIssue CitedMedium="Internet">
          <PubDate><MedlineDate>2019 Jan-Feb</MedlineDate></PubDate>
        </JournalIssue>
      </Journal>
      <ArticleTitle>Identifying <i>U.S.</i> Health Systems.</ArticleTitle>
      <ELocationID EIdType="doi" ValidYN="Y">10.1111/1475-6773.13224</ELocationID>
      <Abstract>
        <AbstractText Label="OBJECTIVE">We describe the Compendium.</AbstractText>
        <AbstractText Label="DATA SOURCES">Researchers used the AHRQ Compendium.</AbstractText>
      </Abstract>
      <AuthorList CompleteYN="Y">
        <Author ValidYN="Y"><LastName>Furukawa</LastName><ForeName>Michael F</ForeName></Author>
        <Author ValidYN="Y"><CollectiveName>AHRQ Team</CollectiveName></Author>
      </AuthorList>
    </Article>
  </MedlineCitation>
  <PubmedData>
    <ArticleIdList>
      <ArticleId IdType="pubmed">30674227</ArticleId>
      <ArticleId IdType="pmc">PMC6338293</ArticleId>
    </ArticleIdList>
  </PubmedData>
</PubmedArticle>"#;

    #[test]
    fn test_normalize_pubmed_article() {
        let record = normalize(ARTICLE, "AHRQ Compendium").unwrap();

        assert_eq!(record.pmid.as_deref(), Some("30674227"));
        assert_eq!(record.doi.as_deref(), Some("10.1111/1475-6773.13224"));
        assert_eq!(record.title, "Identifying U.S. Health Systems.");
        assert_eq!(record.normalized_title, "identifying us health systems");
        assert_eq!(record.year, Some(2019));
        assert_eq!(record.journal.as_deref(), Some("Health services research"));
        assert_eq!(record.authors, vec!["Michael F Furukawa", "AHRQ Team"]);
        assert_eq!(
            record.abstract_text.as_deref(),
            Some("We describe the Compendium. Researchers used the AHRQ Compendium.")
        );
        assert_eq!(
            record.oa_url.as_deref(),
            Some("https://www.ncbi.nlm.nih.gov/pmc/articles/PMC6338293/")
        );
        assert!(record.matched_keywords.contains("AHRQ Compendium"));
        assert!(record.sources.contains(&SourceKind::PubMed));
    }

    #[test]
    fn test_normalize_pubmed_in_press_year() {
        let xml = r#"<PubmedArticle><MedlineCitation><PMID>1</PMID><Article>
            <Journal><JournalIssue><PubDate><MedlineDate>in press</MedlineDate></PubDate></JournalIssue></Journal>
            <ArticleTitle>Pending</ArticleTitle></Article></MedlineCitation></PubmedArticle>"#;
        let record = normalize(xml, "term").unwrap();
        assert_eq!(record.year, None);
        assert_eq!(record.doi, None);
    }

    #[test]
    fn test_normalize_pubmed_malformed() {
        let result = normalize("<PubmedArticle><MedlineCitation>", "term");
        assert!(matches!(result, Err(NormalizeError::Parse { .. })));
    }
}
