// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SPECIALIST DOCS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Busca orientada a documentação: enciclopédia (Wikipedia), índice de
// papers (arXiv), fórum de discussão (Hacker News via Algolia) e docs de
// vendor (MDN), com fallback de busca geral restrita a sites.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::web::{SerperTool, SiteRestrictedTool};
use super::{relevance_for_rank, ContentFetcher, SearchTool, Specialist, SpecialistError};
use crate::types::{SearchHit, SpecialistDomain};
use crate::utils::clean_text;

async fn read_json(response: reqwest::Response) -> Result<Value, SpecialistError> {
    let status = response.status();
    if !status.is_success() {
        return Err(SpecialistError::ApiError(status.to_string()));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| SpecialistError::ApiError(format!("invalid body: {e}")))
}

// ─────────────────────────────────────────────────
// Wikipedia
// ─────────────────────────────────────────────────

/// Busca na Wikipedia (API MediaWiki)
pub struct WikipediaTool {
    client: reqwest::Client,
}

impl WikipediaTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for WikipediaTool {
    fn name(&self) -> &str {
        "wikipedia"
    }

    fn description(&self) -> &str {
        "Wikipedia search (MediaWiki API)"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://en.wikipedia.org/w/api.php")
            .query(&[
                ("action", "query".to_string()),
                ("list", "search".to_string()),
                ("srsearch", query.to_string()),
                ("srlimit", max_results.to_string()),
                ("format", "json".to_string()),
            ])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["query"]["search"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, entry)| {
                        let title = entry["title"].as_str()?;
                        let url = format!(
                            "https://en.wikipedia.org/wiki/{}",
                            urlencoding::encode(&title.replace(' ', "_"))
                        );
                        let mut hit =
                            SearchHit::new(title, url, "wikipedia", relevance_for_rank(rank));
                        if let Some(snippet) = entry["snippet"].as_str() {
                            // Snippets da MediaWiki vêm com markup de highlight
                            hit = hit.with_snippet(clean_text(
                                &snippet.replace("<span class=\"searchmatch\">", "")
                                    .replace("</span>", ""),
                            ));
                        }
                        Some(hit)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

// ─────────────────────────────────────────────────
// arXiv
// ─────────────────────────────────────────────────

/// Índice de papers (arXiv Atom API)
pub struct ArxivTool {
    client: reqwest::Client,
}

impl ArxivTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for ArxivTool {
    fn name(&self) -> &str {
        "arxiv"
    }

    fn description(&self) -> &str {
        "arXiv paper index (Atom API)"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("http://export.arxiv.org/api/query")
            .query(&[
                ("search_query", format!("all:{query}")),
                ("max_results", max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SpecialistError::ApiError(status.to_string()));
        }
        let atom = response
            .text()
            .await
            .map_err(|e| SpecialistError::ApiError(format!("invalid body: {e}")))?;

        Ok(parse_arxiv_entries(&atom, max_results))
    }
}

/// Extrai (título, link) das entries de um feed Atom do arXiv
fn parse_arxiv_entries(atom: &str, max_results: usize) -> Vec<SearchHit> {
    let mut hits = Vec::new();

    for (rank, entry) in atom.split("<entry>").skip(1).take(max_results).enumerate() {
        let title = slice_between(entry, "<title>", "</title>")
            .map(clean_text)
            .unwrap_or_default();
        let url = slice_between(entry, "<id>", "</id>").unwrap_or_default();
        if title.is_empty() || url.is_empty() {
            continue;
        }
        let mut hit = SearchHit::new(&title, url.trim(), "arxiv", relevance_for_rank(rank));
        if let Some(summary) = slice_between(entry, "<summary>", "</summary>") {
            let summary = clean_text(summary);
            hit = hit.with_snippet(crate::utils::truncate_bytes(&summary, 400));
        }
        hits.push(hit);
    }

    hits
}

fn slice_between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = haystack[start..].find(close)? + start;
    Some(&haystack[start..end])
}

// ─────────────────────────────────────────────────
// Hacker News (fórum de discussão)
// ─────────────────────────────────────────────────

/// Discussões via Hacker News (Algolia)
pub struct HackerNewsTool {
    client: reqwest::Client,
}

impl HackerNewsTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for HackerNewsTool {
    fn name(&self) -> &str {
        "hackernews"
    }

    fn description(&self) -> &str {
        "Hacker News search (Algolia)"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://hn.algolia.com/api/v1/search")
            .query(&[("query", query.to_string()), ("hitsPerPage", max_results.to_string())])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["hits"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, entry)| {
                        let title = entry["title"].as_str()?;
                        let object_id = entry["objectID"].as_str().unwrap_or_default();
                        let url = entry["url"]
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| {
                                format!("https://news.ycombinator.com/item?id={object_id}")
                            });
                        Some(SearchHit::new(
                            title,
                            url,
                            "hackernews",
                            relevance_for_rank(rank),
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

// ─────────────────────────────────────────────────
// MDN (docs de vendor)
// ─────────────────────────────────────────────────

/// Documentação web via MDN site search
pub struct MdnTool {
    client: reqwest::Client,
}

impl MdnTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for MdnTool {
    fn name(&self) -> &str {
        "mdn"
    }

    fn description(&self) -> &str {
        "MDN Web Docs search"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://developer.mozilla.org/api/v1/search")
            .query(&[("q", query), ("locale", "en-US")])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["documents"]
            .as_array()
            .map(|documents| {
                documents
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, document)| {
                        let title = document["title"].as_str()?;
                        let path = document["mdn_url"].as_str()?;
                        let url = format!("https://developer.mozilla.org{path}");
                        let mut hit = SearchHit::new(title, url, "mdn", relevance_for_rank(rank));
                        if let Some(summary) = document["summary"].as_str() {
                            hit = hit.with_snippet(summary);
                        }
                        Some(hit)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

/// Monta o specialist de documentação
pub fn docs_specialist(fetcher: Arc<ContentFetcher>, client: reqwest::Client) -> Specialist {
    let mut specialist = Specialist::new(SpecialistDomain::Docs, fetcher);
    specialist.register_tool(Arc::new(WikipediaTool::new(client.clone())));
    specialist.register_tool(Arc::new(ArxivTool::new(client.clone())));
    specialist.register_tool(Arc::new(HackerNewsTool::new(client.clone())));
    specialist.register_tool(Arc::new(MdnTool::new(client.clone())));
    specialist.register_tool(Arc::new(SiteRestrictedTool::new(
        "docs-web-fallback",
        Arc::new(SerperTool::new(client)),
        vec!["developer.mozilla.org", "en.wikipedia.org", "arxiv.org"],
    )));
    specialist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docs_specialist_composition() {
        let fetcher = Arc::new(ContentFetcher::new(None));
        let specialist = docs_specialist(fetcher, reqwest::Client::new());
        assert_eq!(specialist.name(), "docs");
        assert_eq!(specialist.tool_count(), 5);
    }

    #[test]
    fn test_parse_arxiv_entries() {
        let atom = r#"<feed>
            <entry>
              <id>http://arxiv.org/abs/2101.00001v1</id>
              <title>Sample Paper About Retrieval</title>
              <summary>A short abstract.</summary>
            </entry>
            <entry>
              <id>http://arxiv.org/abs/2101.00002v1</id>
              <title>Second Paper</title>
            </entry>
        </feed>"#;

        let hits = parse_arxiv_entries(atom, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title, "Sample Paper About Retrieval");
        assert!(hits[0].url.contains("2101.00001"));
        assert!(hits[0].snippet.as_deref().unwrap().contains("abstract"));
        assert!(hits[0].relevance > hits[1].relevance);
    }
}
