// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SPECIALIST WEB
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Busca web geral. Lista de preferência ordenada: Serper, Brave e um
// fallback sem credencial (DuckDuckGo Instant Answers). A primeira
// credencial configurada vence; não-2xx cai para o próximo tool.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{relevance_for_rank, ContentFetcher, SearchTool, Specialist, SpecialistError};
use crate::types::{SearchHit, SpecialistDomain};

fn api_key(var: &str) -> Result<String, SpecialistError> {
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SpecialistError::MissingCredential(var.to_string()))
}

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
// Serper (SERP API)
// ─────────────────────────────────────────────────

/// Busca via Serper (SERP do Google)
pub struct SerperTool {
    client: reqwest::Client,
}

impl SerperTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for SerperTool {
    fn name(&self) -> &str {
        "serper"
    }

    fn description(&self) -> &str {
        "Google SERP via Serper API"
    }

    fn credential(&self) -> Option<&str> {
        Some("SERPER_API_KEY")
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let key = api_key("SERPER_API_KEY")?;
        let response = self
            .client
            .post("https://google.serper.dev/search")
            .header("X-API-KEY", key)
            .json(&json!({"q": query, "num": max_results}))
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["organic"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, entry)| {
                        let url = entry["link"].as_str()?;
                        let title = entry["title"].as_str().unwrap_or(url);
                        let mut hit =
                            SearchHit::new(title, url, "serper", relevance_for_rank(rank));
                        if let Some(snippet) = entry["snippet"].as_str() {
                            hit = hit.with_snippet(snippet);
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
// Brave Search
// ─────────────────────────────────────────────────

/// Busca via Brave Search API
pub struct BraveTool {
    client: reqwest::Client,
}

impl BraveTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for BraveTool {
    fn name(&self) -> &str {
        "brave"
    }

    fn description(&self) -> &str {
        "Brave Search API"
    }

    fn credential(&self) -> Option<&str> {
        Some("BRAVE_API_KEY")
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let key = api_key("BRAVE_API_KEY")?;
        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", key)
            .query(&[("q", query.to_string()), ("count", max_results.to_string())])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["web"]["results"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, entry)| {
                        let url = entry["url"].as_str()?;
                        let title = entry["title"].as_str().unwrap_or(url);
                        let mut hit =
                            SearchHit::new(title, url, "brave", relevance_for_rank(rank));
                        if let Some(description) = entry["description"].as_str() {
                            hit = hit.with_snippet(description);
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
// DuckDuckGo (fallback sem credencial)
// ─────────────────────────────────────────────────

/// Fallback keyless via DuckDuckGo Instant Answers
pub struct DuckDuckGoTool {
    client: reqwest::Client,
}

impl DuckDuckGoTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for DuckDuckGoTool {
    fn name(&self) -> &str {
        "duckduckgo"
    }

    fn description(&self) -> &str {
        "DuckDuckGo Instant Answers (sem credencial)"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[("q", query), ("format", "json"), ("no_html", "1")])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let mut hits = Vec::new();

        if let (Some(url), Some(text)) = (body["AbstractURL"].as_str(), body["AbstractText"].as_str())
        {
            if !url.is_empty() && !text.is_empty() {
                let title = body["Heading"].as_str().unwrap_or(url);
                hits.push(
                    SearchHit::new(title, url, "duckduckgo", relevance_for_rank(0))
                        .with_snippet(text),
                );
            }
        }

        if let Some(topics) = body["RelatedTopics"].as_array() {
            for topic in topics {
                // Grupos aninhados carregam um array "Topics"
                let flat = topic["Topics"].as_array().cloned().unwrap_or_else(|| vec![topic.clone()]);
                for entry in flat {
                    if hits.len() >= max_results {
                        break;
                    }
                    if let (Some(url), Some(text)) =
                        (entry["FirstURL"].as_str(), entry["Text"].as_str())
                    {
                        let rank = hits.len();
                        hits.push(
                            SearchHit::new(text, url, "duckduckgo", relevance_for_rank(rank))
                                .with_snippet(text),
                        );
                    }
                }
                if hits.len() >= max_results {
                    break;
                }
            }
        }

        Ok(hits)
    }
}

// ─────────────────────────────────────────────────
// Fallback restrito a sites (usado por code/docs)
// ─────────────────────────────────────────────────

/// Envelopa um tool de busca geral restringindo a sites relevantes.
///
/// Usado como fallback quando as APIs nativas de um domínio não estão
/// disponíveis.
pub struct SiteRestrictedTool {
    label: String,
    inner: Arc<dyn SearchTool>,
    sites: Vec<&'static str>,
}

impl SiteRestrictedTool {
    /// Cria o fallback sobre um tool interno
    pub fn new(label: &str, inner: Arc<dyn SearchTool>, sites: Vec<&'static str>) -> Self {
        Self {
            label: label.to_string(),
            inner,
            sites,
        }
    }
}

#[async_trait]
impl SearchTool for SiteRestrictedTool {
    fn name(&self) -> &str {
        &self.label
    }

    fn description(&self) -> &str {
        "busca geral restrita a sites do domínio"
    }

    fn credential(&self) -> Option<&str> {
        self.inner.credential()
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let restriction = self
            .sites
            .iter()
            .map(|site| format!("site:{site}"))
            .collect::<Vec<_>>()
            .join(" OR ");
        let restricted = format!("{query} {restriction}");
        self.inner.search(&restricted, max_results).await
    }
}

/// Monta o specialist web com a lista de preferência padrão
pub fn web_specialist(fetcher: Arc<ContentFetcher>, client: reqwest::Client) -> Specialist {
    let mut specialist = Specialist::new(SpecialistDomain::Web, fetcher);
    specialist.register_tool(Arc::new(SerperTool::new(client.clone())));
    specialist.register_tool(Arc::new(BraveTool::new(client.clone())));
    specialist.register_tool(Arc::new(DuckDuckGoTool::new(client)));
    specialist
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::specialist::MockSearchTool;

    #[test]
    fn test_web_specialist_tool_order() {
        let fetcher = Arc::new(ContentFetcher::new(None));
        let specialist = web_specialist(fetcher, reqwest::Client::new());
        assert_eq!(specialist.name(), "web");
        assert_eq!(specialist.tool_count(), 3);
    }

    #[tokio::test]
    async fn test_site_restricted_rewrites_query() {
        // O mock ignora a query, mas o wrapper preserva o contrato do inner
        let inner = Arc::new(MockSearchTool::with_hits(
            "inner",
            vec![SearchHit::new("t", "https://stackoverflow.com/q/1", "inner", 0.9)],
        ));
        let tool = SiteRestrictedTool::new(
            "code-fallback",
            inner,
            vec!["stackoverflow.com", "github.com"],
        );
        assert_eq!(tool.name(), "code-fallback");
        assert!(tool.credential().is_none());

        let hits = tool.search("borrow checker", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }
}
