// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SPECIALIST CODE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Busca orientada a código: repositórios (GitHub), Q&A de programação
// (Stack Exchange) e dois registries de pacotes (crates.io, npm), com
// fallback de busca geral restrita a sites relevantes.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::web::{SerperTool, SiteRestrictedTool};
use super::{relevance_for_rank, ContentFetcher, SearchTool, Specialist, SpecialistError};
use crate::types::{SearchHit, SpecialistDomain};

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
// GitHub (repositórios)
// ─────────────────────────────────────────────────

/// Busca de repositórios no GitHub. Funciona sem token (rate limit
/// reduzido); `GITHUB_TOKEN` é usado quando presente.
pub struct GitHubTool {
    client: reqwest::Client,
}

impl GitHubTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for GitHubTool {
    fn name(&self) -> &str {
        "github"
    }

    fn description(&self) -> &str {
        "GitHub repository search"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let mut request = self
            .client
            .get("https://api.github.com/search/repositories")
            .header("Accept", "application/vnd.github+json")
            .query(&[("q", query.to_string()), ("per_page", max_results.to_string())]);

        if let Ok(token) = std::env::var("GITHUB_TOKEN") {
            if !token.trim().is_empty() {
                request = request.bearer_auth(token);
            }
        }

        let response = request
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, item)| {
                        let url = item["html_url"].as_str()?;
                        let title = item["full_name"].as_str().unwrap_or(url);
                        let mut hit =
                            SearchHit::new(title, url, "github", relevance_for_rank(rank));
                        if let Some(description) = item["description"].as_str() {
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
// Stack Exchange (Q&A)
// ─────────────────────────────────────────────────

/// Q&A de programação via Stack Exchange API (site stackoverflow)
pub struct StackExchangeTool {
    client: reqwest::Client,
}

impl StackExchangeTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for StackExchangeTool {
    fn name(&self) -> &str {
        "stackexchange"
    }

    fn description(&self) -> &str {
        "Stack Overflow search via Stack Exchange API"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://api.stackexchange.com/2.3/search/advanced")
            .query(&[
                ("order", "desc".to_string()),
                ("sort", "relevance".to_string()),
                ("q", query.to_string()),
                ("site", "stackoverflow".to_string()),
                ("pagesize", max_results.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["items"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, item)| {
                        let url = item["link"].as_str()?;
                        let title = item["title"].as_str().unwrap_or(url);
                        let answered = item["is_answered"].as_bool().unwrap_or(false);
                        let boost = if answered { 0.05 } else { 0.0 };
                        Some(SearchHit::new(
                            title,
                            url,
                            "stackexchange",
                            relevance_for_rank(rank) + boost,
                        ))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(hits)
    }
}

// ─────────────────────────────────────────────────
// Registries de pacotes
// ─────────────────────────────────────────────────

/// Registry de crates (crates.io)
pub struct CratesIoTool {
    client: reqwest::Client,
}

impl CratesIoTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for CratesIoTool {
    fn name(&self) -> &str {
        "crates-io"
    }

    fn description(&self) -> &str {
        "crates.io registry search"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://crates.io/api/v1/crates")
            .query(&[("q", query.to_string()), ("per_page", max_results.to_string())])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["crates"]
            .as_array()
            .map(|crates| {
                crates
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, entry)| {
                        let name = entry["name"].as_str()?;
                        let url = format!("https://crates.io/crates/{name}");
                        let mut hit =
                            SearchHit::new(name, url, "crates-io", relevance_for_rank(rank));
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

/// Registry npm
pub struct NpmRegistryTool {
    client: reqwest::Client,
}

impl NpmRegistryTool {
    /// Cria o tool com um client compartilhado
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SearchTool for NpmRegistryTool {
    fn name(&self) -> &str {
        "npm"
    }

    fn description(&self) -> &str {
        "npm registry search"
    }

    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        let response = self
            .client
            .get("https://registry.npmjs.org/-/v1/search")
            .query(&[("text", query.to_string()), ("size", max_results.to_string())])
            .send()
            .await
            .map_err(|e| SpecialistError::NetworkError(e.to_string()))?;

        let body = read_json(response).await?;
        let hits = body["objects"]
            .as_array()
            .map(|objects| {
                objects
                    .iter()
                    .take(max_results)
                    .enumerate()
                    .filter_map(|(rank, object)| {
                        let package = &object["package"];
                        let name = package["name"].as_str()?;
                        let url = package["links"]["npm"]
                            .as_str()
                            .map(str::to_string)
                            .unwrap_or_else(|| format!("https://www.npmjs.com/package/{name}"));
                        let mut hit = SearchHit::new(name, url, "npm", relevance_for_rank(rank));
                        if let Some(description) = package["description"].as_str() {
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

/// Monta o specialist de código: APIs nativas primeiro, fallback geral
/// restrito a sites de código por último
pub fn code_specialist(fetcher: Arc<ContentFetcher>, client: reqwest::Client) -> Specialist {
    let mut specialist = Specialist::new(SpecialistDomain::Code, fetcher);
    specialist.register_tool(Arc::new(GitHubTool::new(client.clone())));
    specialist.register_tool(Arc::new(StackExchangeTool::new(client.clone())));
    specialist.register_tool(Arc::new(CratesIoTool::new(client.clone())));
    specialist.register_tool(Arc::new(NpmRegistryTool::new(client.clone())));
    specialist.register_tool(Arc::new(SiteRestrictedTool::new(
        "code-web-fallback",
        Arc::new(SerperTool::new(client)),
        vec!["github.com", "stackoverflow.com", "docs.rs"],
    )));
    specialist
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_specialist_composition() {
        let fetcher = Arc::new(ContentFetcher::new(None));
        let specialist = code_specialist(fetcher, reqwest::Client::new());
        assert_eq!(specialist.name(), "code");
        // 4 APIs nativas + fallback restrito a sites
        assert_eq!(specialist.tool_count(), 5);
    }
}
