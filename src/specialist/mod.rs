// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FRAMEWORK DE SPECIALISTS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Um specialist é um executor de busca ligado a um domínio (web/code/docs)
// com uma lista ordenada de tools plugáveis. A seleção de tools é dirigida
// por credencial; um tool que falha é logado e pulado, nunca aborta o
// specialist. Adicionar um backend é registrar um tool.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod code;
mod docs;
mod fetch;
mod web;

pub use code::code_specialist;
pub use docs::docs_specialist;
pub use fetch::ContentFetcher;
pub use web::web_specialist;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::types::{Fragment, SearchHit, SpecialistDomain};
use crate::utils::normalize_url;

/// Erros de um tool de busca
#[derive(Debug, thiserror::Error)]
pub enum SpecialistError {
    /// Resposta não-2xx ou corpo inesperado
    #[error("Search API error: {0}")]
    ApiError(String),

    /// Falha de rede/timeout
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Credencial ausente (tool não deveria ter sido selecionado)
    #[error("Missing credential: {0}")]
    MissingCredential(String),
}

/// Um backend de busca concreto registrado sob um specialist
#[async_trait]
pub trait SearchTool: Send + Sync {
    /// Nome do tool (aparece como `source` nos hits)
    fn name(&self) -> &str;

    /// Descrição legível
    fn description(&self) -> &str;

    /// Nome da env var com a credencial; None ⇒ tool sem credencial
    fn credential(&self) -> Option<&str> {
        None
    }

    /// Executa a busca
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchHit>, SpecialistError>;
}

/// Se a credencial do tool está satisfeita no ambiente
pub fn credential_satisfied(tool: &dyn SearchTool) -> bool {
    match tool.credential() {
        None => true,
        Some(var) => std::env::var(var)
            .map(|v| !v.trim().is_empty())
            .unwrap_or(false),
    }
}

/// Relevância decrescente por posição no ranking do backend
pub fn relevance_for_rank(rank: usize) -> f32 {
    (1.0 - rank as f32 * 0.08).max(0.2)
}

/// Requisição de execução de um specialist
#[derive(Debug, Clone)]
pub struct SpecialistRequest {
    /// Query a buscar
    pub query: String,
    /// Máximo de resultados agregados
    pub max_results: usize,
    /// Quantos top resultados recebem scrape
    pub scrape_top: usize,
    /// Budget total de scraping (dividido por URL)
    pub timeout_ms: u64,
}

impl Default for SpecialistRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            max_results: 8,
            scrape_top: 3,
            timeout_ms: 30_000,
        }
    }
}

/// Executor de busca de um domínio, com tools plugáveis e scrape de conteúdo
pub struct Specialist {
    name: String,
    domain: SpecialistDomain,
    tools: Vec<Arc<dyn SearchTool>>,
    fetcher: Arc<ContentFetcher>,
}

impl Specialist {
    /// Cria um specialist vazio para um domínio
    pub fn new(domain: SpecialistDomain, fetcher: Arc<ContentFetcher>) -> Self {
        Self {
            name: domain.as_str().to_string(),
            domain,
            tools: Vec::new(),
            fetcher,
        }
    }

    /// Registra um tool (ordem de registro = ordem de preferência)
    pub fn register_tool(&mut self, tool: Arc<dyn SearchTool>) {
        log::debug!("specialist {}: tool {} registrado", self.name, tool.name());
        self.tools.push(tool);
    }

    /// Nome do specialist (label do domínio)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Domínio do specialist
    pub fn domain(&self) -> SpecialistDomain {
        self.domain
    }

    /// Tools atualmente registrados
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// Executa a busca do specialist:
    ///
    /// 1. Seleciona tools com credencial satisfeita, em ordem de registro.
    /// 2. Invoca cada tool até juntar `max_results` ou esgotar os tools;
    ///    tool que falha é logado e pulado.
    /// 3. Normaliza e deduplica por URL (case-insensitive, trailing slash
    ///    removido), preservando a ordem de primeira ocorrência.
    /// 4. Faz scrape dos top `scrape_top` com timeout por URL de
    ///    `timeout_ms / scrape_top`; hits de cache não fazem fetch; falhas
    ///    individuais são ignoradas.
    ///
    /// Zero tools credenciados ⇒ fragment vazio, sem erro.
    pub async fn execute(&self, request: &SpecialistRequest) -> Fragment {
        let mut results: Vec<SearchHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        for tool in self.tools.iter().filter(|t| credential_satisfied(t.as_ref())) {
            if results.len() >= request.max_results {
                break;
            }
            let remaining = request.max_results - results.len();

            match tool.search(&request.query, remaining).await {
                Ok(hits) => {
                    for hit in hits {
                        let key = normalize_url(&hit.url);
                        if key.is_empty() || !seen.insert(key) {
                            continue;
                        }
                        results.push(hit);
                        if results.len() >= request.max_results {
                            break;
                        }
                    }
                }
                Err(e) => {
                    log::warn!("⚠️ specialist {}: tool {} falhou: {}", self.name, tool.name(), e);
                }
            }
        }

        let mut scraped = Vec::new();
        if request.scrape_top > 0 && !results.is_empty() {
            let per_url = Duration::from_millis(
                request.timeout_ms / request.scrape_top.max(1) as u64,
            );
            for hit in results.iter().take(request.scrape_top) {
                if let Some(page) = self.fetcher.fetch(&hit.url, per_url).await {
                    scraped.push(page);
                }
            }
        }

        log::debug!(
            "specialist {}: {} resultados, {} páginas extraídas",
            self.name,
            results.len(),
            scraped.len()
        );

        Fragment {
            specialist: self.name.clone(),
            results,
            scraped,
            timestamp: chrono::Utc::now(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TOOL MOCK PARA TESTES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool mock com hits fixos (e modo de falha) para testes
#[derive(Debug, Default)]
pub struct MockSearchTool {
    /// Nome reportado
    pub tool_name: String,
    /// Hits retornados por busca
    pub hits: Vec<SearchHit>,
    /// Env var de credencial exigida
    pub credential_var: Option<String>,
    /// Se `search` deve falhar
    pub fail: bool,
}

impl MockSearchTool {
    /// Mock sem credencial que retorna os hits dados
    pub fn with_hits(name: &str, hits: Vec<SearchHit>) -> Self {
        Self {
            tool_name: name.to_string(),
            hits,
            credential_var: None,
            fail: false,
        }
    }

    /// Mock que sempre falha
    pub fn failing(name: &str) -> Self {
        Self {
            tool_name: name.to_string(),
            fail: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl SearchTool for MockSearchTool {
    fn name(&self) -> &str {
        &self.tool_name
    }

    fn description(&self) -> &str {
        "mock search tool"
    }

    fn credential(&self) -> Option<&str> {
        self.credential_var.as_deref()
    }

    async fn search(
        &self,
        _query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SpecialistError> {
        if self.fail {
            return Err(SpecialistError::ApiError("mock failure".to_string()));
        }
        Ok(self.hits.iter().take(max_results).cloned().collect())
    }
}
