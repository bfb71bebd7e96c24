// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CONFIGURAÇÃO DO SERVIÇO
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Configuração por subsistema, carregada de variáveis de ambiente (.env
// suportado via dotenvy no binário). Parsing permissivo: valores inválidos
// caem no default com warning, nunca panic.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::str::FromStr;

/// Lê uma variável numérica do ambiente com fallback para default
fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("⚠️ {}={:?} inválido, usando default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Lê uma variável booleana ("true"/"1"/"yes" ⇒ true)
fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => matches!(raw.trim().to_lowercase().as_str(), "true" | "1" | "yes" | "on"),
        Err(_) => default,
    }
}

/// Lê uma variável textual opcional (vazia ⇒ None)
fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

// ─────────────────────────────────────────────────
// Watcher / pesquisa autônoma
// ─────────────────────────────────────────────────

/// Configuração do watcher (gatilhos autônomos)
#[derive(Debug, Clone)]
pub struct ResearchConfig {
    /// Master switch da pesquisa autônoma
    pub autonomous_enabled: bool,
    /// Threshold base de confiança para aceitar uma decisão (padrão 0.6)
    pub confidence_threshold: f32,
    /// Intervalo mínimo entre gatilhos por sessão (ms)
    pub session_cooldown_ms: u64,
    /// Teto global de pesquisas autônomas por hora
    pub max_research_per_hour: u32,
    /// Janela de deduplicação de queries recentes (ms)
    pub dedup_window_ms: u64,
    /// Threshold de similaridade vetorial para deduplicação (padrão 0.80)
    pub dedup_similarity_threshold: f32,
}

impl Default for ResearchConfig {
    fn default() -> Self {
        Self {
            autonomous_enabled: true,
            confidence_threshold: 0.6,
            session_cooldown_ms: 5 * 60 * 1000,
            max_research_per_hour: 10,
            dedup_window_ms: 30 * 60 * 1000,
            dedup_similarity_threshold: 0.80,
        }
    }
}

impl ResearchConfig {
    /// Carrega do ambiente:
    /// - `RESEARCH_AUTONOMOUS_ENABLED`
    /// - `RESEARCH_CONFIDENCE_THRESHOLD`
    /// - `RESEARCH_SESSION_COOLDOWN_MS`
    /// - `RESEARCH_MAX_PER_HOUR`
    /// - `RESEARCH_DEDUP_WINDOW_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            autonomous_enabled: env_bool("RESEARCH_AUTONOMOUS_ENABLED", defaults.autonomous_enabled),
            confidence_threshold: env_parse(
                "RESEARCH_CONFIDENCE_THRESHOLD",
                defaults.confidence_threshold,
            )
            .clamp(0.0, 1.0),
            session_cooldown_ms: env_parse("RESEARCH_SESSION_COOLDOWN_MS", defaults.session_cooldown_ms),
            max_research_per_hour: env_parse("RESEARCH_MAX_PER_HOUR", defaults.max_research_per_hour),
            dedup_window_ms: env_parse("RESEARCH_DEDUP_WINDOW_MS", defaults.dedup_window_ms),
            dedup_similarity_threshold: env_parse(
                "RESEARCH_DEDUP_SIMILARITY",
                defaults.dedup_similarity_threshold,
            )
            .clamp(0.0, 1.0),
        }
    }
}

// ─────────────────────────────────────────────────
// Fila de tasks
// ─────────────────────────────────────────────────

/// Configuração da fila de pesquisa em background
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Máximo de tasks `running` simultâneas
    pub max_concurrent: usize,
    /// Máximo de tasks `queued`
    pub max_queue_size: usize,
    /// Deadline wall-clock por task (ms)
    pub task_timeout_ms: u64,
    /// Tentativas por task antes de `failed`
    pub retry_attempts: u32,
    /// Intervalo do tick do scheduler (ms)
    pub tick_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: std::cmp::min(4, num_cpus::get()),
            max_queue_size: 50,
            task_timeout_ms: 5 * 60 * 1000,
            retry_attempts: 2,
            tick_interval_ms: 2000,
        }
    }
}

impl QueueConfig {
    /// Carrega do ambiente:
    /// - `QUEUE_MAX_CONCURRENT`
    /// - `QUEUE_MAX_SIZE`
    /// - `QUEUE_TASK_TIMEOUT_MS`
    /// - `QUEUE_RETRY_ATTEMPTS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent: env_parse("QUEUE_MAX_CONCURRENT", defaults.max_concurrent).max(1),
            max_queue_size: env_parse("QUEUE_MAX_SIZE", defaults.max_queue_size).max(1),
            task_timeout_ms: env_parse("QUEUE_TASK_TIMEOUT_MS", defaults.task_timeout_ms),
            retry_attempts: env_parse("QUEUE_RETRY_ATTEMPTS", defaults.retry_attempts),
            tick_interval_ms: defaults.tick_interval_ms,
        }
    }
}

// ─────────────────────────────────────────────────
// Crew
// ─────────────────────────────────────────────────

/// Configuração do loop iterativo do crew
#[derive(Debug, Clone)]
pub struct CrewConfig {
    /// Dispatch paralelo de specialists (padrão); false ⇒ sequencial por prioridade
    pub parallel_specialists: bool,
    /// Budget de iterações quando nem `max_iterations` nem depth são dados
    pub default_max_iterations: u32,
    /// Iterações para `quick`
    pub quick_iterations: u32,
    /// Iterações para `medium`
    pub medium_iterations: u32,
    /// Iterações para `deep`
    pub deep_iterations: u32,
    /// Resultados por specialist por iteração
    pub max_results: usize,
    /// Quantos top resultados recebem scrape de conteúdo
    pub scrape_top: usize,
    /// Timeout total de um specialist por iteração (ms)
    pub specialist_timeout_ms: u64,
}

impl Default for CrewConfig {
    fn default() -> Self {
        Self {
            parallel_specialists: true,
            default_max_iterations: 5,
            quick_iterations: 1,
            medium_iterations: 2,
            deep_iterations: 4,
            max_results: 8,
            scrape_top: 3,
            specialist_timeout_ms: 30_000,
        }
    }
}

impl CrewConfig {
    /// Carrega do ambiente:
    /// - `CREW_PARALLEL_SPECIALISTS`
    /// - `CREW_DEFAULT_MAX_ITERATIONS`
    /// - `CREW_SCRAPE_TOP`
    /// - `CREW_SPECIALIST_TIMEOUT_MS`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            parallel_specialists: env_bool("CREW_PARALLEL_SPECIALISTS", defaults.parallel_specialists),
            default_max_iterations: env_parse(
                "CREW_DEFAULT_MAX_ITERATIONS",
                defaults.default_max_iterations,
            ),
            quick_iterations: defaults.quick_iterations,
            medium_iterations: defaults.medium_iterations,
            deep_iterations: defaults.deep_iterations,
            max_results: env_parse("CREW_MAX_RESULTS", defaults.max_results).max(1),
            scrape_top: env_parse("CREW_SCRAPE_TOP", defaults.scrape_top),
            specialist_timeout_ms: env_parse(
                "CREW_SPECIALIST_TIMEOUT_MS",
                defaults.specialist_timeout_ms,
            ),
        }
    }

    /// Resolve o budget de iterações para um depth
    pub fn iterations_for(&self, depth: crate::types::Depth) -> u32 {
        match depth {
            crate::types::Depth::Quick => self.quick_iterations,
            crate::types::Depth::Medium => self.medium_iterations,
            crate::types::Depth::Deep => self.deep_iterations,
        }
    }
}

// ─────────────────────────────────────────────────
// Session tracker
// ─────────────────────────────────────────────────

/// Configuração do tracker de sessões
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Tamanho do ring de eventos por sessão
    pub max_events: usize,
    /// Máximo de erros capturados por sessão
    pub max_errors: usize,
    /// Máximo de entradas de histórico de pesquisa por sessão
    pub max_history: usize,
    /// TTL de inatividade para pruning (ms)
    pub idle_ttl_ms: u64,
    /// Sequências consecutivas de tool-calls no mesmo foco ⇒ stuck
    pub stuck_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_events: 100,
            max_errors: 20,
            max_history: 50,
            idle_ttl_ms: 2 * 60 * 60 * 1000,
            stuck_threshold: 2,
        }
    }
}

impl SessionConfig {
    /// Carrega do ambiente (`SESSION_MAX_EVENTS`, `SESSION_IDLE_TTL_MS`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_events: env_parse("SESSION_MAX_EVENTS", defaults.max_events).max(1),
            max_errors: defaults.max_errors,
            max_history: defaults.max_history,
            idle_ttl_ms: env_parse("SESSION_IDLE_TTL_MS", defaults.idle_ttl_ms),
            stuck_threshold: env_parse("SESSION_STUCK_THRESHOLD", defaults.stuck_threshold).max(1),
        }
    }
}

// ─────────────────────────────────────────────────
// Cache de URLs
// ─────────────────────────────────────────────────

/// Configuração do cache de conteúdo de URLs
#[derive(Debug, Clone)]
pub struct UrlCacheConfig {
    /// TTL das entradas (ms)
    pub ttl_ms: u64,
    /// Teto de bytes de conteúdo cacheado (eviction LRU por last-access)
    pub max_bytes: u64,
}

impl Default for UrlCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 24 * 60 * 60 * 1000,
            max_bytes: 16 * 1024 * 1024,
        }
    }
}

impl UrlCacheConfig {
    /// Carrega do ambiente (`URL_CACHE_TTL_MS`, `URL_CACHE_MAX_BYTES`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ttl_ms: env_parse("URL_CACHE_TTL_MS", defaults.ttl_ms),
            max_bytes: env_parse("URL_CACHE_MAX_BYTES", defaults.max_bytes),
        }
    }
}

// ─────────────────────────────────────────────────
// Gateway LLM
// ─────────────────────────────────────────────────

/// Configuração do gateway LLM (endpoint compatível com Chat Completions)
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL do provedor
    pub base_url: String,
    /// Modelo para decisões/planejamento/síntese
    pub model: String,
    /// Modelo de embeddings (vector index); vazio ⇒ modo keyword-only
    pub embedding_model: Option<String>,
    /// Nome da env var com a credencial
    pub api_key_env: String,
    /// Timeout por chamada (ms)
    pub request_timeout_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            embedding_model: Some("text-embedding-3-small".to_string()),
            api_key_env: "OPENAI_API_KEY".to_string(),
            request_timeout_ms: 60_000,
        }
    }
}

impl LlmConfig {
    /// Carrega do ambiente (`LLM_BASE_URL`, `LLM_MODEL`, `LLM_EMBEDDING_MODEL`,
    /// `LLM_API_KEY_ENV`, `LLM_TIMEOUT_MS`)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: env_string("LLM_BASE_URL").unwrap_or(defaults.base_url),
            model: env_string("LLM_MODEL").unwrap_or(defaults.model),
            embedding_model: match env_string("LLM_EMBEDDING_MODEL") {
                Some(value) if value.eq_ignore_ascii_case("none") => None,
                Some(value) => Some(value),
                None => defaults.embedding_model,
            },
            api_key_env: env_string("LLM_API_KEY_ENV").unwrap_or(defaults.api_key_env),
            request_timeout_ms: env_parse("LLM_TIMEOUT_MS", defaults.request_timeout_ms),
        }
    }

    /// Resolve a credencial no ambiente
    pub fn api_key(&self) -> Option<String> {
        env_string(&self.api_key_env)
    }
}

// ─────────────────────────────────────────────────
// Configuração agregada
// ─────────────────────────────────────────────────

/// Configuração completa do serviço
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Watcher / pesquisa autônoma
    pub research: ResearchConfig,
    /// Fila de tasks
    pub queue: QueueConfig,
    /// Crew
    pub crew: CrewConfig,
    /// Sessões
    pub session: SessionConfig,
    /// Cache de URLs
    pub url_cache: UrlCacheConfig,
    /// Gateway LLM
    pub llm: LlmConfig,
    /// Caminho do banco embedded (`:memory:` em testes)
    pub db_path: String,
    /// Caminho do sink de memória externa (JSONL); None ⇒ bridge desativado
    pub memory_sink_path: Option<String>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            research: ResearchConfig::default(),
            queue: QueueConfig::default(),
            crew: CrewConfig::default(),
            session: SessionConfig::default(),
            url_cache: UrlCacheConfig::default(),
            llm: LlmConfig::default(),
            db_path: "research-crew.db".to_string(),
            memory_sink_path: None,
        }
    }
}

impl ServiceConfig {
    /// Carrega a configuração completa do ambiente
    pub fn from_env() -> Self {
        Self {
            research: ResearchConfig::from_env(),
            queue: QueueConfig::from_env(),
            crew: CrewConfig::from_env(),
            session: SessionConfig::from_env(),
            url_cache: UrlCacheConfig::from_env(),
            llm: LlmConfig::from_env(),
            db_path: env_string("RESEARCH_DB_PATH").unwrap_or_else(|| "research-crew.db".to_string()),
            memory_sink_path: env_string("MEMORY_SINK_PATH"),
        }
    }

    /// Configuração para testes: banco em memória, cooldowns curtos
    pub fn for_tests() -> Self {
        let mut config = Self::default();
        config.db_path = ":memory:".to_string();
        config.queue.tick_interval_ms = 20;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Depth;

    #[test]
    fn test_research_config_defaults() {
        let config = ResearchConfig::default();
        assert!(config.autonomous_enabled);
        assert_eq!(config.confidence_threshold, 0.6);
        assert_eq!(config.dedup_similarity_threshold, 0.80);
    }

    #[test]
    fn test_crew_iterations_for_depth() {
        let config = CrewConfig::default();
        assert_eq!(config.iterations_for(Depth::Quick), 1);
        assert_eq!(config.iterations_for(Depth::Medium), 2);
        assert_eq!(config.iterations_for(Depth::Deep), 4);
        assert_eq!(config.default_max_iterations, 5);
    }

    #[test]
    fn test_queue_defaults_bounded() {
        let config = QueueConfig::default();
        assert!(config.max_concurrent >= 1);
        assert_eq!(config.tick_interval_ms, 2000);
    }

    #[test]
    fn test_env_parse_invalid_falls_back() {
        std::env::set_var("TEST_ENV_PARSE_FALLBACK", "not-a-number");
        assert_eq!(env_parse("TEST_ENV_PARSE_FALLBACK", 7u32), 7);
        std::env::remove_var("TEST_ENV_PARSE_FALLBACK");
    }

    #[test]
    fn test_service_config_for_tests() {
        let config = ServiceConfig::for_tests();
        assert_eq!(config.db_path, ":memory:");
    }
}
