// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RESEARCH CREW - SERVIÇO DE PESQUISA AUTÔNOMA
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Serviço de pesquisa autônoma para um assistente de código. Sessões
// interativas alimentam eventos de conversa; o serviço decide quando
// pesquisar (watcher), despacha specialists de busca em paralelo (crew),
// itera até ficar confiante (coordinator), persiste findings (store
// embedded + índice vetorial) e espelha os de alta qualidade para a
// memória externa (bridge).
//
// Componentes:
// 1. SessionTracker - contexto rolante por sessão
// 2. Watcher        - gatilhos autônomos com cooldown e budget/hora
// 3. Crew           - loop plan → dispatch → evaluate → synthesize
// 4. Specialists    - backends de busca plugáveis (web/code/docs)
// 5. TaskQueue      - execução em background com prioridade e retry
// 6. Store          - SQLite embedded (findings, tasks, caches, ledger)
// 7. MemoryBridge   - write-through com gates de qualidade
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod assessor;
pub mod config;
pub mod coordinator;
pub mod crew;
pub mod events;
pub mod llm;
pub mod memory_bridge;
pub mod persistence;
pub mod queue;
#[cfg(feature = "server")]
#[allow(missing_docs)]
pub mod server;
pub mod service;
pub mod session;
pub mod specialist;
pub mod types;
pub mod utils;
pub mod watcher;

pub use service::ResearchService;
pub use types::*;

/// Versão da biblioteca
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude com imports comuns
pub mod prelude {
    pub use crate::config::ServiceConfig;
    pub use crate::crew::{Crew, CrewError};
    pub use crate::events::{EventBus, ServiceEvent};
    pub use crate::llm::{LlmClient, MockLlmClient, QueryOptions};
    pub use crate::memory_bridge::{MemoryBridge, MemorySink};
    pub use crate::persistence::{SemanticIndex, Store};
    pub use crate::queue::{EnqueueRequest, TaskQueue};
    pub use crate::service::ResearchService;
    pub use crate::session::SessionTracker;
    pub use crate::specialist::{SearchTool, Specialist, SpecialistRequest};
    pub use crate::types::*;
    pub use crate::watcher::Watcher;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
