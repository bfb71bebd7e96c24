// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SERVICE - FACHADA E SINGLETONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Amarra todos os componentes (store, índice, tracker, watcher, crew, fila,
// assessor, bridge) e expõe o ingest de eventos de hook e a pesquisa
// explícita. A instância global usa inicialização lazy concorrência-segura;
// `shutdown()` libera os handles externos.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OnceCell;

use crate::assessor::SourceAssessor;
use crate::config::ServiceConfig;
use crate::coordinator::Coordinator;
use crate::crew::{Crew, CrewError};
use crate::events::EventBus;
use crate::llm::{HttpLlmClient, LlmClient, LlmError, MockLlmClient};
use crate::memory_bridge::{JsonlMemorySink, MemoryBridge, MemorySink};
use crate::persistence::{SemanticIndex, Store};
use crate::queue::{EnqueueRequest, QueueError, TaskQueue};
use crate::session::SessionTracker;
use crate::specialist::{code_specialist, docs_specialist, web_specialist, ContentFetcher, Specialist};
use crate::types::{
    Decision, ResearchDirective, ResearchResult, SessionEvent, SessionEventKind, Task, TriggerKind,
};
use crate::watcher::Watcher;

static GLOBAL: OnceCell<Arc<ResearchService>> = OnceCell::const_new();

/// Fachada do serviço de pesquisa autônoma
pub struct ResearchService {
    /// Configuração efetiva
    pub config: ServiceConfig,
    /// Store embedded
    pub store: Arc<Store>,
    /// Índice semântico
    pub index: Arc<SemanticIndex>,
    /// Tracker de sessões
    pub tracker: Arc<SessionTracker>,
    /// Watcher de gatilhos autônomos
    pub watcher: Arc<Watcher>,
    /// Crew de pesquisa
    pub crew: Arc<Crew>,
    /// Fila de tasks
    pub queue: Arc<TaskQueue>,
    /// Assessor de fontes
    pub assessor: Arc<SourceAssessor>,
    /// Bridge de memória externa
    pub bridge: Arc<MemoryBridge>,
    /// Bus de eventos
    pub events: EventBus,
}

/// Resolve o gateway LLM: HTTP quando a credencial existe, mock caso
/// contrário (modo degradado, os fallbacks dos componentes assumem)
pub fn build_llm(config: &ServiceConfig) -> Arc<dyn LlmClient> {
    match HttpLlmClient::new(config.llm.clone()) {
        Ok(client) => Arc::new(client),
        Err(LlmError::MissingCredential(var)) => {
            log::warn!("⚠️ Credencial {var} ausente, gateway LLM em modo mock");
            Arc::new(MockLlmClient::without_embeddings())
        }
        Err(e) => {
            log::warn!("⚠️ Gateway LLM indisponível ({e}), usando mock");
            Arc::new(MockLlmClient::without_embeddings())
        }
    }
}

impl ResearchService {
    /// Inicializa o serviço completo com os specialists padrão (web, code,
    /// docs) e a fila ligada.
    pub async fn init(
        config: ServiceConfig,
        llm: Arc<dyn LlmClient>,
    ) -> anyhow::Result<Arc<Self>> {
        let store = Arc::new(Store::open(&config.db_path, config.url_cache.clone()).await?);

        let fetcher = Arc::new(ContentFetcher::new(Some(Arc::clone(&store))));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(15_000))
            .user_agent("research-crew/0.1")
            .build()?;

        let specialists = vec![
            web_specialist(Arc::clone(&fetcher), client.clone()),
            code_specialist(Arc::clone(&fetcher), client.clone()),
            docs_specialist(Arc::clone(&fetcher), client),
        ];

        Self::init_with_specialists(config, llm, store, specialists).await
    }

    /// Inicializa o serviço com store e specialists fornecidos (testes e
    /// composições customizadas)
    pub async fn init_with_specialists(
        config: ServiceConfig,
        llm: Arc<dyn LlmClient>,
        store: Arc<Store>,
        specialists: Vec<Specialist>,
    ) -> anyhow::Result<Arc<Self>> {
        let events = EventBus::new();
        let index = Arc::new(SemanticIndex::new(Arc::clone(&store), Some(Arc::clone(&llm))));
        let tracker = Arc::new(SessionTracker::new(config.session.clone()));

        let sink: Option<Arc<dyn MemorySink>> = config
            .memory_sink_path
            .as_ref()
            .map(|path| Arc::new(JsonlMemorySink::new(path)) as Arc<dyn MemorySink>);
        let bridge = Arc::new(MemoryBridge::new(Arc::clone(&store), sink));

        let crew = Arc::new(Crew::new(
            Coordinator::new(Arc::clone(&llm)),
            specialists,
            Arc::clone(&store),
            Arc::clone(&index),
            Arc::clone(&bridge),
            events.clone(),
            config.crew.clone(),
        ));

        let watcher = Arc::new(Watcher::new(
            config.research.clone(),
            Arc::clone(&llm),
            Arc::clone(&tracker),
            Arc::clone(&store),
            Arc::clone(&index),
            events.clone(),
        ));

        let queue = Arc::new(TaskQueue::new(
            config.queue.clone(),
            Arc::clone(&store),
            Arc::clone(&crew),
            events.clone(),
        ));
        Arc::clone(&queue).start();

        let assessor = Arc::new(SourceAssessor::new(Arc::clone(&store)));

        log::info!("🚀 Research service inicializado (db: {})", config.db_path);

        Ok(Arc::new(Self {
            config,
            store,
            index,
            tracker,
            watcher,
            crew,
            queue,
            assessor,
            bridge,
            events,
        }))
    }

    /// Instância global com inicialização lazy (configuração do ambiente).
    /// Chamadas concorrentes inicializam no máximo uma vez.
    pub async fn global() -> anyhow::Result<Arc<Self>> {
        GLOBAL
            .get_or_try_init(|| async {
                let config = ServiceConfig::from_env();
                let llm = build_llm(&config);
                Self::init(config, llm).await
            })
            .await
            .cloned()
    }

    /// Ingresso de um evento de hook: alimenta o tracker e consulta o
    /// watcher. Decisões positivas enfileiram uma task em background.
    pub async fn ingest_event(
        &self,
        session_id: &str,
        trigger: TriggerKind,
        payload: &str,
    ) -> Decision {
        let kind = match trigger {
            TriggerKind::UserPrompt => SessionEventKind::UserPrompt,
            TriggerKind::ToolOutput => SessionEventKind::ToolOutput,
        };
        self.tracker
            .ingest(session_id, SessionEvent::now(kind, payload));

        let decision = self.watcher.analyze(session_id, trigger).await;

        if decision.should_research {
            if let Some(query) = decision.query.clone() {
                let request = EnqueueRequest {
                    query,
                    context: None,
                    depth: crate::types::Depth::Medium,
                    trigger: "watcher".to_string(),
                    session_id: Some(session_id.to_string()),
                    priority: Some(i64::from(decision.priority)),
                };
                if let Err(e) = self.queue.enqueue(request).await {
                    log::warn!("⚠️ Task do watcher não enfileirada: {e}");
                }
            }
        }

        decision
    }

    /// Pesquisa explícita em background (entra pela fila)
    pub async fn research(&self, request: EnqueueRequest) -> Result<Task, QueueError> {
        self.queue.enqueue(request).await
    }

    /// Pesquisa explícita síncrona (entra direto no crew, sem fila)
    pub async fn explore(&self, directive: ResearchDirective) -> Result<ResearchResult, CrewError> {
        self.crew.explore(directive).await
    }

    /// Remove sessões ociosas além do TTL configurado
    pub fn prune_sessions(&self) -> usize {
        self.tracker.prune_inactive(self.config.session.idle_ttl_ms)
    }

    /// Desliga o serviço: para o scheduler da fila. O store fecha no drop.
    pub fn shutdown(&self) {
        self.queue.stop();
        log::info!("🛑 Research service desligado");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlCacheConfig;
    use crate::specialist::MockSearchTool;
    use crate::types::{SearchHit, SpecialistDomain};

    async fn service_with_mocks() -> (Arc<ResearchService>, Arc<MockLlmClient>) {
        let mut config = ServiceConfig::for_tests();
        config.crew.scrape_top = 0;
        let llm = Arc::new(MockLlmClient::new());
        let store = Arc::new(
            Store::open(":memory:", UrlCacheConfig::default())
                .await
                .unwrap(),
        );

        let fetcher = Arc::new(ContentFetcher::new(None));
        let mut web = Specialist::new(SpecialistDomain::Web, fetcher);
        web.register_tool(Arc::new(MockSearchTool::with_hits(
            "mock-web",
            vec![SearchHit::new("R", "https://r.example", "mock-web", 0.9)],
        )));

        let service = ResearchService::init_with_specialists(
            config,
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            store,
            vec![web],
        )
        .await
        .unwrap();

        (service, llm)
    }

    #[tokio::test]
    async fn test_user_prompt_event_never_enqueues() {
        let (service, llm) = service_with_mocks().await;
        llm.push_reply("{\"shouldResearch\": true, \"query\": \"q\", \"confidence\": 0.99}");

        let decision = service
            .ingest_event("s1", TriggerKind::UserPrompt, "how do I use tokio?")
            .await;
        assert!(!decision.should_research);

        let stats = service.store.get_queue_stats().await.unwrap();
        assert_eq!(stats.queued, 0);
        service.shutdown();
    }

    #[tokio::test]
    async fn test_tool_output_trigger_enqueues_task() {
        let (service, llm) = service_with_mocks().await;
        llm.push_reply(
            "{\"shouldResearch\": true, \"query\": \"fix connection reset tokio\", \
             \"researchType\": \"error\", \"confidence\": 0.9, \"priority\": 7, \
             \"reason\": \"recurring error\"}",
        );

        let decision = service
            .ingest_event(
                "s1",
                TriggerKind::ToolOutput,
                "error: connection reset by peer",
            )
            .await;
        assert!(decision.should_research);

        let tasks = service.store.get_recent_tasks(5).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].trigger, "watcher");
        assert_eq!(tasks[0].session_id.as_deref(), Some("s1"));
        service.shutdown();
    }

    #[tokio::test]
    async fn test_shutdown_stops_queue() {
        let (service, _llm) = service_with_mocks().await;
        service.shutdown();
        assert_eq!(service.queue.running_count(), 0);
    }
}
