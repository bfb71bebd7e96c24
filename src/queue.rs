// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FILA DE TASKS - SCHEDULER DE PESQUISA EM BACKGROUND
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Scheduler de polling com `start()/stop()`. A cada tick admite até
// `max_concurrent − running` tasks em ordem (priority desc, created_at
// asc), corre cada uma contra o deadline `task_timeout_ms` e re-tenta com
// backoff exponencial `1s · attempt` até `retry_attempts`.
//
// Deduplicação na admissão: task não-falhada criada nos últimos 5 minutos
// com overlap Jaccard ≥ 0.8 retorna a task existente (dedup não é erro).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use crate::config::QueueConfig;
use crate::crew::Crew;
use crate::events::{EventBus, ServiceEvent};
use crate::persistence::{PersistenceError, Store, TaskStatusFields};
use crate::types::{Depth, ResearchDirective, Task, TaskStatus};
use crate::utils::jaccard_similarity;

/// Janela de deduplicação na admissão (5 minutos)
const DEDUP_WINDOW_MS: i64 = 5 * 60 * 1000;

/// Overlap Jaccard mínimo para considerar duas tasks duplicadas
const DEDUP_SIMILARITY: f32 = 0.8;

/// Tasks recentes examinadas na deduplicação
const DEDUP_SCAN_LIMIT: usize = 50;

/// Erros da fila
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Entrada inválida (ex.: query vazia)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Fila cheia - não re-tentar
    #[error("Queue capacity exceeded")]
    CapacityExceeded,

    /// Falha da persistência
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
}

/// Requisição de enfileiramento
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    /// Query a pesquisar
    pub query: String,
    /// Contexto livre opcional
    pub context: Option<String>,
    /// Profundidade
    pub depth: Depth,
    /// Label do gatilho ("user", "watcher", ...)
    pub trigger: String,
    /// Sessão de origem
    pub session_id: Option<String>,
    /// Prioridade (default 5)
    pub priority: Option<i64>,
}

/// Fila de pesquisa em background
pub struct TaskQueue {
    config: QueueConfig,
    store: Arc<Store>,
    crew: Arc<Crew>,
    events: EventBus,
    running: Arc<AtomicUsize>,
    stopped: Arc<AtomicBool>,
    scheduler: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TaskQueue {
    /// Cria a fila (parada; chame `start` para ligar o scheduler)
    pub fn new(config: QueueConfig, store: Arc<Store>, crew: Arc<Crew>, events: EventBus) -> Self {
        Self {
            config,
            store,
            crew,
            events,
            running: Arc::new(AtomicUsize::new(0)),
            stopped: Arc::new(AtomicBool::new(true)),
            scheduler: std::sync::Mutex::new(None),
        }
    }

    /// Tasks em execução neste momento
    pub fn running_count(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Enfileira uma pesquisa explícita.
    ///
    /// Fila cheia ⇒ `CapacityExceeded`; duplicata dentro da janela retorna
    /// a task existente sem incrementar a fila.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Task, QueueError> {
        if request.query.trim().is_empty() {
            return Err(QueueError::Validation("empty query".to_string()));
        }

        // Deduplicação contra tasks recentes não-falhadas
        let now = Utc::now();
        for candidate in self.store.get_recent_tasks(DEDUP_SCAN_LIMIT).await? {
            if candidate.status == TaskStatus::Failed || candidate.status == TaskStatus::Cancelled {
                continue;
            }
            let age_ms = (now - candidate.created_at).num_milliseconds();
            if age_ms > DEDUP_WINDOW_MS {
                continue;
            }
            if jaccard_similarity(&candidate.query, &request.query) >= DEDUP_SIMILARITY {
                log::debug!(
                    "enqueue dedup: \"{}\" ~ task {} existente",
                    request.query,
                    candidate.id
                );
                return Ok(candidate);
            }
        }

        let stats = self.store.get_queue_stats().await?;
        if stats.queued as usize >= self.config.max_queue_size {
            return Err(QueueError::CapacityExceeded);
        }

        let mut task = Task::new(
            &request.query,
            request.depth,
            &request.trigger,
            request.priority.unwrap_or(5),
        );
        task.context = request.context;
        task.session_id = request.session_id;

        self.store.create_task(&task).await?;
        self.events.emit(ServiceEvent::TaskQueued { id: task.id });
        log::info!("📋 Task {} enfileirada (priority {})", task.id, task.priority);

        Ok(task)
    }

    /// Liga o scheduler de polling (idempotente)
    pub fn start(self: Arc<Self>) {
        let mut guard = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.as_ref().map(|h| !h.is_finished()).unwrap_or(false) {
            return;
        }

        self.stopped.store(false, Ordering::SeqCst);
        let queue = Arc::clone(&self);
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_millis(queue.config.tick_interval_ms));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if queue.stopped.load(Ordering::SeqCst) {
                    break;
                }
                Arc::clone(&queue).run_tick().await;
            }
        });
        *guard = Some(handle);
        log::info!("▶️ Task queue iniciada (tick {}ms)", self.config.tick_interval_ms);
    }

    /// Desliga o scheduler. Tasks em execução terminam sozinhas.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(handle) = self
            .scheduler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
        log::info!("⏹️ Task queue parada");
    }

    /// Um tick do scheduler: admite até `max_concurrent − running` tasks
    async fn run_tick(self: Arc<Self>) {
        let running = self.running.load(Ordering::SeqCst);
        let capacity = self.config.max_concurrent.saturating_sub(running);
        if capacity == 0 {
            return;
        }

        let batch = match self.store.get_queued_tasks(capacity).await {
            Ok(batch) => batch,
            Err(e) => {
                log::error!("❌ Tick da fila falhou ao ler tasks: {e}");
                return;
            }
        };

        for task in batch {
            let transition = self
                .store
                .update_task_status(
                    task.id,
                    TaskStatus::Running,
                    TaskStatusFields {
                        started_at: Some(Utc::now()),
                        bump_attempts: true,
                        ..Default::default()
                    },
                )
                .await;
            if let Err(e) = transition {
                log::warn!("⚠️ Task {} não pôde iniciar: {e}", task.id);
                continue;
            }

            self.running.fetch_add(1, Ordering::SeqCst);
            self.events.emit(ServiceEvent::TaskStarted { id: task.id });

            let queue = Arc::clone(&self);
            tokio::spawn(async move {
                queue.execute_task(task).await;
            });
        }
    }

    /// Executa uma task contra o deadline, com retries e backoff
    async fn execute_task(self: Arc<Self>, task: Task) {
        let deadline = Duration::from_millis(self.config.task_timeout_ms);
        let max_attempts = self.config.retry_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                // Backoff exponencial 1s · attempt
                tokio::time::sleep(Duration::from_secs(u64::from(attempt))).await;
                let _ = self
                    .store
                    .update_task_status(
                        task.id,
                        TaskStatus::Running,
                        TaskStatusFields {
                            bump_attempts: true,
                            ..Default::default()
                        },
                    )
                    .await;
            }

            let directive = ResearchDirective {
                query: task.query.clone(),
                context: task.context.clone(),
                max_iterations: None,
                session_id: task.session_id.clone(),
                depth: Some(task.depth),
            };

            match tokio::time::timeout(deadline, self.crew.explore(directive)).await {
                Ok(Ok(result)) => {
                    let outcome = match result.finding_id {
                        Some(finding_id) => self.store.save_task_result(task.id, finding_id).await,
                        None => {
                            self.store
                                .update_task_status(
                                    task.id,
                                    TaskStatus::Completed,
                                    TaskStatusFields {
                                        completed_at: Some(Utc::now()),
                                        ..Default::default()
                                    },
                                )
                                .await
                        }
                    };
                    if let Err(e) = outcome {
                        log::error!("❌ Task {} não pôde ser concluída: {e}", task.id);
                    }
                    self.events.emit(ServiceEvent::TaskCompleted { id: task.id });
                    log::info!(
                        "✅ Task {} concluída ({} iterações, confiança {:.2})",
                        task.id,
                        result.iterations,
                        result.confidence
                    );
                    self.finish_slot().await;
                    return;
                }
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    log::warn!("⚠️ Task {} falhou (tentativa {attempt}): {e}", task.id);
                }
                Err(_) => {
                    // Deadline: cancelada e contada como tentativa falhada
                    last_error = format!("task timed out after {}ms", self.config.task_timeout_ms);
                    log::warn!("⚠️ Task {} excedeu o deadline (tentativa {attempt})", task.id);
                }
            }
        }

        let failed = self
            .store
            .update_task_status(
                task.id,
                TaskStatus::Failed,
                TaskStatusFields {
                    completed_at: Some(Utc::now()),
                    error: Some(last_error.clone()),
                    ..Default::default()
                },
            )
            .await;
        if let Err(e) = failed {
            log::error!("❌ Task {} não pôde ser marcada como failed: {e}", task.id);
        }
        self.events.emit(ServiceEvent::TaskFailed {
            id: task.id,
            error: last_error,
        });
        self.finish_slot().await;
    }

    /// Libera o slot de execução e emite `queueDrained` quando a fila zera
    async fn finish_slot(&self) {
        let remaining = self.running.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining == 0 {
            if let Ok(stats) = self.store.get_queue_stats().await {
                if stats.queued == 0 && stats.running == 0 {
                    self.events.emit(ServiceEvent::QueueDrained);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CrewConfig, UrlCacheConfig};
    use crate::coordinator::Coordinator;
    use crate::events::EventBus;
    use crate::llm::{LlmClient, MockLlmClient};
    use crate::memory_bridge::MemoryBridge;
    use crate::persistence::SemanticIndex;
    use crate::specialist::{ContentFetcher, MockSearchTool, Specialist};
    use crate::types::{SearchHit, SpecialistDomain};

    struct Harness {
        queue: Arc<TaskQueue>,
        store: Arc<Store>,
        llm: Arc<MockLlmClient>,
    }

    async fn harness(config: QueueConfig) -> Harness {
        let store = Arc::new(
            Store::open(":memory:", UrlCacheConfig::default())
                .await
                .unwrap(),
        );
        let llm = Arc::new(MockLlmClient::new());
        let index = Arc::new(SemanticIndex::new(
            Arc::clone(&store),
            Some(Arc::clone(&llm) as Arc<dyn LlmClient>),
        ));
        let bridge = Arc::new(MemoryBridge::new(Arc::clone(&store), None));

        let fetcher = Arc::new(ContentFetcher::new(None));
        let mut web = Specialist::new(SpecialistDomain::Web, fetcher);
        web.register_tool(Arc::new(MockSearchTool::with_hits(
            "mock-web",
            vec![SearchHit::new("R", "https://r.example", "mock-web", 0.9)],
        )));

        let mut crew_config = CrewConfig::default();
        crew_config.scrape_top = 0;
        let crew = Arc::new(Crew::new(
            Coordinator::new(Arc::clone(&llm) as Arc<dyn LlmClient>),
            vec![web],
            Arc::clone(&store),
            index,
            bridge,
            EventBus::new(),
            crew_config,
        ));

        let queue = Arc::new(TaskQueue::new(config, Arc::clone(&store), crew, EventBus::new()));
        Harness { queue, store, llm }
    }

    fn request(query: &str) -> EnqueueRequest {
        EnqueueRequest {
            query: query.to_string(),
            context: None,
            depth: Depth::Quick,
            trigger: "user".to_string(),
            session_id: None,
            priority: None,
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            max_concurrent: 2,
            max_queue_size: 3,
            task_timeout_ms: 10_000,
            retry_attempts: 1,
            tick_interval_ms: 20,
        }
    }

    #[tokio::test]
    async fn test_empty_query_rejected() {
        let h = harness(test_config()).await;
        let result = h.queue.enqueue(request("  ")).await;
        assert!(matches!(result, Err(QueueError::Validation(_))));
    }

    #[tokio::test]
    async fn test_enqueue_dedup_returns_existing_task() {
        let h = harness(test_config()).await;
        let first = h
            .queue
            .enqueue(request("how to implement rate limiting in FastAPI"))
            .await
            .unwrap();
        let second = h
            .queue
            .enqueue(request("implement rate limiting FastAPI how to"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        let stats = h.store.get_queue_stats().await.unwrap();
        assert_eq!(stats.queued, 1);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let h = harness(test_config()).await;
        h.queue.enqueue(request("first distinct query")).await.unwrap();
        h.queue.enqueue(request("second unrelated topic")).await.unwrap();
        h.queue.enqueue(request("third completely different")).await.unwrap();

        let overflow = h.queue.enqueue(request("fourth one over the cap")).await;
        assert!(matches!(overflow, Err(QueueError::CapacityExceeded)));
    }

    #[tokio::test]
    async fn test_scheduler_runs_task_to_completion() {
        let h = harness(test_config()).await;
        // Crew com LLM falhando usa plano fallback + síntese mecânica
        h.llm.set_fail(true);

        let task = h.queue.enqueue(request("tokio runtime shutdown")).await.unwrap();
        Arc::clone(&h.queue).start();

        // Espera o scheduler admitir e concluir
        let mut done = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let loaded = h.store.get_task(task.id).await.unwrap().unwrap();
            if loaded.status == TaskStatus::Completed {
                done = true;
                break;
            }
        }
        h.queue.stop();

        assert!(done, "task should complete");
        let loaded = h.store.get_task(task.id).await.unwrap().unwrap();
        assert!(loaded.started_at.is_some());
        assert!(loaded.completed_at.is_some());
        assert_eq!(loaded.attempts, 1);
        assert!(loaded.finding_id.is_some());
        assert_eq!(h.queue.running_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_queued_tasks_not_deduped_against() {
        let h = harness(test_config()).await;
        let first = h.queue.enqueue(request("unique research subject")).await.unwrap();
        // Marca como failed: a próxima task igual não deve dedupar contra ela
        h.store
            .update_task_status(
                first.id,
                TaskStatus::Failed,
                TaskStatusFields {
                    error: Some("boom".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let second = h.queue.enqueue(request("unique research subject")).await.unwrap();
        assert_ne!(first.id, second.id);
    }
}
