// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SESSION TRACKER
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Contexto rolante por sessão: ring limitado de eventos, tópicos com decay
// de recência, captura de erros por pattern, detecção de "stuck" (mesmo
// foco em sequências consecutivas de tool-calls) e histórico de pesquisas.
//
// O path de ingest é single-writer por sessão; o watcher lê snapshots.
// Sessões ociosas além do TTL são removidas por `prune_inactive`.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::SessionConfig;
use crate::types::{SessionEvent, SessionEventKind};
use crate::utils::{jaccard_similarity, significant_terms, truncate_bytes};

/// Fator de decay aplicado aos pesos de tópicos a cada ingest
const TOPIC_DECAY: f32 = 0.9;

/// Peso mínimo antes de um tópico ser podado
const TOPIC_MIN_WEIGHT: f32 = 0.05;

/// Máximo de tópicos retidos por sessão
const MAX_TOPICS: usize = 30;

/// Eventos recentes expostos no snapshot do watcher
const SNAPSHOT_EVENTS: usize = 8;

/// Jaccard mínimo para "pesquisa similar recente" no histórico da sessão
const HISTORY_SIMILARITY: f32 = 0.8;

static ERROR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(error\b|exception\b|panic(ked)?\b|traceback|fatal\b|failed\b|E\d{4}\b|ENOENT|EACCES|undefined reference|cannot find|no such file)",
    )
    .expect("error regex")
});

/// Tópico com peso de recência
#[derive(Debug, Clone)]
struct TopicEntry {
    term: String,
    weight: f32,
}

/// Entrada do histórico de pesquisas da sessão
#[derive(Debug, Clone)]
struct ResearchRecord {
    query: String,
    at: DateTime<Utc>,
}

/// Estado em memória de uma sessão
#[derive(Debug)]
struct SessionState {
    working_dir: Option<String>,
    events: VecDeque<SessionEvent>,
    topics: Vec<TopicEntry>,
    errors: VecDeque<String>,
    research_history: VecDeque<ResearchRecord>,
    current_focus: Option<String>,
    focus_repeats: u32,
    analyzed_at: Option<DateTime<Utc>>,
    last_activity: DateTime<Utc>,
}

impl SessionState {
    fn new() -> Self {
        Self {
            working_dir: None,
            events: VecDeque::new(),
            topics: Vec::new(),
            errors: VecDeque::new(),
            research_history: VecDeque::new(),
            current_focus: None,
            focus_repeats: 0,
            analyzed_at: None,
            last_activity: Utc::now(),
        }
    }
}

/// Snapshot read-only do estado de uma sessão para o watcher
#[derive(Debug, Clone)]
pub struct WatcherContext {
    /// Id da sessão
    pub session_id: String,
    /// Working directory, quando conhecido
    pub working_dir: Option<String>,
    /// Última tarefa declarada pelo usuário (último userPrompt)
    pub current_task: Option<String>,
    /// Tópicos por peso de recência (maior primeiro)
    pub topics: Vec<String>,
    /// Erros capturados recentemente
    pub recent_errors: Vec<String>,
    /// Queries já pesquisadas para esta sessão
    pub research_history: Vec<String>,
    /// Últimos eventos do ring
    pub recent_messages: Vec<SessionEvent>,
    /// Se a sessão aparenta estar travada
    pub stuck: bool,
    /// Foco atual do indicador de stuck
    pub current_focus: Option<String>,
}

/// Tracker de sessões do serviço
pub struct SessionTracker {
    config: SessionConfig,
    sessions: RwLock<HashMap<String, SessionState>>,
}

impl SessionTracker {
    /// Cria o tracker
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn write_session<T>(
        &self,
        session_id: &str,
        create_missing: bool,
        f: impl FnOnce(&mut SessionState) -> T,
    ) -> Option<T> {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if create_missing {
            let state = sessions
                .entry(session_id.to_string())
                .or_insert_with(SessionState::new);
            Some(f(state))
        } else {
            sessions.get_mut(session_id).map(f)
        }
    }

    /// Ingere um evento de conversa: atualiza ring, tópicos, erros e o
    /// indicador de stuck. Cria a sessão no primeiro evento.
    pub fn ingest(&self, session_id: &str, event: SessionEvent) {
        let max_events = self.config.max_events;
        let max_errors = self.config.max_errors;
        let stuck_threshold = self.config.stuck_threshold;

        self.write_session(session_id, true, |state| {
            state.last_activity = Utc::now();

            // Decay de recência dos tópicos, depois reforço dos termos vistos
            for topic in &mut state.topics {
                topic.weight *= TOPIC_DECAY;
            }
            for term in significant_terms(&event.text, 12) {
                match state.topics.iter_mut().find(|t| t.term == term) {
                    Some(topic) => topic.weight += 1.0,
                    None => state.topics.push(TopicEntry { term, weight: 1.0 }),
                }
            }
            state.topics.retain(|t| t.weight >= TOPIC_MIN_WEIGHT);
            state
                .topics
                .sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));
            state.topics.truncate(MAX_TOPICS);

            // Captura de erros em saídas de ferramenta
            if event.kind == SessionEventKind::ToolOutput {
                for line in event.text.lines() {
                    if ERROR_LINE_RE.is_match(line) {
                        state
                            .errors
                            .push_back(truncate_bytes(line.trim(), 300).to_string());
                        if state.errors.len() > max_errors {
                            state.errors.pop_front();
                        }
                    }
                }
            }

            // Indicador de stuck: mesmo foco em tool-calls consecutivos
            if event.kind == SessionEventKind::ToolCall {
                let focus = significant_terms(&event.text, 1).into_iter().next();
                if focus.is_some() && focus == state.current_focus {
                    state.focus_repeats += 1;
                } else {
                    state.current_focus = focus;
                    state.focus_repeats = 1;
                }
                if state.focus_repeats >= stuck_threshold {
                    log::debug!(
                        "sessão {session_id} aparenta stuck em {:?}",
                        state.current_focus
                    );
                }
            }

            state.events.push_back(event);
            while state.events.len() > max_events {
                state.events.pop_front();
            }
        });
    }

    /// Define o working directory da sessão
    pub fn set_working_dir(&self, session_id: &str, path: &str) {
        self.write_session(session_id, true, |state| {
            state.working_dir = Some(path.to_string());
        });
    }

    /// Snapshot read-only para o watcher. None para sessão desconhecida.
    pub fn get_watcher_context(&self, session_id: &str) -> Option<WatcherContext> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = sessions.get(session_id)?;

        let current_task = state
            .events
            .iter()
            .rev()
            .find(|e| e.kind == SessionEventKind::UserPrompt)
            .map(|e| truncate_bytes(&e.text, 500).to_string());

        let recent_messages = state
            .events
            .iter()
            .rev()
            .take(SNAPSHOT_EVENTS)
            .cloned()
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();

        Some(WatcherContext {
            session_id: session_id.to_string(),
            working_dir: state.working_dir.clone(),
            current_task,
            topics: state.topics.iter().map(|t| t.term.clone()).collect(),
            recent_errors: state.errors.iter().cloned().collect(),
            research_history: state
                .research_history
                .iter()
                .map(|r| r.query.clone())
                .collect(),
            recent_messages,
            stuck: state.focus_repeats >= self.config.stuck_threshold,
            current_focus: state.current_focus.clone(),
        })
    }

    /// Registra uma pesquisa disparada para a sessão
    pub fn record_research(&self, session_id: &str, query: &str) {
        let max_history = self.config.max_history;
        self.write_session(session_id, true, |state| {
            state.research_history.push_back(ResearchRecord {
                query: query.to_string(),
                at: Utc::now(),
            });
            while state.research_history.len() > max_history {
                state.research_history.pop_front();
            }
        });
    }

    /// Se a sessão já pesquisou algo similar dentro da janela
    pub fn has_recent_similar_research(
        &self,
        session_id: &str,
        text: &str,
        window_ms: u64,
    ) -> bool {
        let cutoff = Utc::now() - Duration::milliseconds(window_ms as i64);
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(state) = sessions.get(session_id) else {
            return false;
        };

        state.research_history.iter().any(|record| {
            record.at >= cutoff && jaccard_similarity(&record.query, text) >= HISTORY_SIMILARITY
        })
    }

    /// Estampa o momento da última análise do watcher
    pub fn mark_analyzed(&self, session_id: &str) {
        self.write_session(session_id, false, |state| {
            state.analyzed_at = Some(Utc::now());
        });
    }

    /// Remove sessões ociosas além do TTL. Retorna quantas foram removidas.
    pub fn prune_inactive(&self, idle_ms: u64) -> usize {
        let cutoff = Utc::now() - Duration::milliseconds(idle_ms as i64);
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = sessions.len();
        sessions.retain(|_, state| state.last_activity >= cutoff);
        let removed = before - sessions.len();
        if removed > 0 {
            log::info!("🧹 {removed} sessões ociosas removidas");
        }
        removed
    }

    /// Número de sessões ativas
    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> SessionTracker {
        SessionTracker::new(SessionConfig::default())
    }

    #[test]
    fn test_ring_is_bounded_in_arrival_order() {
        let mut config = SessionConfig::default();
        config.max_events = 3;
        let tracker = SessionTracker::new(config);

        for i in 0..5 {
            tracker.ingest(
                "s1",
                SessionEvent::now(SessionEventKind::ToolOutput, format!("event {i}")),
            );
        }

        let context = tracker.get_watcher_context("s1").unwrap();
        let texts: Vec<_> = context
            .recent_messages
            .iter()
            .map(|e| e.text.as_str())
            .collect();
        assert_eq!(texts, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_topics_follow_recency() {
        let t = tracker();
        t.ingest("s1", SessionEvent::now(SessionEventKind::UserPrompt, "tokio runtime question"));
        for _ in 0..5 {
            t.ingest("s1", SessionEvent::now(SessionEventKind::UserPrompt, "axum handler problem"));
        }

        let context = t.get_watcher_context("s1").unwrap();
        assert!(context.topics.contains(&"axum".to_string()));
        // Termos recentes pesam mais que os antigos
        let axum_pos = context.topics.iter().position(|t| t == "axum").unwrap();
        let tokio_pos = context.topics.iter().position(|t| t == "tokio").unwrap();
        assert!(axum_pos < tokio_pos);
    }

    #[test]
    fn test_error_capture_from_tool_output() {
        let t = tracker();
        t.ingest(
            "s1",
            SessionEvent::now(
                SessionEventKind::ToolOutput,
                "compiling...\nerror[E0502]: cannot borrow `x` as mutable\ndone",
            ),
        );
        // Erros em prompts de usuário não são capturados
        t.ingest(
            "s1",
            SessionEvent::now(SessionEventKind::UserPrompt, "I saw an error yesterday"),
        );

        let context = t.get_watcher_context("s1").unwrap();
        assert_eq!(context.recent_errors.len(), 1);
        assert!(context.recent_errors[0].contains("E0502"));
    }

    #[test]
    fn test_stuck_detection_after_repeated_focus() {
        let t = tracker();
        t.ingest("s1", SessionEvent::now(SessionEventKind::ToolCall, "migration script retry"));
        let context = t.get_watcher_context("s1").unwrap();
        assert!(!context.stuck);

        t.ingest("s1", SessionEvent::now(SessionEventKind::ToolCall, "migration script again"));
        let context = t.get_watcher_context("s1").unwrap();
        assert!(context.stuck);
        assert_eq!(context.current_focus.as_deref(), Some("migration"));

        // Foco novo reseta o contador
        t.ingest("s1", SessionEvent::now(SessionEventKind::ToolCall, "deploy pipeline"));
        let context = t.get_watcher_context("s1").unwrap();
        assert!(!context.stuck);
    }

    #[test]
    fn test_recent_similar_research() {
        let t = tracker();
        t.record_research("s1", "how to implement rate limiting in FastAPI");

        assert!(t.has_recent_similar_research(
            "s1",
            "implement rate limiting FastAPI how to in",
            60_000
        ));
        assert!(!t.has_recent_similar_research("s1", "rust borrow checker", 60_000));
        assert!(!t.has_recent_similar_research("s2", "rate limiting", 60_000));
    }

    #[test]
    fn test_unknown_session_has_no_context() {
        assert!(tracker().get_watcher_context("nope").is_none());
    }

    #[test]
    fn test_prune_inactive() {
        let t = tracker();
        t.ingest("s1", SessionEvent::now(SessionEventKind::UserPrompt, "hello"));
        assert_eq!(t.session_count(), 1);

        // TTL zero: tudo mais velho que "agora" é removido
        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = t.prune_inactive(0);
        assert_eq!(removed, 1);
        assert_eq!(t.session_count(), 0);
    }

    #[test]
    fn test_current_task_is_latest_user_prompt() {
        let t = tracker();
        t.ingest("s1", SessionEvent::now(SessionEventKind::UserPrompt, "first task"));
        t.ingest("s1", SessionEvent::now(SessionEventKind::ToolOutput, "output"));
        t.ingest("s1", SessionEvent::now(SessionEventKind::UserPrompt, "second task"));
        t.set_working_dir("s1", "/home/dev/project");

        let context = t.get_watcher_context("s1").unwrap();
        assert_eq!(context.current_task.as_deref(), Some("second task"));
        assert_eq!(context.working_dir.as_deref(), Some("/home/dev/project"));
    }
}
