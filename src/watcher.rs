// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WATCHER - GATILHO DE PESQUISA AUTÔNOMA
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Decide se um evento fresco de conversa justifica pesquisa. Cadeia de
// short-circuit (cada gate retorna no-research com razão declarada):
//
//   1. modo autônomo desligado        5. sessão desconhecida
//   2. gatilho é userPrompt           6. pesquisa similar na sessão
//   3. budget global/hora esgotado    7. pesquisa similar no store
//   4. cooldown da sessão ativo
//
// Passando os gates, um prompt com o contexto da sessão vai ao LLM; a
// resposta é um objeto JSON embutido em texto livre - a extração do
// primeiro span {...} é obrigatória. Threshold de confiança por tipo.
//
// Máquina de estados por sessão: Idle → Cooling (após trigger) → Idle
// (cooldown expirado). `reset_cooldown` reseta explicitamente.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

use crate::config::ResearchConfig;
use crate::events::{EventBus, ServiceEvent};
use crate::llm::{LlmClient, QueryOptions};
use crate::persistence::{SemanticIndex, Store};
use crate::session::{SessionTracker, WatcherContext};
use crate::types::{
    clamp_priority, clamp_score, Decision, ResearchType, SessionEventKind, TriggerKind,
};
use crate::utils::truncate_bytes;

/// Confiança fixa do caminho rápido sem LLM
const QUICK_PATH_CONFIDENCE: f32 = 0.85;

static QUICK_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(error(\[\w+\])?:|exception\b|panic(ked)? at|traceback \(most recent call last\)|fatal:|segmentation fault)",
    )
    .expect("quick error regex")
});

/// Janela global de pesquisas por hora.
///
/// Reset acontece exatamente uma vez por hora rolante; o contador nunca
/// observa valores negativos.
#[derive(Debug)]
struct HourlyWindow {
    window_start: Instant,
    count: u32,
}

/// Watcher: decide e dispara pesquisa autônoma
pub struct Watcher {
    config: ResearchConfig,
    llm: Arc<dyn LlmClient>,
    tracker: Arc<SessionTracker>,
    store: Arc<Store>,
    index: Arc<SemanticIndex>,
    events: EventBus,
    cooldowns: RwLock<HashMap<String, Instant>>,
    hourly: Mutex<HourlyWindow>,
}

impl Watcher {
    /// Cria o watcher
    pub fn new(
        config: ResearchConfig,
        llm: Arc<dyn LlmClient>,
        tracker: Arc<SessionTracker>,
        store: Arc<Store>,
        index: Arc<SemanticIndex>,
        events: EventBus,
    ) -> Self {
        Self {
            config,
            llm,
            tracker,
            store,
            index,
            events,
            cooldowns: RwLock::new(HashMap::new()),
            hourly: Mutex::new(HourlyWindow {
                window_start: Instant::now(),
                count: 0,
            }),
        }
    }

    /// Threshold de confiança por tipo de pesquisa
    fn threshold_for(&self, research_type: ResearchType) -> f32 {
        let base = self.config.confidence_threshold;
        match research_type {
            ResearchType::Stuck => (base + 0.1).min(0.8),
            _ => base,
        }
    }

    /// Se o budget horário permite mais um trigger (sem consumir)
    fn hourly_budget_available(&self) -> bool {
        let mut window = self
            .hourly
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.window_start.elapsed() >= Duration::from_secs(3600) {
            window.window_start = Instant::now();
            window.count = 0;
        }
        window.count < self.config.max_research_per_hour
    }

    fn consume_hourly_budget(&self) {
        let mut window = self
            .hourly
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        window.count = window.count.saturating_add(1);
    }

    /// Se o cooldown da sessão ainda está ativo (estado Cooling)
    fn cooldown_active(&self, session_id: &str) -> bool {
        let cooldowns = self
            .cooldowns
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        cooldowns
            .get(session_id)
            .map(|last| last.elapsed() < Duration::from_millis(self.config.session_cooldown_ms))
            .unwrap_or(false)
    }

    fn stamp_cooldown(&self, session_id: &str) {
        self.cooldowns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(session_id.to_string(), Instant::now());
    }

    /// Reseta explicitamente o cooldown de uma sessão (API do cliente)
    pub fn reset_cooldown(&self, session_id: &str) {
        self.cooldowns
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(session_id);
        log::info!("⏱️ Cooldown da sessão {session_id} resetado");
    }

    /// Analisa se o evento mais recente da sessão justifica pesquisa
    pub async fn analyze(&self, session_id: &str, trigger: TriggerKind) -> Decision {
        // 1. Master switch
        if !self.config.autonomous_enabled {
            return Decision::no_research("Autonomous research disabled");
        }

        // 2. Prompts de usuário exigem pesquisa explícita do cliente
        if trigger == TriggerKind::UserPrompt {
            return Decision::no_research("User prompts require explicit research");
        }

        // 3. Teto global por hora
        if !self.hourly_budget_available() {
            return Decision::no_research("Global rate limit reached");
        }

        // 4. Cooldown por sessão
        if self.cooldown_active(session_id) {
            return Decision::no_research("Cooldown active");
        }

        // 5. Sessão conhecida
        let Some(context) = self.tracker.get_watcher_context(session_id) else {
            return Decision::no_research("Unknown session");
        };

        // 6. Pesquisa similar recente na própria sessão
        let probe = probe_text(&context);
        if !probe.is_empty()
            && self
                .tracker
                .has_recent_similar_research(session_id, &probe, self.config.dedup_window_ms)
        {
            return Decision::no_research("Similar research already done for this session");
        }

        // 7. Pesquisa similar recente no store global
        if !probe.is_empty() {
            match self
                .store
                .has_recent_similar_query(&probe, self.config.dedup_window_ms)
                .await
            {
                Ok(similar) if similar.found => {
                    return Decision::no_research("Similar research already recorded");
                }
                Ok(_) => {}
                Err(e) => log::warn!("⚠️ Dedup global indisponível: {e}"),
            }
        }

        // Decisão assistida por LLM
        let prompt = build_decision_prompt(&context);
        let opts = QueryOptions {
            max_tokens: 512,
            temperature: 0.2,
        };

        let reply = match self.llm.query(&prompt, &opts).await {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("⚠️ LLM do watcher indisponível: {e}");
                return Decision::no_research("Watcher LLM unavailable");
            }
        };

        let Some(mut decision) = parse_decision_reply(&reply.text) else {
            return Decision::no_research("Unparseable watcher reply");
        };

        if !decision.should_research {
            if decision.reason.is_empty() {
                decision.reason = "Model declined research".to_string();
            }
            self.tracker.mark_analyzed(session_id);
            return decision;
        }

        let Some(query) = decision.query.clone().filter(|q| !q.trim().is_empty()) else {
            return Decision::no_research("Model proposed no query");
        };

        // Threshold por tipo
        let threshold = self.threshold_for(decision.research_type);
        if decision.confidence < threshold {
            return Decision::no_research(format!(
                "Confidence {:.2} below threshold {:.2}",
                decision.confidence, threshold
            ));
        }

        // Re-check de dedup contra a query sugerida pelo LLM
        let duplicate = self
            .index
            .has_recent_similar_query_async(
                &query,
                self.config.dedup_window_ms,
                self.config.dedup_similarity_threshold,
            )
            .await
            .map(|similar| similar.found)
            .unwrap_or(false);
        if duplicate {
            return Decision::no_research("Duplicate of recent research");
        }

        // Aceito: Idle → Cooling, consome budget, registra histórico
        self.stamp_cooldown(session_id);
        self.consume_hourly_budget();
        self.tracker.record_research(session_id, &query);
        self.tracker.mark_analyzed(session_id);
        self.events.emit(ServiceEvent::ResearchTriggered {
            session_id: session_id.to_string(),
            query: query.clone(),
        });
        log::info!(
            "🔬 Pesquisa autônoma disparada para {session_id}: \"{query}\" ({})",
            decision.research_type.as_str()
        );

        decision
    }

    /// Caminho rápido sem LLM: detecção de erro por regex na última saída
    /// de ferramenta. Nunca analisa prompts de usuário. A decisão proposta
    /// continua sujeita ao threshold por tipo.
    pub fn quick_analyze(&self, session_id: &str) -> Option<Decision> {
        if !self.config.autonomous_enabled {
            return None;
        }

        let context = self.tracker.get_watcher_context(session_id)?;
        let latest = context.recent_messages.last()?;
        if latest.kind != SessionEventKind::ToolOutput {
            return None;
        }

        let error_line = latest
            .text
            .lines()
            .find(|line| QUICK_ERROR_RE.is_match(line))?
            .trim();

        let decision = Decision {
            should_research: true,
            query: Some(format!(
                "how to fix: {}",
                truncate_bytes(error_line, 200)
            )),
            research_type: ResearchType::Error,
            confidence: QUICK_PATH_CONFIDENCE,
            priority: 8,
            reason: "Error pattern detected in tool output".to_string(),
            alternative_hint: None,
            blocked_by: None,
        };

        let threshold = self.threshold_for(decision.research_type);
        if decision.confidence < threshold {
            log::debug!(
                "quick path descartado: confiança {QUICK_PATH_CONFIDENCE} abaixo de {threshold}"
            );
            return None;
        }

        Some(decision)
    }
}

/// Texto de sondagem para os gates de dedup pré-LLM: última mensagem,
/// com fallback para a tarefa atual
fn probe_text(context: &WatcherContext) -> String {
    context
        .recent_messages
        .last()
        .map(|event| truncate_bytes(&event.text, 300).to_string())
        .or_else(|| context.current_task.clone())
        .unwrap_or_default()
}

/// Monta o prompt de decisão com o contexto da sessão
fn build_decision_prompt(context: &WatcherContext) -> String {
    let mut prompt = String::from(
        "You watch a coding session and decide whether background web research \
         would help right now.\n\n",
    );

    if let Some(task) = &context.current_task {
        prompt.push_str(&format!("Current task: {task}\n"));
    }
    if let Some(dir) = &context.working_dir {
        prompt.push_str(&format!("Project: {dir}\n"));
    }
    if !context.topics.is_empty() {
        prompt.push_str(&format!(
            "Tech stack / topics: {}\n",
            context.topics.iter().take(10).cloned().collect::<Vec<_>>().join(", ")
        ));
    }
    if context.stuck {
        prompt.push_str(&format!(
            "The session looks stuck on: {}\n",
            context.current_focus.as_deref().unwrap_or("unknown")
        ));
    }
    if !context.recent_errors.is_empty() {
        prompt.push_str("Recent errors:\n");
        for error in context.recent_errors.iter().rev().take(5) {
            prompt.push_str(&format!("- {error}\n"));
        }
    }
    if !context.research_history.is_empty() {
        prompt.push_str(&format!(
            "Already researched: {}\n",
            context
                .research_history
                .iter()
                .rev()
                .take(5)
                .cloned()
                .collect::<Vec<_>>()
                .join("; ")
        ));
    }

    prompt.push_str("\nRecent conversation:\n");
    for event in &context.recent_messages {
        prompt.push_str(&format!(
            "[{}] {}\n",
            event.kind.as_str(),
            truncate_bytes(&event.text, 400)
        ));
    }

    prompt.push_str(
        "\nReply with a single JSON object (free text around it is ignored):\n\
         {\"shouldResearch\": <bool>, \"query\": \"<search query>\", \
         \"researchType\": \"error|stuck|unknown_api|proactive|direct\", \
         \"confidence\": <0.0-1.0>, \"priority\": <1-10>, \"reason\": \"<why>\", \
         \"alternativeHint\": \"<optional>\", \"blockedBy\": \"<optional>\"}\n",
    );

    prompt
}

/// Extrai o primeiro span `{...}` balanceado de um texto
fn first_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse permissivo da resposta do watcher: campos desconhecidos ignorados,
/// ausentes defaultados, numéricos clampados
fn parse_decision_reply(text: &str) -> Option<Decision> {
    let span = first_json_span(text)?;
    let value: serde_json::Value = serde_json::from_str(span).ok()?;

    let get_str = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|key| value.get(key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .filter(|s| !s.trim().is_empty())
    };

    let should_research = ["shouldResearch", "should_research"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_bool()))
        .unwrap_or(false);

    let research_type = get_str(&["researchType", "research_type", "type"])
        .map(|raw| ResearchType::parse(&raw))
        .unwrap_or(ResearchType::Proactive);

    let confidence = value
        .get("confidence")
        .and_then(|v| v.as_f64())
        .map(|v| clamp_score(v as f32))
        .unwrap_or(0.0);

    let priority = value
        .get("priority")
        .and_then(|v| v.as_i64())
        .map(clamp_priority)
        .unwrap_or(5);

    Some(Decision {
        should_research,
        query: get_str(&["query"]),
        research_type,
        confidence,
        priority,
        reason: get_str(&["reason"]).unwrap_or_default(),
        alternative_hint: get_str(&["alternativeHint", "alternative_hint"]),
        blocked_by: get_str(&["blockedBy", "blocked_by"]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{SessionConfig, UrlCacheConfig};
    use crate::llm::MockLlmClient;
    use crate::types::SessionEvent;

    struct Harness {
        watcher: Watcher,
        llm: Arc<MockLlmClient>,
        tracker: Arc<SessionTracker>,
    }

    async fn harness(config: ResearchConfig) -> Harness {
        let store = Arc::new(
            Store::open(":memory:", UrlCacheConfig::default())
                .await
                .unwrap(),
        );
        let llm = Arc::new(MockLlmClient::new());
        let tracker = Arc::new(SessionTracker::new(SessionConfig::default()));
        let index = Arc::new(SemanticIndex::new(
            Arc::clone(&store),
            Some(Arc::clone(&llm) as Arc<dyn LlmClient>),
        ));
        let watcher = Watcher::new(
            config,
            Arc::clone(&llm) as Arc<dyn LlmClient>,
            Arc::clone(&tracker),
            store,
            index,
            EventBus::new(),
        );
        Harness {
            watcher,
            llm,
            tracker,
        }
    }

    fn ingest_error(tracker: &SessionTracker, session_id: &str, text: &str) {
        tracker.ingest(
            session_id,
            SessionEvent::now(SessionEventKind::ToolOutput, text),
        );
    }

    fn positive_reply(query: &str, confidence: f32) -> String {
        format!(
            "Thinking... {{\"shouldResearch\": true, \"query\": \"{query}\", \
             \"researchType\": \"error\", \"confidence\": {confidence}, \
             \"priority\": 8, \"reason\": \"build failing\"}} done."
        )
    }

    #[test]
    fn test_first_json_span_extraction() {
        let text = "prefix {\"a\": {\"nested\": 1}, \"b\": \"br{ace}\"} suffix {other}";
        let span = first_json_span(text).unwrap();
        assert!(span.starts_with("{\"a\""));
        assert!(span.ends_with('}'));
        assert!(serde_json::from_str::<serde_json::Value>(span).is_ok());
    }

    #[test]
    fn test_parse_decision_defaults_and_clamps() {
        let reply = r#"{"shouldResearch": true, "query": "q", "confidence": 4.0, "priority": 99, "unknownField": 1}"#;
        let decision = parse_decision_reply(reply).unwrap();
        assert!(decision.should_research);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.priority, 10);
        assert_eq!(decision.research_type, ResearchType::Proactive);
    }

    #[tokio::test]
    async fn test_user_prompt_never_triggers() {
        let h = harness(ResearchConfig::default()).await;
        ingest_error(&h.tracker, "s1", "error: something");
        h.llm.push_reply(positive_reply("anything", 0.99));

        let decision = h.watcher.analyze("s1", TriggerKind::UserPrompt).await;
        assert!(!decision.should_research);
    }

    #[tokio::test]
    async fn test_disabled_mode_short_circuits() {
        let mut config = ResearchConfig::default();
        config.autonomous_enabled = false;
        let h = harness(config).await;

        let decision = h.watcher.analyze("s1", TriggerKind::ToolOutput).await;
        assert!(!decision.should_research);
        assert_eq!(decision.reason, "Autonomous research disabled");
    }

    #[tokio::test]
    async fn test_unknown_session_short_circuits() {
        let h = harness(ResearchConfig::default()).await;
        let decision = h.watcher.analyze("ghost", TriggerKind::ToolOutput).await;
        assert_eq!(decision.reason, "Unknown session");
    }

    #[tokio::test]
    async fn test_trigger_then_cooldown() {
        let h = harness(ResearchConfig::default()).await;
        ingest_error(&h.tracker, "s1", "error: connection refused in deploy step");
        h.llm.push_reply(positive_reply("fix connection refused deploy", 0.9));

        let first = h.watcher.analyze("s1", TriggerKind::ToolOutput).await;
        assert!(first.should_research);

        // Reinvocação imediata: estado Cooling
        let second = h.watcher.analyze("s1", TriggerKind::ToolOutput).await;
        assert!(!second.should_research);
        assert_eq!(second.reason, "Cooldown active");

        // Reset explícito volta para Idle
        h.watcher.reset_cooldown("s1");
        assert!(!h.watcher.cooldown_active("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_hourly_rate_limit() {
        let mut config = ResearchConfig::default();
        config.max_research_per_hour = 3;
        config.session_cooldown_ms = 0;
        let h = harness(config).await;

        for i in 0..3 {
            let session = format!("s{i}");
            ingest_error(&h.tracker, &session, &format!("error: failure case {i}"));
            h.llm
                .push_reply(positive_reply(&format!("distinct research query {i}"), 0.9));
            let decision = h.watcher.analyze(&session, TriggerKind::ToolOutput).await;
            assert!(decision.should_research, "trigger {i} should pass");
        }

        // 4º trigger na mesma hora: budget esgotado
        ingest_error(&h.tracker, "s9", "error: yet another failure");
        h.llm.push_reply(positive_reply("query nine", 0.9));
        let fourth = h.watcher.analyze("s9", TriggerKind::ToolOutput).await;
        assert_eq!(fourth.reason, "Global rate limit reached");

        // Uma hora (simulada) depois a janela reseta
        tokio::time::advance(Duration::from_secs(3601)).await;
        ingest_error(&h.tracker, "s10", "error: a fifth failure");
        h.llm.push_reply(positive_reply("query ten", 0.9));
        let fifth = h.watcher.analyze("s10", TriggerKind::ToolOutput).await;
        assert!(fifth.should_research);
    }

    #[tokio::test]
    async fn test_confidence_threshold_by_type() {
        let h = harness(ResearchConfig::default()).await;
        ingest_error(&h.tracker, "s1", "error: flaky test");

        // stuck: threshold = min(0.8, 0.6 + 0.1) = 0.7; confiança 0.65 reprova
        h.llm.push_reply(
            "{\"shouldResearch\": true, \"query\": \"stuck query\", \
             \"researchType\": \"stuck\", \"confidence\": 0.65, \"priority\": 5, \
             \"reason\": \"going in circles\"}",
        );
        let decision = h.watcher.analyze("s1", TriggerKind::ToolOutput).await;
        assert!(!decision.should_research);
        assert!(decision.reason.contains("below threshold"));
    }

    #[tokio::test]
    async fn test_session_local_dedup_gate() {
        let mut config = ResearchConfig::default();
        config.session_cooldown_ms = 0;
        let h = harness(config).await;

        ingest_error(&h.tracker, "s1", "error: rate limiting in FastAPI broke");
        h.tracker
            .record_research("s1", "error rate limiting in FastAPI broke");

        let decision = h.watcher.analyze("s1", TriggerKind::ToolOutput).await;
        assert!(!decision.should_research);
        assert!(decision.reason.contains("this session"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_no_research() {
        let h = harness(ResearchConfig::default()).await;
        ingest_error(&h.tracker, "s1", "error: anything");
        h.llm.set_fail(true);

        let decision = h.watcher.analyze("s1", TriggerKind::ToolOutput).await;
        assert!(!decision.should_research);
        assert_eq!(decision.reason, "Watcher LLM unavailable");
    }

    #[tokio::test]
    async fn test_quick_analyze_detects_error_pattern() {
        let h = harness(ResearchConfig::default()).await;
        ingest_error(
            &h.tracker,
            "s1",
            "Compiling app v0.1.0\nerror[E0308]: mismatched types\n --> src/main.rs:4:5",
        );

        let decision = h.watcher.quick_analyze("s1").unwrap();
        assert!(decision.should_research);
        assert_eq!(decision.research_type, ResearchType::Error);
        assert_eq!(decision.confidence, QUICK_PATH_CONFIDENCE);
        assert!(decision.query.unwrap().contains("E0308"));
    }

    #[tokio::test]
    async fn test_quick_analyze_ignores_user_prompts() {
        let h = harness(ResearchConfig::default()).await;
        h.tracker.ingest(
            "s1",
            SessionEvent::now(SessionEventKind::UserPrompt, "error: just quoting one"),
        );
        assert!(h.watcher.quick_analyze("s1").is_none());
    }
}
