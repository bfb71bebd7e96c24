// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TIPOS COMPARTILHADOS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Modelo de dados do serviço de pesquisa autônoma:
// - Finding (unidade durável de resultado de pesquisa)
// - Fragment (saída intermediária de um specialist)
// - Task (pesquisa em background na fila)
// - Plan / Evaluation / Synthesis (registros transientes do coordinator)
// - Decision (veredicto do watcher)
//
// Valores numéricos são clampados na entrada: confidence/relevance ∈ [0,1],
// priority ∈ [1,10].
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::utils::truncate_bytes;

/// Tamanho máximo do conteúdo completo de um finding (64 KiB)
pub const MAX_FINDING_CONTENT_BYTES: usize = 64 * 1024;

/// Número máximo de key points em um finding
pub const MAX_KEY_POINTS: usize = 8;

/// Confiança máxima de um finding parcial (≤ 0.3 ⇒ parcial)
pub const PARTIAL_CONFIDENCE_MAX: f32 = 0.3;

/// Clampa um score para o intervalo [0, 1]
pub fn clamp_score(value: f32) -> f32 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

/// Clampa uma prioridade para o intervalo [1, 10]
pub fn clamp_priority(value: i64) -> u8 {
    value.clamp(1, 10) as u8
}

// ─────────────────────────────────────────────────
// Depth
// ─────────────────────────────────────────────────

/// Profundidade da pesquisa - controla o budget de iterações do crew
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// 1 iteração
    Quick,
    /// 2 iterações (padrão)
    #[default]
    Medium,
    /// 4 iterações
    Deep,
}

impl Depth {
    /// Retorna o label persistido
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quick => "quick",
            Self::Medium => "medium",
            Self::Deep => "deep",
        }
    }

    /// Parse permissivo: valores desconhecidos viram `Medium`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "quick" => Self::Quick,
            "deep" => Self::Deep,
            _ => Self::Medium,
        }
    }
}

// ─────────────────────────────────────────────────
// Eventos de sessão
// ─────────────────────────────────────────────────

/// Origem de um evento de conversa
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionEventKind {
    /// Prompt digitado pelo usuário
    UserPrompt,
    /// Chamada de ferramenta do assistente
    ToolCall,
    /// Saída de ferramenta
    ToolOutput,
    /// Conteúdo injetado pelo próprio serviço
    Injection,
}

impl SessionEventKind {
    /// Label textual do evento
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPrompt => "userPrompt",
            Self::ToolCall => "toolCall",
            Self::ToolOutput => "toolOutput",
            Self::Injection => "injection",
        }
    }
}

/// Evento de conversa com timestamp, mantido no ring da sessão
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Tipo do evento
    pub kind: SessionEventKind,
    /// Conteúdo textual
    pub text: String,
    /// Momento de chegada
    pub timestamp: DateTime<Utc>,
}

impl SessionEvent {
    /// Cria um evento com timestamp atual
    pub fn now(kind: SessionEventKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Gatilho externo aceito pelo watcher (subset de `SessionEventKind`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TriggerKind {
    /// Prompt do usuário - nunca dispara pesquisa autônoma
    UserPrompt,
    /// Saída de ferramenta - candidata a pesquisa autônoma
    ToolOutput,
}

impl TriggerKind {
    /// Label textual do gatilho
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserPrompt => "userPrompt",
            Self::ToolOutput => "toolOutput",
        }
    }
}

// ─────────────────────────────────────────────────
// Resultados de busca e fragments
// ─────────────────────────────────────────────────

/// Resultado individual retornado por um tool de busca
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Título do resultado
    pub title: String,
    /// URL do resultado
    pub url: String,
    /// Snippet/descrição, quando o backend fornece
    pub snippet: Option<String>,
    /// Nome do tool que produziu o resultado
    pub source: String,
    /// Relevância estimada ∈ [0,1]
    pub relevance: f32,
    /// Metadados específicos do backend
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl SearchHit {
    /// Cria um hit com relevância clampada
    pub fn new(title: impl Into<String>, url: impl Into<String>, source: &str, relevance: f32) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: None,
            source: source.to_string(),
            relevance: clamp_score(relevance),
            metadata: None,
        }
    }

    /// Anexa um snippet
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }
}

/// Página com conteúdo extraído (scraped)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedPage {
    /// URL de origem
    pub url: String,
    /// Título extraído
    pub title: String,
    /// Texto extraído (já limpo)
    pub content: String,
}

/// Saída intermediária de um specialist em uma iteração
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fragment {
    /// Nome do specialist (`web` | `code` | `docs`)
    pub specialist: String,
    /// Resultados de busca deduplicados por URL
    pub results: Vec<SearchHit>,
    /// Conteúdos extraídos dos top resultados
    pub scraped: Vec<ScrapedPage>,
    /// Momento da coleta
    pub timestamp: DateTime<Utc>,
}

impl Fragment {
    /// Fragment vazio para um specialist (ex.: zero tools credenciados)
    pub fn empty(specialist: &str) -> Self {
        Self {
            specialist: specialist.to_string(),
            results: Vec::new(),
            scraped: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Relevância média dos resultados (0.0 quando vazio)
    pub fn mean_relevance(&self) -> f32 {
        if self.results.is_empty() {
            return 0.0;
        }
        self.results.iter().map(|r| r.relevance).sum::<f32>() / self.results.len() as f32
    }
}

// ─────────────────────────────────────────────────
// Finding
// ─────────────────────────────────────────────────

/// Fonte ordenada de um finding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindingSource {
    /// Título da fonte
    pub title: String,
    /// URL da fonte
    pub url: String,
    /// Snippet, quando disponível
    pub snippet: Option<String>,
    /// Relevância ∈ [0,1]
    pub relevance: f32,
    /// Score de qualidade atribuído pelo assessor
    pub quality: Option<f32>,
}

impl From<&SearchHit> for FindingSource {
    fn from(hit: &SearchHit) -> Self {
        Self {
            title: hit.title.clone(),
            url: hit.url.clone(),
            snippet: hit.snippet.clone(),
            relevance: clamp_score(hit.relevance),
            quality: None,
        }
    }
}

/// Unidade durável de resultado de pesquisa.
///
/// Criado pelo crew, lido por lookups posteriores, nunca mutado.
/// Findings parciais (criados durante a iteração) carregam
/// `confidence ≤ 0.3`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Id único e imutável
    pub id: Uuid,
    /// Query original
    pub query: String,
    /// Resumo curto, legível pelo assistente
    pub summary: String,
    /// Key points (≤ 8)
    pub key_points: Vec<String>,
    /// Conteúdo completo (≤ 64 KiB)
    pub content: String,
    /// Fontes ordenadas
    pub sources: Vec<FindingSource>,
    /// Domínio inferido da query (ex.: "rust", "web")
    pub domain: Option<String>,
    /// Profundidade usada
    pub depth: Depth,
    /// Confiança ∈ [0,1]
    pub confidence: f32,
    /// Momento de criação
    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Cria um finding com campos clampados/truncados na entrada
    pub fn new(query: impl Into<String>, summary: impl Into<String>, confidence: f32) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            summary: summary.into(),
            key_points: Vec::new(),
            content: String::new(),
            sources: Vec::new(),
            domain: None,
            depth: Depth::Medium,
            confidence: clamp_score(confidence),
            created_at: Utc::now(),
        }
    }

    /// Aplica os limites do modelo de dados (chamado antes de persistir)
    pub fn sanitize(&mut self) {
        self.confidence = clamp_score(self.confidence);
        self.key_points.truncate(MAX_KEY_POINTS);
        if self.content.len() > MAX_FINDING_CONTENT_BYTES {
            self.content = truncate_bytes(&self.content, MAX_FINDING_CONTENT_BYTES).to_string();
        }
        for source in &mut self.sources {
            source.relevance = clamp_score(source.relevance);
            if let Some(q) = source.quality {
                source.quality = Some(clamp_score(q));
            }
        }
    }

    /// Finding parcial de iteração ⇔ confidence ≤ 0.3
    pub fn is_partial(&self) -> bool {
        self.confidence <= PARTIAL_CONFIDENCE_MAX
    }
}

// ─────────────────────────────────────────────────
// Task
// ─────────────────────────────────────────────────

/// Estado de uma task de pesquisa em background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Aguardando admissão
    Queued,
    /// Em execução
    Running,
    /// Terminou com sucesso
    Completed,
    /// Terminou com erro (tentativas esgotadas)
    Failed,
    /// Cancelada
    Cancelled,
}

impl TaskStatus {
    /// Label persistido
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse do label persistido
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Estados terminais não aceitam novas transições
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Pesquisa explícita enfileirada para execução em background
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Id único
    pub id: Uuid,
    /// Query a pesquisar
    pub query: String,
    /// Contexto livre opcional
    pub context: Option<String>,
    /// Profundidade
    pub depth: Depth,
    /// Prioridade ∈ [1,10] (maior = primeiro)
    pub priority: u8,
    /// Estado atual
    pub status: TaskStatus,
    /// Sessão de origem, quando houver
    pub session_id: Option<String>,
    /// Label do gatilho ("user", "watcher", ...)
    pub trigger: String,
    /// Criação
    pub created_at: DateTime<Utc>,
    /// Início da execução
    pub started_at: Option<DateTime<Utc>>,
    /// Término
    pub completed_at: Option<DateTime<Utc>>,
    /// Finding final, quando concluída
    pub finding_id: Option<Uuid>,
    /// Número de tentativas já realizadas
    pub attempts: u32,
    /// Último erro, quando falhou
    pub error: Option<String>,
}

impl Task {
    /// Cria uma task `queued` com prioridade clampada
    pub fn new(query: impl Into<String>, depth: Depth, trigger: &str, priority: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            query: query.into(),
            context: None,
            depth,
            priority: clamp_priority(priority),
            status: TaskStatus::Queued,
            session_id: None,
            trigger: trigger.to_string(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            finding_id: None,
            attempts: 0,
            error: None,
        }
    }
}

// ─────────────────────────────────────────────────
// Plan / Evaluation / Synthesis (registros transientes)
// ─────────────────────────────────────────────────

/// Domínio de um specialist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecialistDomain {
    /// Busca web geral
    Web,
    /// Busca orientada a código
    Code,
    /// Busca orientada a documentação
    Docs,
}

impl SpecialistDomain {
    /// Label textual
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Code => "code",
            Self::Docs => "docs",
        }
    }

    /// Parse permissivo do label
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "web" => Some(Self::Web),
            "code" => Some(Self::Code),
            "docs" => Some(Self::Docs),
            _ => None,
        }
    }

    /// Todos os domínios, em ordem de preferência de fallback
    pub fn all() -> [Self; 3] {
        [Self::Web, Self::Code, Self::Docs]
    }
}

/// Passo de um plano: qual specialist, com qual query, em qual prioridade
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    /// Specialist alvo
    pub specialist: SpecialistDomain,
    /// Query específica do passo
    pub query: String,
    /// Prioridade ∈ [1,10]
    pub priority: u8,
}

/// Plano produzido pelo coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Estratégia geral
    pub strategy: String,
    /// Justificativa
    pub rationale: String,
    /// Passos (1..k)
    pub steps: Vec<PlanStep>,
}

/// Urgência de um pivot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PivotUrgency {
    /// Sugestão de baixo impacto
    Low,
    /// Vale considerar
    Medium,
    /// O problema formulado provavelmente está errado
    High,
}

impl PivotUrgency {
    /// Parse permissivo: valores desconhecidos viram `Low`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Sugestão do evaluator de que uma abordagem alternativa resolve melhor
/// o problema formulado
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pivot {
    /// Abordagem alternativa proposta
    pub alternative: String,
    /// Por que a alternativa é melhor
    pub reason: String,
    /// Urgência da sugestão
    pub urgency: PivotUrgency,
}

/// Avaliação de completude produzida pelo coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Se a pesquisa está completa
    pub complete: bool,
    /// Confiança da avaliação ∈ [0,1]
    pub confidence: f32,
    /// Raciocínio
    pub reasoning: String,
    /// Próximos passos propostos (vazio ⇒ parar)
    pub next_steps: Vec<PlanStep>,
    /// Pivot opcional
    pub pivot: Option<Pivot>,
}

impl Evaluation {
    /// Avaliação "completa" usada como fallback de parse
    pub fn complete_with(reasoning: impl Into<String>, confidence: f32) -> Self {
        Self {
            complete: true,
            confidence: clamp_score(confidence),
            reasoning: reasoning.into(),
            next_steps: Vec::new(),
            pivot: None,
        }
    }
}

/// Síntese final produzida pelo coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Synthesis {
    /// Resumo da resposta
    pub summary: String,
    /// Key findings (5-8 bullets)
    pub key_findings: Vec<String>,
    /// Confiança ∈ [0,1]
    pub confidence: f32,
    /// Pivot propagado, quando houver
    pub pivot: Option<Pivot>,
}

// ─────────────────────────────────────────────────
// Directive / Result do crew
// ─────────────────────────────────────────────────

/// Entrada pública do crew
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchDirective {
    /// Query a pesquisar
    pub query: String,
    /// Contexto livre opcional
    pub context: Option<String>,
    /// Budget explícito de iterações (vence o depth map)
    pub max_iterations: Option<u32>,
    /// Sessão de origem
    pub session_id: Option<String>,
    /// Profundidade (mapeada para iterações quando `max_iterations` ausente)
    pub depth: Option<Depth>,
}

impl ResearchDirective {
    /// Directive mínima com apenas a query
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }
}

/// Resultado final de uma invocação do crew
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Finding final persistido (None quando a persistência falhou)
    pub finding_id: Option<Uuid>,
    /// Query original
    pub query: String,
    /// Resumo sintetizado
    pub summary: String,
    /// Key findings
    pub key_findings: Vec<String>,
    /// Até 10 fontes deduplicadas por URL
    pub sources: Vec<FindingSource>,
    /// Confiança final ∈ [0,1]
    pub confidence: f32,
    /// Iterações executadas
    pub iterations: u32,
    /// Tokens estimados (⌈len/4⌉ sobre texto emitido)
    pub estimated_tokens: u64,
    /// Duração total em ms
    pub duration_ms: u64,
    /// Pivot capturado durante a iteração (o mais recente vence)
    pub pivot: Option<Pivot>,
}

// ─────────────────────────────────────────────────
// Decision do watcher
// ─────────────────────────────────────────────────

/// Tipo de pesquisa identificado pelo watcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchType {
    /// Erro detectado na conversa
    Error,
    /// Sessão travada no mesmo foco
    Stuck,
    /// API desconhecida mencionada
    UnknownApi,
    /// Pesquisa proativa
    Proactive,
    /// Pedido direto
    Direct,
}

impl ResearchType {
    /// Label textual
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Stuck => "stuck",
            Self::UnknownApi => "unknown_api",
            Self::Proactive => "proactive",
            Self::Direct => "direct",
        }
    }

    /// Parse permissivo: valores desconhecidos viram `Proactive`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "error" => Self::Error,
            "stuck" => Self::Stuck,
            "unknown_api" => Self::UnknownApi,
            "direct" => Self::Direct,
            _ => Self::Proactive,
        }
    }
}

/// Veredicto do watcher sobre disparar pesquisa autônoma
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    /// Se deve pesquisar
    pub should_research: bool,
    /// Query sugerida, quando deve pesquisar
    pub query: Option<String>,
    /// Tipo identificado
    pub research_type: ResearchType,
    /// Confiança ∈ [0,1]
    pub confidence: f32,
    /// Prioridade sugerida ∈ [1,10]
    pub priority: u8,
    /// Razão da decisão (sempre presente, inclusive nos no-research)
    pub reason: String,
    /// Dica de abordagem alternativa
    pub alternative_hint: Option<String>,
    /// O que está bloqueando a sessão, quando identificado
    pub blocked_by: Option<String>,
}

impl Decision {
    /// Decisão negativa com razão declarada
    pub fn no_research(reason: impl Into<String>) -> Self {
        Self {
            should_research: false,
            query: None,
            research_type: ResearchType::Proactive,
            confidence: 0.0,
            priority: 1,
            reason: reason.into(),
            alternative_hint: None,
            blocked_by: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(1.5), 1.0);
        assert_eq!(clamp_score(-0.2), 0.0);
        assert_eq!(clamp_score(f32::NAN), 0.0);
        assert_eq!(clamp_score(0.42), 0.42);
    }

    #[test]
    fn test_clamp_priority() {
        assert_eq!(clamp_priority(0), 1);
        assert_eq!(clamp_priority(99), 10);
        assert_eq!(clamp_priority(7), 7);
    }

    #[test]
    fn test_depth_parse_permissive() {
        assert_eq!(Depth::parse("quick"), Depth::Quick);
        assert_eq!(Depth::parse("DEEP"), Depth::Deep);
        assert_eq!(Depth::parse("anything"), Depth::Medium);
    }

    #[test]
    fn test_finding_sanitize_limits() {
        let mut finding = Finding::new("q", "s", 2.0);
        finding.key_points = (0..12).map(|i| format!("point {i}")).collect();
        finding.content = "x".repeat(MAX_FINDING_CONTENT_BYTES + 100);
        finding.sources.push(FindingSource {
            title: "t".into(),
            url: "https://example.com".into(),
            snippet: None,
            relevance: 3.0,
            quality: Some(-1.0),
        });

        finding.sanitize();

        assert_eq!(finding.confidence, 1.0);
        assert_eq!(finding.key_points.len(), MAX_KEY_POINTS);
        assert_eq!(finding.content.len(), MAX_FINDING_CONTENT_BYTES);
        assert_eq!(finding.sources[0].relevance, 1.0);
        assert_eq!(finding.sources[0].quality, Some(0.0));
    }

    #[test]
    fn test_finding_is_partial() {
        assert!(Finding::new("q", "s", 0.2).is_partial());
        assert!(Finding::new("q", "s", 0.3).is_partial());
        assert!(!Finding::new("q", "s", 0.31).is_partial());
    }

    #[test]
    fn test_task_status_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_task_status_roundtrip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::Running,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_specialist_domain_parse() {
        assert_eq!(SpecialistDomain::parse(" Web "), Some(SpecialistDomain::Web));
        assert_eq!(SpecialistDomain::parse("CODE"), Some(SpecialistDomain::Code));
        assert_eq!(SpecialistDomain::parse("unknown"), None);
    }

    #[test]
    fn test_fragment_mean_relevance() {
        let mut fragment = Fragment::empty("web");
        assert_eq!(fragment.mean_relevance(), 0.0);

        fragment.results.push(SearchHit::new("a", "https://a", "t", 0.8));
        fragment.results.push(SearchHit::new("b", "https://b", "t", 0.4));
        assert!((fragment.mean_relevance() - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_pivot_urgency_parse() {
        assert_eq!(PivotUrgency::parse("HIGH"), PivotUrgency::High);
        assert_eq!(PivotUrgency::parse("medium"), PivotUrgency::Medium);
        assert_eq!(PivotUrgency::parse("whatever"), PivotUrgency::Low);
    }

    #[test]
    fn test_decision_no_research() {
        let decision = Decision::no_research("Cooldown active");
        assert!(!decision.should_research);
        assert_eq!(decision.reason, "Cooldown active");
    }
}
