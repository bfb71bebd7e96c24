// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// COORDINATOR - PLAN / EVALUATE / SYNTHESIZE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Três operações, cada uma um prompt ao LLM com gramática textual de campos
// rotulados, parseada defensivamente: seções podem vir reordenadas, campos
// desconhecidos são ignorados, numéricos são clampados e campos ausentes
// recebem defaults.
//
// Toda operação tem fallback sem LLM:
// - plan     → um passo por specialist disponível, prioridade decrescente
// - evaluate → completa
// - synthesize → síntese mecânica a partir dos top resultados
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::llm::{LlmClient, QueryOptions};
use crate::types::{
    clamp_priority, clamp_score, Evaluation, Finding, Fragment, Pivot, PivotUrgency, Plan,
    PlanStep, ResearchDirective, SpecialistDomain, Synthesis,
};
use crate::utils::{first_sentence, truncate_bytes};

/// Relevância média acima da qual a avaliação retorna completa sem LLM
pub const COMPLETION_THRESHOLD: f32 = 0.85;

/// Máximo de findings prévios incluídos no prompt de planejamento
const MAX_PRIOR_KNOWLEDGE: usize = 3;

/// Corpos extraídos incluídos por specialist no prompt de síntese
const SCRAPED_PER_SPECIALIST: usize = 2;

/// Teto de bytes por corpo extraído no prompt de síntese
const SCRAPED_BODY_BYTES: usize = 1500;

static STEP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)specialist:\s*(\w+)\s+query:\s*"([^"]+)"\s+priority:\s*(\d+)"#)
        .expect("step regex")
});

static CODE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(code|crate|cargo|npm|pip|librar(y|ies)|package|function|method|compil\w*|error|exception|panic|traceback|stack trace|github|repo|bug|rust|python|javascript|typescript|golang|java|sdk|framework|api)\b",
    )
    .expect("code regex")
});

static DOCS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(documentation|docs|tutorial|guide|reference|manual|specification|rfc|paper|standard|how to|what is|explain|definition|concept)\b",
    )
    .expect("docs regex")
});

static WEB_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(news|latest|recent|compare|comparison|best|versus|vs|price|pricing|release|announcement|blog|community|opinion)\b",
    )
    .expect("web regex")
});

/// Heurística de roteamento: keywords → domínios.
///
/// Sem match, cai no specialist web geral; se o web também não está
/// disponível, fan-out para todos os disponíveis.
pub fn select_specialists(
    query: &str,
    available: &[SpecialistDomain],
) -> Vec<SpecialistDomain> {
    let mut selected = Vec::new();

    if CODE_RE.is_match(query) && available.contains(&SpecialistDomain::Code) {
        selected.push(SpecialistDomain::Code);
    }
    if DOCS_RE.is_match(query) && available.contains(&SpecialistDomain::Docs) {
        selected.push(SpecialistDomain::Docs);
    }
    if WEB_RE.is_match(query) && available.contains(&SpecialistDomain::Web) {
        selected.push(SpecialistDomain::Web);
    }

    if selected.is_empty() {
        if available.contains(&SpecialistDomain::Web) {
            selected.push(SpecialistDomain::Web);
        } else {
            selected.extend_from_slice(available);
        }
    }

    selected
}

/// Coordinator: planeja, avalia e sintetiza em torno dos specialists
pub struct Coordinator {
    llm: Arc<dyn LlmClient>,
}

impl Coordinator {
    /// Cria o coordinator sobre um gateway LLM
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    // ─────────────────────────────────────────────────
    // Plan
    // ─────────────────────────────────────────────────

    /// Produz um plano de pesquisa. Em falha de LLM ou de parse, retorna o
    /// plano fallback: um passo por specialist disponível, prioridade
    /// decrescente.
    pub async fn plan(
        &self,
        directive: &ResearchDirective,
        prior_knowledge: &[Finding],
        available: &[SpecialistDomain],
    ) -> Plan {
        let prompt = build_plan_prompt(directive, prior_knowledge, available);
        let opts = QueryOptions {
            max_tokens: 1024,
            temperature: 0.4,
        };

        match self.llm.query(&prompt, &opts).await {
            Ok(reply) => match parse_plan(&reply.text, available) {
                Some(plan) => {
                    log::info!("✅ Plano gerado: {} passos", plan.steps.len());
                    plan
                }
                None => {
                    log::warn!("⚠️ Resposta de plano não parseável, usando plano fallback");
                    fallback_plan(&directive.query, available)
                }
            },
            Err(e) => {
                log::warn!("⚠️ LLM falhou no planejamento ({e}), usando plano fallback");
                fallback_plan(&directive.query, available)
            }
        }
    }

    // ─────────────────────────────────────────────────
    // Evaluate
    // ─────────────────────────────────────────────────

    /// Avalia a completude da pesquisa sobre os fragments acumulados.
    ///
    /// Early-exit: com ≥ 2 fragments e relevância média dos resultados acima
    /// de `COMPLETION_THRESHOLD`, retorna completa sem chamar o LLM.
    /// Falha de parse ⇒ completa.
    pub async fn evaluate(
        &self,
        directive: &ResearchDirective,
        fragments: &[Fragment],
    ) -> Evaluation {
        if fragments.len() >= 2 {
            let mean = mean_result_relevance(fragments);
            if mean > COMPLETION_THRESHOLD {
                log::debug!("evaluate early-exit: relevância média {mean:.2}");
                return Evaluation::complete_with(
                    format!("Mean result relevance {mean:.2} above completion threshold"),
                    mean,
                );
            }
        }

        let prompt = build_evaluate_prompt(directive, fragments);
        let opts = QueryOptions {
            max_tokens: 1024,
            temperature: 0.2,
        };

        match self.llm.query(&prompt, &opts).await {
            Ok(reply) => parse_evaluation(&reply.text).unwrap_or_else(|| {
                log::warn!("⚠️ Resposta de avaliação não parseável, tratando como completa");
                Evaluation::complete_with("Unparseable evaluation reply", 0.5)
            }),
            Err(e) => {
                log::warn!("⚠️ LLM falhou na avaliação ({e}), tratando como completa");
                Evaluation::complete_with(format!("Evaluation unavailable: {e}"), 0.5)
            }
        }
    }

    // ─────────────────────────────────────────────────
    // Synthesize
    // ─────────────────────────────────────────────────

    /// Sintetiza a resposta final. Em falha, constrói uma síntese mecânica
    /// a partir dos top resultados (confiança ≤ 0.4).
    pub async fn synthesize(
        &self,
        directive: &ResearchDirective,
        fragments: &[Fragment],
        pivot: Option<&Pivot>,
    ) -> Synthesis {
        let prompt = build_synthesize_prompt(directive, fragments);
        let opts = QueryOptions {
            max_tokens: 2048,
            temperature: 0.3,
        };

        let mut synthesis = match self.llm.query(&prompt, &opts).await {
            Ok(reply) => parse_synthesis(&reply.text).unwrap_or_else(|| {
                log::warn!("⚠️ Resposta de síntese não parseável, usando síntese mecânica");
                mechanical_synthesis(directive, fragments)
            }),
            Err(e) => {
                log::warn!("⚠️ LLM falhou na síntese ({e}), usando síntese mecânica");
                mechanical_synthesis(directive, fragments)
            }
        };

        if synthesis.pivot.is_none() {
            synthesis.pivot = pivot.cloned();
        }
        synthesis
    }
}

/// Relevância média de todos os resultados de todos os fragments
fn mean_result_relevance(fragments: &[Fragment]) -> f32 {
    let mut sum = 0.0f32;
    let mut count = 0usize;
    for fragment in fragments {
        for result in &fragment.results {
            sum += result.relevance;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f32
    }
}

/// Plano fallback: um passo por specialist disponível, prioridade
/// decrescente a partir de 9
pub fn fallback_plan(query: &str, available: &[SpecialistDomain]) -> Plan {
    let steps = available
        .iter()
        .enumerate()
        .map(|(i, domain)| PlanStep {
            specialist: *domain,
            query: query.to_string(),
            priority: clamp_priority(9 - i as i64),
        })
        .collect();

    Plan {
        strategy: "broad fan-out".to_string(),
        rationale: "Planner unavailable; querying every available specialist".to_string(),
        steps,
    }
}

// ─────────────────────────────────────────────────
// Prompts
// ─────────────────────────────────────────────────

fn build_plan_prompt(
    directive: &ResearchDirective,
    prior_knowledge: &[Finding],
    available: &[SpecialistDomain],
) -> String {
    let specialists = available
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    let mut prompt = format!(
        "You are the research planner of a coding assistant.\n\
         Research request: {}\n",
        directive.query
    );

    if let Some(context) = &directive.context {
        prompt.push_str(&format!("Context: {}\n", truncate_bytes(context, 2000)));
    }

    if !prior_knowledge.is_empty() {
        prompt.push_str("\nPrior related findings:\n");
        for finding in prior_knowledge.iter().take(MAX_PRIOR_KNOWLEDGE) {
            let age_hours =
                (chrono::Utc::now() - finding.created_at).num_minutes() as f32 / 60.0;
            prompt.push_str(&format!(
                "- query: {} | summary: {} | age: {:.1}h | confidence: {:.2}\n",
                finding.query,
                truncate_bytes(&finding.summary, 300),
                age_hours,
                finding.confidence,
            ));
        }
    }

    prompt.push_str(&format!(
        "\nAvailable specialists: {specialists}\n\
         Produce a search plan. Reply EXACTLY in this format:\n\
         STRATEGY: <one line>\n\
         RATIONALE: <one line>\n\
         STEPS:\n\
         - specialist:<name> query:\"<search query>\" priority:<1-10>\n\
         Use only the available specialists. 1 to 4 steps.\n"
    ));

    prompt
}

fn format_fragments(fragments: &[Fragment], with_bodies: bool) -> String {
    let mut output = String::new();
    for fragment in fragments {
        output.push_str(&format!("## specialist {}\n", fragment.specialist));
        for result in fragment.results.iter().take(8) {
            output.push_str(&format!(
                "- {} | {} | relevance {:.2}\n",
                result.title, result.url, result.relevance
            ));
            if let Some(snippet) = &result.snippet {
                output.push_str(&format!("  {}\n", truncate_bytes(snippet, 300)));
            }
        }
        if with_bodies {
            for page in fragment.scraped.iter().take(SCRAPED_PER_SPECIALIST) {
                output.push_str(&format!(
                    "### content from {}\n{}\n",
                    page.url,
                    truncate_bytes(&page.content, SCRAPED_BODY_BYTES)
                ));
            }
        }
    }
    output
}

fn build_evaluate_prompt(directive: &ResearchDirective, fragments: &[Fragment]) -> String {
    format!(
        "You are evaluating whether collected research answers the request.\n\
         Request: {}\n\n\
         Collected so far:\n{}\n\
         Reply EXACTLY in this format:\n\
         COMPLETE: <true|false>\n\
         CONFIDENCE: <0.0-1.0>\n\
         REASONING: <one line>\n\
         NEXT_STEPS:\n\
         - specialist:<web|code|docs> query:\"<refined query>\" priority:<1-10>\n\
         PIVOT: alternative: <different approach> reason: <why> urgency: <low|medium|high>\n\
         NEXT_STEPS may be empty when COMPLETE is true. Include PIVOT only when the \
         phrased problem is better solved another way.\n",
        directive.query,
        format_fragments(fragments, false),
    )
}

fn build_synthesize_prompt(directive: &ResearchDirective, fragments: &[Fragment]) -> String {
    format!(
        "Synthesize the research below into an answer for a coding assistant.\n\
         Request: {}\n\n\
         Research material:\n{}\n\
         Reply EXACTLY in this format:\n\
         SUMMARY: <short paragraph>\n\
         KEY_FINDINGS:\n\
         - <finding>\n\
         CONFIDENCE: <0.0-1.0>\n\
         Produce 5 to 8 key findings.\n",
        directive.query,
        format_fragments(fragments, true),
    )
}

// ─────────────────────────────────────────────────
// Parsers defensivos
// ─────────────────────────────────────────────────

/// Extrai o valor de um campo rotulado `LABEL: valor` (case-insensitive,
/// em qualquer linha)
fn labeled_field(text: &str, label: &str) -> Option<String> {
    let needle = format!("{}:", label.to_ascii_uppercase());
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.to_ascii_uppercase().starts_with(&needle) {
            let value = trimmed[needle.len()..].trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Extrai passos `- specialist:<name> query:"..." priority:<n>` de uma seção
fn parse_steps(section: &str, available: &[SpecialistDomain]) -> Vec<PlanStep> {
    STEP_RE
        .captures_iter(section)
        .filter_map(|caps| {
            let domain = SpecialistDomain::parse(&caps[1])?;
            if !available.is_empty() && !available.contains(&domain) {
                return None;
            }
            let priority = caps[3].parse::<i64>().unwrap_or(5);
            Some(PlanStep {
                specialist: domain,
                query: caps[2].to_string(),
                priority: clamp_priority(priority),
            })
        })
        .collect()
}

/// Fatia do texto entre um rótulo e o próximo rótulo conhecido
fn section_after<'a>(text: &'a str, label: &str, next_labels: &[&str]) -> Option<&'a str> {
    // ASCII-uppercase preserva comprimento em bytes, mantendo os offsets
    // válidos sobre o texto original
    let upper = text.to_ascii_uppercase();
    let start = upper.find(&format!("{}:", label.to_ascii_uppercase()))?;
    let tail_start = start + label.len() + 1;
    let mut end = text.len();
    for next in next_labels {
        if let Some(pos) = upper[tail_start..].find(&format!("{}:", next.to_ascii_uppercase())) {
            end = end.min(tail_start + pos);
        }
    }
    text.get(tail_start..end)
}

fn parse_plan(text: &str, available: &[SpecialistDomain]) -> Option<Plan> {
    let steps_section =
        section_after(text, "STEPS", &["STRATEGY", "RATIONALE"]).unwrap_or(text);
    let steps = parse_steps(steps_section, available);
    if steps.is_empty() {
        return None;
    }

    Some(Plan {
        strategy: labeled_field(text, "STRATEGY").unwrap_or_else(|| "direct search".to_string()),
        rationale: labeled_field(text, "RATIONALE").unwrap_or_default(),
        steps,
    })
}

fn parse_pivot(text: &str) -> Option<Pivot> {
    let section = section_after(
        text,
        "PIVOT",
        &["COMPLETE", "CONFIDENCE", "REASONING", "NEXT_STEPS", "SUMMARY", "KEY_FINDINGS"],
    )?;
    let lower = section.to_ascii_lowercase();

    let alternative_start = lower.find("alternative:")? + "alternative:".len();
    let reason_pos = lower.find("reason:").filter(|pos| *pos >= alternative_start);
    let urgency_pos = lower.find("urgency:").filter(|pos| *pos >= alternative_start);

    let alternative_end = reason_pos.or(urgency_pos).unwrap_or(section.len());
    let alternative = section[alternative_start..alternative_end].trim().to_string();
    if alternative.is_empty() {
        return None;
    }

    let reason = reason_pos
        .map(|pos| {
            let start = pos + "reason:".len();
            let end = urgency_pos.filter(|u| *u > pos).unwrap_or(section.len());
            section[start..end].trim().to_string()
        })
        .unwrap_or_default();

    let urgency = urgency_pos
        .map(|pos| {
            let tail = &section[pos + "urgency:".len()..];
            PivotUrgency::parse(tail.trim().lines().next().unwrap_or(""))
        })
        .unwrap_or(PivotUrgency::Low);

    Some(Pivot {
        alternative,
        reason,
        urgency,
    })
}

fn parse_evaluation(text: &str) -> Option<Evaluation> {
    let complete_raw = labeled_field(text, "COMPLETE")?;
    let complete = complete_raw.to_lowercase().starts_with("true")
        || complete_raw.to_lowercase().starts_with("yes");

    let confidence = labeled_field(text, "CONFIDENCE")
        .and_then(|raw| raw.split_whitespace().next().map(str::to_string))
        .and_then(|raw| raw.parse::<f32>().ok())
        .map(clamp_score)
        .unwrap_or(0.5);

    let reasoning = labeled_field(text, "REASONING").unwrap_or_default();

    let next_steps = section_after(text, "NEXT_STEPS", &["PIVOT", "COMPLETE", "CONFIDENCE", "REASONING"])
        .map(|section| parse_steps(section, &[]))
        .unwrap_or_default();

    Some(Evaluation {
        complete,
        confidence,
        reasoning,
        next_steps,
        pivot: parse_pivot(text),
    })
}

fn parse_synthesis(text: &str) -> Option<Synthesis> {
    let summary = section_after(text, "SUMMARY", &["KEY_FINDINGS", "CONFIDENCE", "PIVOT"])
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())?;

    let key_findings = section_after(text, "KEY_FINDINGS", &["SUMMARY", "CONFIDENCE", "PIVOT"])
        .map(|section| {
            section
                .lines()
                .filter_map(|line| {
                    let trimmed = line.trim();
                    trimmed
                        .strip_prefix("- ")
                        .or_else(|| trimmed.strip_prefix("* "))
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                })
                .take(crate::types::MAX_KEY_POINTS)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    let confidence = labeled_field(text, "CONFIDENCE")
        .and_then(|raw| raw.split_whitespace().next().map(str::to_string))
        .and_then(|raw| raw.parse::<f32>().ok())
        .map(clamp_score)
        .unwrap_or(0.5);

    Some(Synthesis {
        summary,
        key_findings,
        confidence,
        pivot: parse_pivot(text),
    })
}

/// Síntese mecânica a partir dos top resultados, sem LLM.
///
/// Confiança 0.3 quando alguma fonte existe, 0.0 quando nada foi coletado.
pub fn mechanical_synthesis(directive: &ResearchDirective, fragments: &[Fragment]) -> Synthesis {
    let mut top: Vec<_> = fragments.iter().flat_map(|f| f.results.iter()).collect();
    top.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    if top.is_empty() {
        return Synthesis {
            summary: String::new(),
            key_findings: Vec::new(),
            confidence: 0.0,
            pivot: None,
        };
    }

    let lead = fragments
        .iter()
        .flat_map(|f| f.scraped.iter())
        .next()
        .map(|page| first_sentence(&page.content).to_string())
        .unwrap_or_default();

    let summary = format!(
        "Top sources for \"{}\": {}. {}",
        directive.query,
        top.iter()
            .take(3)
            .map(|hit| hit.title.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        lead
    )
    .trim()
    .to_string();

    let key_findings = top
        .iter()
        .take(5)
        .map(|hit| match &hit.snippet {
            Some(snippet) => format!("{}: {}", hit.title, truncate_bytes(snippet, 200)),
            None => hit.title.clone(),
        })
        .collect();

    Synthesis {
        summary,
        key_findings,
        confidence: 0.3,
        pivot: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::types::SearchHit;

    fn directive(query: &str) -> ResearchDirective {
        ResearchDirective::new(query)
    }

    fn fragment_with_relevance(specialist: &str, relevances: &[f32]) -> Fragment {
        let mut fragment = Fragment::empty(specialist);
        for (i, relevance) in relevances.iter().enumerate() {
            fragment.results.push(SearchHit::new(
                format!("result {i}"),
                format!("https://{specialist}{i}.example"),
                specialist,
                *relevance,
            ));
        }
        fragment
    }

    #[test]
    fn test_select_specialists_routing() {
        let all = SpecialistDomain::all();
        let selected = select_specialists("rust crate panic in tokio", &all);
        assert!(selected.contains(&SpecialistDomain::Code));

        let selected = select_specialists("official documentation reference", &all);
        assert!(selected.contains(&SpecialistDomain::Docs));

        // Sem match: cai no web
        let selected = select_specialists("zanzibar weather", &all);
        assert_eq!(selected, vec![SpecialistDomain::Web]);

        // Sem match e sem web: todos os disponíveis
        let no_web = [SpecialistDomain::Code, SpecialistDomain::Docs];
        let selected = select_specialists("zanzibar weather", &no_web);
        assert_eq!(selected, no_web.to_vec());
    }

    #[test]
    fn test_parse_plan_labeled_grammar() {
        let reply = "STRATEGY: split by ecosystem\n\
                     RATIONALE: the question spans two stacks\n\
                     STEPS:\n\
                     - specialist:code query:\"tokio channel backpressure\" priority:9\n\
                     - specialist:docs query:\"tokio sync docs\" priority:40\n";
        let plan = parse_plan(reply, &SpecialistDomain::all()).unwrap();
        assert_eq!(plan.strategy, "split by ecosystem");
        assert_eq!(plan.steps.len(), 2);
        assert_eq!(plan.steps[0].specialist, SpecialistDomain::Code);
        // Prioridade fora do range é clampada
        assert_eq!(plan.steps[1].priority, 10);
    }

    #[test]
    fn test_parse_plan_unparseable_returns_none() {
        assert!(parse_plan("I could not help with that.", &SpecialistDomain::all()).is_none());
    }

    #[test]
    fn test_fallback_plan_decreasing_priority() {
        let plan = fallback_plan("q", &SpecialistDomain::all());
        assert_eq!(plan.steps.len(), 3);
        assert!(plan.steps[0].priority > plan.steps[1].priority);
        assert!(plan.steps[1].priority > plan.steps[2].priority);
    }

    #[test]
    fn test_parse_evaluation_with_pivot() {
        let reply = "COMPLETE: false\n\
                     CONFIDENCE: 0.6\n\
                     REASONING: missing benchmark data\n\
                     NEXT_STEPS:\n\
                     - specialist:web query:\"actix vs axum benchmark\" priority:7\n\
                     PIVOT: alternative: use library Y reason: native support urgency: high\n";
        let evaluation = parse_evaluation(reply).unwrap();
        assert!(!evaluation.complete);
        assert_eq!(evaluation.next_steps.len(), 1);
        let pivot = evaluation.pivot.unwrap();
        assert_eq!(pivot.alternative, "use library Y");
        assert_eq!(pivot.urgency, PivotUrgency::High);
    }

    #[test]
    fn test_parse_evaluation_reordered_fields() {
        let reply = "REASONING: enough coverage\nCONFIDENCE: 1.7\nCOMPLETE: true\n";
        let evaluation = parse_evaluation(reply).unwrap();
        assert!(evaluation.complete);
        // Clampado
        assert_eq!(evaluation.confidence, 1.0);
        assert!(evaluation.next_steps.is_empty());
    }

    #[test]
    fn test_parse_synthesis() {
        let reply = "SUMMARY: Use tokio::select with cancellation tokens.\n\
                     KEY_FINDINGS:\n\
                     - select! races branches\n\
                     - cancellation tokens propagate shutdown\n\
                     CONFIDENCE: 0.9\n";
        let synthesis = parse_synthesis(reply).unwrap();
        assert!(synthesis.summary.contains("tokio::select"));
        assert_eq!(synthesis.key_findings.len(), 2);
        assert_eq!(synthesis.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_evaluate_early_exit_without_llm() {
        // LLM em modo falha: o early-exit não deve tocá-lo
        let llm = Arc::new(MockLlmClient::new());
        llm.set_fail(true);
        let coordinator = Coordinator::new(llm);

        let fragments = vec![
            fragment_with_relevance("web", &[0.95, 0.9]),
            fragment_with_relevance("code", &[0.92]),
        ];
        let evaluation = coordinator.evaluate(&directive("q"), &fragments).await;
        assert!(evaluation.complete);
        assert!(evaluation.confidence > COMPLETION_THRESHOLD);
    }

    #[tokio::test]
    async fn test_evaluate_parse_failure_treated_as_complete() {
        let llm = Arc::new(MockLlmClient::new().with_default_reply("gibberish"));
        let coordinator = Coordinator::new(llm);
        let fragments = vec![fragment_with_relevance("web", &[0.4])];
        let evaluation = coordinator.evaluate(&directive("q"), &fragments).await;
        assert!(evaluation.complete);
    }

    #[tokio::test]
    async fn test_plan_falls_back_on_llm_failure() {
        let llm = Arc::new(MockLlmClient::new());
        llm.set_fail(true);
        let coordinator = Coordinator::new(llm);
        let plan = coordinator
            .plan(&directive("q"), &[], &SpecialistDomain::all())
            .await;
        assert_eq!(plan.steps.len(), 3);
    }

    #[tokio::test]
    async fn test_synthesize_mechanical_fallback() {
        let llm = Arc::new(MockLlmClient::new());
        llm.set_fail(true);
        let coordinator = Coordinator::new(llm);

        let fragments = vec![fragment_with_relevance("web", &[0.9, 0.7])];
        let synthesis = coordinator
            .synthesize(&directive("tokio runtime"), &fragments, None)
            .await;
        assert!(!synthesis.summary.is_empty());
        assert!(synthesis.confidence <= 0.4);
    }

    #[tokio::test]
    async fn test_synthesize_carries_forward_pivot() {
        let llm = Arc::new(MockLlmClient::new().with_default_reply(
            "SUMMARY: done\nKEY_FINDINGS:\n- a\nCONFIDENCE: 0.8\n",
        ));
        let coordinator = Coordinator::new(llm);

        let pivot = Pivot {
            alternative: "use library Y".to_string(),
            reason: "simpler".to_string(),
            urgency: PivotUrgency::High,
        };
        let synthesis = coordinator
            .synthesize(&directive("q"), &[], Some(&pivot))
            .await;
        assert_eq!(synthesis.pivot.unwrap().alternative, "use library Y");
    }

    #[test]
    fn test_mechanical_synthesis_empty_when_no_sources() {
        let synthesis = mechanical_synthesis(&directive("q"), &[]);
        assert!(synthesis.summary.is_empty());
        assert_eq!(synthesis.confidence, 0.0);
    }
}
