// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CREW - LOOP ITERATIVO DE PESQUISA
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Entrada pública: `explore(directive)`. Planeja com o coordinator,
// despacha specialists em paralelo (modo sequencial por prioridade é
// suportado), persiste fragments como findings parciais, reavalia com os
// fragments ACUMULADOS e termina por completude, confiança ou ausência de
// próximos passos. A síntese final vira um finding persistido, embedado e
// entregue ao memory bridge (falhas de embed/inject são não-fatais).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::CrewConfig;
use crate::coordinator::{select_specialists, Coordinator};
use crate::events::{EventBus, ServiceEvent};
use crate::memory_bridge::MemoryBridge;
use crate::persistence::{SemanticIndex, Store};
use crate::specialist::{Specialist, SpecialistRequest};
use crate::types::{
    Depth, Finding, FindingSource, Fragment, Pivot, PlanStep, ResearchDirective, ResearchResult,
    SpecialistDomain,
};
use crate::utils::{estimate_tokens, normalize_url};

/// Findings prévios carregados como prior knowledge
const PRIOR_KNOWLEDGE_LIMIT: usize = 5;

/// Teto de fontes no resultado final
const MAX_RESULT_SOURCES: usize = 10;

/// Confiança atribuída a findings parciais de iteração
const PARTIAL_CONFIDENCE: f32 = 0.2;

/// Confiança de avaliação acima da qual o loop termina
const CONFIDENCE_STOP: f32 = 0.85;

/// Erros do crew
#[derive(Debug, thiserror::Error)]
pub enum CrewError {
    /// Entrada inválida (ex.: query vazia)
    #[error("Validation error: {0}")]
    Validation(String),
}

static DOMAIN_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)\brust|cargo|crate|tokio|borrow\b", "rust"),
        (r"(?i)\bpython|pip|django|fastapi|asyncio\b", "python"),
        (r"(?i)\bjavascript|typescript|node|npm|react|vue\b", "javascript"),
        (r"(?i)\bsql|database|postgres|sqlite|redis|mongo\b", "database"),
        (r"(?i)\bdocker|kubernetes|deploy|terraform|ci/?cd\b", "infra"),
        (r"(?i)\bhttp|rest|grpc|websocket|css|html|frontend\b", "web"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("domain regex"), label))
    .collect()
});

/// Infere um tag de domínio por regex sobre a query
pub fn infer_domain(query: &str) -> Option<String> {
    DOMAIN_PATTERNS
        .iter()
        .find(|(regex, _)| regex.is_match(query))
        .map(|(_, label)| (*label).to_string())
}

/// Deduplica fontes por URL normalizada, preservando o representante de
/// maior relevância. Idempotente.
pub fn deduplicate_sources(mut sources: Vec<FindingSource>) -> Vec<FindingSource> {
    sources.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut seen = std::collections::HashSet::new();
    sources.retain(|source| seen.insert(normalize_url(&source.url)));
    sources
}

/// Crew: coordenador iterativo de pesquisa
pub struct Crew {
    coordinator: Coordinator,
    specialists: HashMap<SpecialistDomain, Arc<Specialist>>,
    store: Arc<Store>,
    index: Arc<SemanticIndex>,
    bridge: Arc<MemoryBridge>,
    events: EventBus,
    config: CrewConfig,
}

impl Crew {
    /// Cria o crew com os specialists registrados
    pub fn new(
        coordinator: Coordinator,
        specialists: Vec<Specialist>,
        store: Arc<Store>,
        index: Arc<SemanticIndex>,
        bridge: Arc<MemoryBridge>,
        events: EventBus,
        config: CrewConfig,
    ) -> Self {
        let specialists = specialists
            .into_iter()
            .map(|s| (s.domain(), Arc::new(s)))
            .collect();
        Self {
            coordinator,
            specialists,
            store,
            index,
            bridge,
            events,
            config,
        }
    }

    /// Domínios com specialist registrado
    pub fn available_domains(&self) -> Vec<SpecialistDomain> {
        SpecialistDomain::all()
            .into_iter()
            .filter(|d| self.specialists.contains_key(d))
            .collect()
    }

    /// Resolve o budget de iterações: `max_iterations` explícito vence;
    /// senão o depth map; senão o default.
    fn iteration_budget(&self, directive: &ResearchDirective) -> u32 {
        if let Some(explicit) = directive.max_iterations {
            return explicit;
        }
        if let Some(depth) = directive.depth {
            return self.config.iterations_for(depth);
        }
        self.config.default_max_iterations
    }

    /// Executa uma pesquisa completa e retorna o resultado sintetizado
    pub async fn explore(
        &self,
        directive: ResearchDirective,
    ) -> Result<ResearchResult, CrewError> {
        if directive.query.trim().is_empty() {
            return Err(CrewError::Validation("empty query".to_string()));
        }

        let started = Instant::now();
        let budget = self.iteration_budget(&directive);
        let depth = directive.depth.unwrap_or_default();

        if budget == 0 {
            return Ok(ResearchResult {
                finding_id: None,
                query: directive.query,
                summary: String::new(),
                key_findings: Vec::new(),
                sources: Vec::new(),
                confidence: 0.0,
                iterations: 0,
                estimated_tokens: 0,
                duration_ms: started.elapsed().as_millis() as u64,
                pivot: None,
            });
        }

        // Prior knowledge: findings relacionados (falha → sem priors)
        let prior_knowledge = self
            .index
            .find_related_findings(&directive.query, PRIOR_KNOWLEDGE_LIMIT)
            .await
            .unwrap_or_else(|e| {
                log::warn!("⚠️ Prior knowledge indisponível: {e}");
                Vec::new()
            });

        let routed = select_specialists(&directive.query, &self.available_domains());
        let plan = self
            .coordinator
            .plan(&directive, &prior_knowledge, &routed)
            .await;
        log::info!(
            "🔍 explore \"{}\": budget {} iterações, {} passos",
            directive.query,
            budget,
            plan.steps.len()
        );

        let mut steps = plan.steps;
        let mut accumulated: Vec<Fragment> = Vec::new();
        let mut pivot: Option<Pivot> = None;
        let mut iterations = 0u32;

        for iteration in 1..=budget {
            iterations = iteration;
            self.events.emit(ServiceEvent::IterationStart { iteration });

            let fragments = self.dispatch(&steps).await;
            self.events.emit(ServiceEvent::IterationComplete { iteration });

            for fragment in &fragments {
                self.persist_partial(&directive, fragment, depth).await;
            }
            accumulated.extend(fragments);

            let evaluation = self.coordinator.evaluate(&directive, &accumulated).await;

            if let Some(found) = evaluation.pivot {
                self.events.emit(ServiceEvent::PivotDetected {
                    alternative: found.alternative.clone(),
                    urgency: found.urgency,
                });
                // O pivot mais recente vence e é carregado entre iterações
                pivot = Some(found);
            }

            if evaluation.complete
                || evaluation.confidence > CONFIDENCE_STOP
                || evaluation.next_steps.is_empty()
            {
                log::debug!(
                    "loop encerrado na iteração {iteration} (complete={}, confidence={:.2})",
                    evaluation.complete,
                    evaluation.confidence
                );
                break;
            }

            steps = evaluation.next_steps;
        }

        let synthesis = self
            .coordinator
            .synthesize(&directive, &accumulated, pivot.as_ref())
            .await;
        let pivot = synthesis.pivot.clone().or(pivot);

        // Fontes finais: dedup por URL, melhor relevância, cap em 10
        let sources: Vec<FindingSource> = deduplicate_sources(
            accumulated
                .iter()
                .flat_map(|f| f.results.iter().map(FindingSource::from))
                .collect(),
        )
        .into_iter()
        .take(MAX_RESULT_SOURCES)
        .collect();

        let estimated_tokens = estimate_emitted_tokens(&accumulated, &synthesis.summary);

        let mut finding = Finding::new(&directive.query, &synthesis.summary, synthesis.confidence);
        finding.key_points = synthesis.key_findings.clone();
        finding.content = build_content(&accumulated);
        finding.sources = sources.clone();
        finding.domain = infer_domain(&directive.query);
        finding.depth = depth;

        // Persistência happens-before embedding e write-through
        let finding_id = match self
            .store
            .save_finding(&finding, directive.session_id.as_deref(), None)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.index.embed_finding(&finding).await {
                    log::warn!("⚠️ Embed do finding falhou (não-fatal): {e}");
                }
                if let Err(e) = self
                    .bridge
                    .inject(&finding, directive.session_id.as_deref())
                    .await
                {
                    log::warn!("⚠️ Write-through falhou (não-fatal): {e}");
                }
                Some(finding.id)
            }
            Err(e) => {
                log::error!("❌ Persistência do finding final falhou: {e}");
                None
            }
        };

        self.events.emit(ServiceEvent::ResearchComplete {
            query: directive.query.clone(),
            confidence: synthesis.confidence,
        });

        Ok(ResearchResult {
            finding_id,
            query: directive.query,
            summary: synthesis.summary,
            key_findings: synthesis.key_findings,
            sources,
            confidence: synthesis.confidence,
            iterations,
            estimated_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
            pivot,
        })
    }

    /// Despacha os passos do plano. Paralelo por padrão; sequencial por
    /// prioridade decrescente quando configurado. Specialists ausentes são
    /// pulados com warning.
    async fn dispatch(&self, steps: &[PlanStep]) -> Vec<Fragment> {
        let mut runnable: Vec<(&PlanStep, Arc<Specialist>)> = steps
            .iter()
            .filter_map(|step| match self.specialists.get(&step.specialist) {
                Some(specialist) => Some((step, Arc::clone(specialist))),
                None => {
                    log::warn!(
                        "⚠️ Specialist {} não registrado, passo pulado",
                        step.specialist.as_str()
                    );
                    None
                }
            })
            .collect();

        if !self.config.parallel_specialists {
            runnable.sort_by(|a, b| b.0.priority.cmp(&a.0.priority));
        }

        let make_request = |step: &PlanStep| SpecialistRequest {
            query: step.query.clone(),
            max_results: self.config.max_results,
            scrape_top: self.config.scrape_top,
            timeout_ms: self.config.specialist_timeout_ms,
        };

        if self.config.parallel_specialists {
            let futures = runnable.into_iter().map(|(step, specialist)| {
                let request = make_request(step);
                let events = self.events.clone();
                async move {
                    events.emit(ServiceEvent::SpecialistDispatch {
                        specialist: specialist.name().to_string(),
                        query: request.query.clone(),
                    });
                    let fragment = specialist.execute(&request).await;
                    events.emit(ServiceEvent::SpecialistComplete {
                        specialist: fragment.specialist.clone(),
                        results: fragment.results.len(),
                    });
                    fragment
                }
            });
            join_all(futures).await
        } else {
            let mut fragments = Vec::with_capacity(runnable.len());
            for (step, specialist) in runnable {
                let request = make_request(step);
                self.events.emit(ServiceEvent::SpecialistDispatch {
                    specialist: specialist.name().to_string(),
                    query: request.query.clone(),
                });
                let fragment = specialist.execute(&request).await;
                self.events.emit(ServiceEvent::SpecialistComplete {
                    specialist: fragment.specialist.clone(),
                    results: fragment.results.len(),
                });
                fragments.push(fragment);
            }
            fragments
        }
    }

    /// Persiste um fragment como finding parcial (baixa confiança).
    /// Falhas são logadas e ignoradas.
    async fn persist_partial(
        &self,
        directive: &ResearchDirective,
        fragment: &Fragment,
        depth: Depth,
    ) {
        if fragment.results.is_empty() {
            return;
        }

        let mut partial = Finding::new(
            &directive.query,
            format!(
                "Partial {} results for: {}",
                fragment.specialist, directive.query
            ),
            PARTIAL_CONFIDENCE,
        );
        partial.sources = fragment.results.iter().map(FindingSource::from).collect();
        partial.content = fragment
            .results
            .iter()
            .filter_map(|r| r.snippet.as_deref())
            .collect::<Vec<_>>()
            .join("\n");
        partial.depth = depth;
        partial.domain = infer_domain(&directive.query);

        if let Err(e) = self
            .store
            .save_finding(&partial, directive.session_id.as_deref(), None)
            .await
        {
            log::warn!("⚠️ Persistência de finding parcial falhou: {e}");
        }
    }
}

/// Tokens estimados (⌈len/4⌉) sobre o texto emitido: snippets, corpos
/// extraídos e resumo final
fn estimate_emitted_tokens(fragments: &[Fragment], summary: &str) -> u64 {
    let mut total = estimate_tokens(summary);
    for fragment in fragments {
        for result in &fragment.results {
            total += estimate_tokens(&result.title);
            if let Some(snippet) = &result.snippet {
                total += estimate_tokens(snippet);
            }
        }
        for page in &fragment.scraped {
            total += estimate_tokens(&page.content);
        }
    }
    total
}

/// Conteúdo completo do finding final: corpos extraídos concatenados
/// (o sanitize do finding aplica o teto de 64 KiB)
fn build_content(fragments: &[Fragment]) -> String {
    let mut content = String::new();
    for fragment in fragments {
        for page in &fragment.scraped {
            content.push_str(&format!("# {}\n{}\n\n", page.url, page.content));
        }
    }
    content
}
