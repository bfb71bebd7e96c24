// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SOURCE ASSESSOR
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Score de confiabilidade por fonte:
//
//   reliability = 0.35·reputation + 0.25·quality + 0.15·freshness + 0.25·relevance
//
// A reputação vem de um registry curado com categorias e boost de tópico
// (+0.1); domínios desconhecidos usam o valor aprendido no ledger de
// qualidade (ou 0.5). Feedback alimenta o ledger via `record_feedback`.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use chrono::Datelike;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::persistence::Store;
use crate::types::clamp_score;
use crate::utils::{extract_hostname, normalized_tokens};

static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(20\d{2})\b").expect("year regex"));

static DEPRECATED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(deprecated|obsolete|outdated|legacy|end-of-life|eol|unmaintained)\b")
        .expect("deprecated regex")
});

/// Categoria de um domínio no registry curado
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainCategory {
    /// Documentação oficial / fonte primária
    Official,
    /// Comunidade estabelecida (repos, wikis)
    Community,
    /// Sites de tutoriais
    Tutorial,
    /// Blogs
    Blog,
    /// Fóruns / Q&A
    Forum,
    /// Fora do registry
    Unknown,
}

impl DomainCategory {
    /// Reputação base da categoria
    fn base_reputation(self) -> f32 {
        match self {
            Self::Official => 0.9,
            Self::Community => 0.75,
            Self::Tutorial => 0.65,
            Self::Forum => 0.6,
            Self::Blog => 0.55,
            Self::Unknown => 0.5,
        }
    }

    /// Ajuste de qualidade de conteúdo por categoria
    fn quality_adjustment(self) -> f32 {
        match self {
            Self::Official => 0.05,
            Self::Blog | Self::Forum => -0.05,
            _ => 0.0,
        }
    }
}

/// Entrada do registry curado: (sufixo de domínio, categoria, tópicos fortes)
struct RegistryEntry {
    suffix: &'static str,
    category: DomainCategory,
    topics: &'static [&'static str],
}

static DOMAIN_REGISTRY: &[RegistryEntry] = &[
    RegistryEntry { suffix: "docs.rs", category: DomainCategory::Official, topics: &["rust"] },
    RegistryEntry { suffix: "rust-lang.org", category: DomainCategory::Official, topics: &["rust"] },
    RegistryEntry { suffix: "crates.io", category: DomainCategory::Official, topics: &["rust"] },
    RegistryEntry { suffix: "python.org", category: DomainCategory::Official, topics: &["python"] },
    RegistryEntry { suffix: "developer.mozilla.org", category: DomainCategory::Official, topics: &["web", "javascript"] },
    RegistryEntry { suffix: "nodejs.org", category: DomainCategory::Official, topics: &["javascript"] },
    RegistryEntry { suffix: "postgresql.org", category: DomainCategory::Official, topics: &["database"] },
    RegistryEntry { suffix: "kubernetes.io", category: DomainCategory::Official, topics: &["infra"] },
    RegistryEntry { suffix: "arxiv.org", category: DomainCategory::Official, topics: &[] },
    RegistryEntry { suffix: "github.com", category: DomainCategory::Community, topics: &[] },
    RegistryEntry { suffix: "wikipedia.org", category: DomainCategory::Community, topics: &[] },
    RegistryEntry { suffix: "stackoverflow.com", category: DomainCategory::Forum, topics: &[] },
    RegistryEntry { suffix: "news.ycombinator.com", category: DomainCategory::Forum, topics: &[] },
    RegistryEntry { suffix: "reddit.com", category: DomainCategory::Forum, topics: &[] },
    RegistryEntry { suffix: "digitalocean.com", category: DomainCategory::Tutorial, topics: &["infra"] },
    RegistryEntry { suffix: "realpython.com", category: DomainCategory::Tutorial, topics: &["python"] },
    RegistryEntry { suffix: "medium.com", category: DomainCategory::Blog, topics: &[] },
    RegistryEntry { suffix: "dev.to", category: DomainCategory::Blog, topics: &[] },
];

/// Recomendação de uso de uma fonte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    /// Fonte confiável (reliability ≥ 0.7)
    Use,
    /// Usar com cautela (reliability ≥ 0.4)
    Caution,
    /// Evitar
    Avoid,
}

impl Recommendation {
    fn from_reliability(reliability: f32) -> Self {
        if reliability >= 0.7 {
            Self::Use
        } else if reliability >= 0.4 {
            Self::Caution
        } else {
            Self::Avoid
        }
    }
}

/// Fonte a avaliar
#[derive(Debug, Clone)]
pub struct SourceRef<'a> {
    /// URL da fonte
    pub url: &'a str,
    /// Título
    pub title: &'a str,
    /// Snippet, quando disponível
    pub snippet: Option<&'a str>,
    /// Relevância já conhecida (fallback do componente de relevância)
    pub relevance: Option<f32>,
}

/// Avaliação completa de uma fonte
#[derive(Debug, Clone)]
pub struct SourceAssessment {
    /// Hostname avaliado
    pub domain: String,
    /// Categoria do registry
    pub category: DomainCategory,
    /// Componente de reputação ∈ [0,1]
    pub reputation: f32,
    /// Componente de qualidade de conteúdo ∈ [0,1]
    pub content_quality: f32,
    /// Componente de freshness ∈ [0,1]
    pub freshness: f32,
    /// Componente de relevância ∈ [0,1]
    pub relevance: f32,
    /// Score agregado ∈ [0,1]
    pub reliability: f32,
    /// Recomendação por thresholds
    pub recommendation: Recommendation,
}

/// Assessor de fontes com aprendizado via ledger
pub struct SourceAssessor {
    store: Arc<Store>,
}

impl SourceAssessor {
    /// Cria o assessor sobre o store (ledger de qualidade)
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Avalia uma fonte para um tópico e uma query opcionais
    pub async fn assess(
        &self,
        source: &SourceRef<'_>,
        topic: Option<&str>,
        query: Option<&str>,
    ) -> SourceAssessment {
        let domain = extract_hostname(source.url)
            .unwrap_or_else(|| source.url.to_string())
            .to_lowercase();

        let (category, mut reputation) = registry_reputation(&domain, topic);

        // Domínio desconhecido: valor aprendido no ledger, quando existe
        if category == DomainCategory::Unknown {
            if let Ok(Some(learned)) = self.store.get_source_quality(&domain, topic).await {
                reputation = learned.score;
            }
        }
        let reputation = clamp_score(reputation);

        let content_quality = clamp_score(content_quality(source, reputation, category));
        let freshness = clamp_score(freshness(source));
        let relevance = clamp_score(relevance_component(source, query));

        let reliability = clamp_score(
            0.35 * reputation + 0.25 * content_quality + 0.15 * freshness + 0.25 * relevance,
        );

        SourceAssessment {
            domain,
            category,
            reputation,
            content_quality,
            freshness,
            relevance,
            reliability,
            recommendation: Recommendation::from_reliability(reliability),
        }
    }

    /// Registra feedback (útil/não útil) de uma fonte no ledger
    pub async fn record_feedback(
        &self,
        url: &str,
        helpful: bool,
        topic: Option<&str>,
    ) {
        let Some(domain) = extract_hostname(url) else {
            log::debug!("feedback descartado, URL sem hostname: {url}");
            return;
        };
        if let Err(e) = self
            .store
            .update_source_quality(&domain, topic, helpful)
            .await
        {
            log::warn!("⚠️ Feedback de fonte não registrado: {e}");
        }
    }
}

/// Reputação a partir do registry curado, com boost de tópico (+0.1)
fn registry_reputation(domain: &str, topic: Option<&str>) -> (DomainCategory, f32) {
    for entry in DOMAIN_REGISTRY {
        if domain == entry.suffix || domain.ends_with(&format!(".{}", entry.suffix)) {
            let mut reputation = entry.category.base_reputation();
            if let Some(topic) = topic {
                if entry.topics.contains(&topic.to_lowercase().as_str()) {
                    reputation += 0.1;
                }
            }
            return (entry.category, reputation);
        }
    }
    (DomainCategory::Unknown, DomainCategory::Unknown.base_reputation())
}

/// Qualidade de conteúdo: reputação ± ajustes de snippet/título/categoria
fn content_quality(source: &SourceRef<'_>, reputation: f32, category: DomainCategory) -> f32 {
    let mut quality = reputation + category.quality_adjustment();

    match source.snippet.map(str::len) {
        Some(len) if len >= 100 => quality += 0.05,
        Some(len) if len < 20 => quality -= 0.05,
        _ => {}
    }

    let title_len = source.title.len();
    if (10..=120).contains(&title_len) {
        quality += 0.02;
    } else {
        quality -= 0.02;
    }

    quality
}

/// Freshness por tokens de ano e keywords de deprecação
fn freshness(source: &SourceRef<'_>) -> f32 {
    let text = format!("{} {}", source.title, source.snippet.unwrap_or(""));
    let current_year = chrono::Utc::now().year();

    let mut score = 0.6;
    if let Some(year) = YEAR_RE
        .captures_iter(&text)
        .filter_map(|caps| caps[1].parse::<i32>().ok())
        .max()
    {
        score = if year >= current_year - 1 {
            0.9
        } else if year >= current_year - 4 {
            0.7
        } else {
            0.4
        };
    }

    if DEPRECATED_RE.is_match(&text) {
        score -= 0.3;
    }

    score
}

/// Relevância por overlap de palavras da query; sem palavras de query,
/// cai na relevância conhecida (ou 0.5)
fn relevance_component(source: &SourceRef<'_>, query: Option<&str>) -> f32 {
    let query_tokens = query.map(normalized_tokens).unwrap_or_default();
    if query_tokens.is_empty() {
        return source.relevance.unwrap_or(0.5);
    }

    let text = format!("{} {}", source.title, source.snippet.unwrap_or(""));
    let text_tokens = normalized_tokens(&text);
    let matched = query_tokens.intersection(&text_tokens).count();

    matched as f32 / query_tokens.len() as f32
}
