// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TEXT UTILITIES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Utilitários de texto compartilhados por todo o serviço:
// - Estimativa de tokens
// - Truncation e limpeza
// - Normalização de queries e URLs
// - Similaridade Jaccard sobre tokens normalizados
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::HashSet;

/// Estimativa de tokens por caractere (regra ~4 chars/token)
const CHARS_PER_TOKEN: f32 = 4.0;

/// Estima número de tokens em um texto
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as f32 / CHARS_PER_TOKEN).ceil() as u64
}

/// Trunca texto para no máximo `max_bytes`, respeitando boundaries UTF-8
pub fn truncate_bytes(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Remove caracteres de controle e normaliza whitespace
pub fn clean_text(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normaliza uma query para comparação: lowercase, pontuação removida,
/// whitespace colapsado
pub fn normalize_query(query: &str) -> String {
    query
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Tokeniza uma query normalizada em um conjunto de palavras
pub fn normalized_tokens(text: &str) -> HashSet<String> {
    normalize_query(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Similaridade Jaccard entre dois textos (sobre tokens normalizados).
///
/// Retorna 0.0 quando ambos os conjuntos são vazios.
pub fn jaccard_similarity(a: &str, b: &str) -> f32 {
    let set_a = normalized_tokens(a);
    let set_b = normalized_tokens(b);

    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();

    intersection as f32 / union as f32
}

/// Normaliza uma URL para deduplicação: lowercase + trailing slash removido
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_lowercase()
}

/// Extrai o hostname de uma URL
pub fn extract_hostname(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(String::from))
}

/// Extrai termos significativos de um texto (para tracking de tópicos).
///
/// Ignora palavras curtas e stopwords; preserva ordem de ocorrência.
pub fn significant_terms(text: &str, max_terms: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut terms = Vec::new();

    for word in text.split_whitespace() {
        let cleaned: String = word
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
            .collect::<String>()
            .trim_matches('.')
            .to_lowercase();

        if cleaned.len() < 4 || is_stopword(&cleaned) {
            continue;
        }
        if seen.insert(cleaned.clone()) {
            terms.push(cleaned);
            if terms.len() >= max_terms {
                break;
            }
        }
    }

    terms
}

/// Verifica se é uma stopword comum
pub fn is_stopword(word: &str) -> bool {
    const STOPWORDS: &[&str] = &[
        "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
        "from", "as", "is", "was", "are", "were", "been", "be", "have", "has", "had", "do", "does",
        "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can", "need",
        "this", "that", "these", "those", "what", "which", "who", "whom", "when", "where", "why",
        "how", "all", "each", "every", "both", "few", "more", "most", "other", "some", "such",
        "no", "nor", "not", "only", "own", "same", "so", "than", "too", "very", "just", "also",
        "into", "about", "then", "there", "here", "using", "like", "want", "make", "made",
    ];

    STOPWORDS.contains(&word.to_lowercase().as_str())
}

/// Primeira sentença de um texto (para resumos mecânicos)
pub fn first_sentence(text: &str) -> &str {
    let terminators = ['.', '!', '?'];
    for (i, c) in text.char_indices() {
        if terminators.contains(&c) {
            let remaining = &text[i + c.len_utf8()..];
            if remaining.starts_with(char::is_whitespace)
                || remaining.starts_with(char::is_uppercase)
                || remaining.is_empty()
            {
                return &text[..=i];
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        // 11 chars ≈ 3 tokens
        assert_eq!(estimate_tokens("Hello world"), 3);
    }

    #[test]
    fn test_truncate_bytes_respects_boundaries() {
        let text = "ação de pesquisa";
        let truncated = truncate_bytes(text, 3);
        assert!(truncated.len() <= 3);
        assert!(text.starts_with(truncated));
    }

    #[test]
    fn test_normalize_query() {
        assert_eq!(
            normalize_query("  How to: implement rate-limiting?! "),
            "how to implement rate limiting"
        );
    }

    #[test]
    fn test_jaccard_similarity_reordered() {
        let a = "how to implement rate limiting in FastAPI";
        let b = "implement rate limiting FastAPI how to in";
        assert!(jaccard_similarity(a, b) > 0.99);
    }

    #[test]
    fn test_jaccard_similarity_disjoint() {
        assert_eq!(jaccard_similarity("tokio runtime", "borrow checker"), 0.0);
        assert_eq!(jaccard_similarity("", ""), 0.0);
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(
            normalize_url("HTTPS://Docs.RS/tokio/"),
            "https://docs.rs/tokio"
        );
    }

    #[test]
    fn test_significant_terms_skips_stopwords() {
        let terms = significant_terms("How to use the tokio runtime with axum", 10);
        assert!(terms.contains(&"tokio".to_string()));
        assert!(terms.contains(&"runtime".to_string()));
        assert!(!terms.iter().any(|t| t == "with"));
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("One. Two."), "One.");
        assert_eq!(first_sentence("no terminator"), "no terminator");
    }
}
