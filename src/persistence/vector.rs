// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ÍNDICE SEMÂNTICO (VETORES)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Lookup por similaridade cosseno sobre embeddings de findings. O índice é
// opcional: sem embedder, todas as operações caem no fallback keyword do
// store. Consumidores nunca fazem branch no modo - observam apenas
// `{found, ...}`.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::sync::Arc;

use uuid::Uuid;

use super::{PersistenceError, Store};
use crate::llm::LlmClient;
use crate::types::Finding;

/// Resultado do caminho assíncrono (vetorial) de deduplicação
#[derive(Debug, Clone, Default)]
pub struct SimilarFinding {
    /// Se um finding similar recente existe
    pub found: bool,
    /// Similaridade cosseno, quando o modo vetorial decidiu
    pub similarity: Option<f32>,
    /// Finding mais similar, quando encontrado
    pub finding_id: Option<Uuid>,
}

/// Similaridade cosseno entre dois vetores.
///
/// Retorna 0.0 para comprimentos diferentes ou norma zero (nunca panica
/// em código de produção).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Serializa um embedding como bytes f32 little-endian
pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Desserializa um blob f32 little-endian
pub fn decode_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Índice semântico sobre o store, com fallback keyword transparente
pub struct SemanticIndex {
    store: Arc<Store>,
    embedder: Option<Arc<dyn LlmClient>>,
}

impl SemanticIndex {
    /// Cria o índice. O embedder só é retido quando reporta suporte a
    /// embeddings; caso contrário o índice opera em modo keyword-only.
    pub fn new(store: Arc<Store>, embedder: Option<Arc<dyn LlmClient>>) -> Self {
        let embedder = embedder.filter(|e| e.supports_embeddings());
        if embedder.is_none() {
            log::info!("🔍 Índice semântico em modo keyword-only (sem embedder)");
        }
        Self { store, embedder }
    }

    /// Se o modo vetorial está disponível
    pub fn is_vector_ready(&self) -> bool {
        self.embedder.is_some()
    }

    /// Gera e persiste o embedding de um finding (query + summary).
    ///
    /// No-op em modo keyword-only.
    pub async fn embed_finding(&self, finding: &Finding) -> Result<(), PersistenceError> {
        let Some(embedder) = &self.embedder else {
            return Ok(());
        };

        let text = format!("{}\n{}", finding.query, finding.summary);
        let embedding = embedder
            .embed(&text)
            .await
            .map_err(|e| PersistenceError::Embedding(e.to_string()))?;
        self.store.save_embedding(finding.id, &embedding).await
    }

    /// Findings relacionados: cosseno sobre o índice quando disponível,
    /// senão keyword LIKE
    pub async fn find_related_findings(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Finding>, PersistenceError> {
        let Some(embedder) = &self.embedder else {
            return self.store.search_findings(query, limit).await;
        };

        let needle = match embedder.embed(query).await {
            Ok(needle) => needle,
            Err(e) => {
                log::warn!("⚠️ Embed falhou ({e}), caindo em busca keyword");
                return self.store.search_findings(query, limit).await;
            }
        };

        let mut scored: Vec<(f32, Uuid)> = self
            .store
            .embeddings_since(None)
            .await?
            .into_iter()
            .map(|(id, _query, embedding)| (cosine_similarity(&needle, &embedding), id))
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let mut findings = Vec::with_capacity(limit);
        for (_score, id) in scored.into_iter().take(limit) {
            if let Some(finding) = self.store.get_finding(id).await? {
                findings.push(finding);
            }
        }
        Ok(findings)
    }

    /// Deduplicação vetorial: existe finding na janela com cosseno ≥
    /// `threshold`? Em modo keyword-only delega ao caminho síncrono.
    pub async fn has_recent_similar_query_async(
        &self,
        text: &str,
        window_ms: u64,
        threshold: f32,
    ) -> Result<SimilarFinding, PersistenceError> {
        let Some(embedder) = &self.embedder else {
            let similar = self.store.has_recent_similar_query(text, window_ms).await?;
            return Ok(SimilarFinding {
                found: similar.found,
                similarity: None,
                finding_id: None,
            });
        };

        let needle = match embedder.embed(text).await {
            Ok(needle) => needle,
            Err(e) => {
                log::warn!("⚠️ Embed falhou ({e}), caindo em dedup keyword");
                let similar = self.store.has_recent_similar_query(text, window_ms).await?;
                return Ok(SimilarFinding {
                    found: similar.found,
                    similarity: None,
                    finding_id: None,
                });
            }
        };

        let mut best: Option<(f32, Uuid)> = None;
        for (id, _query, embedding) in self.store.embeddings_since(Some(window_ms)).await? {
            let score = cosine_similarity(&needle, &embedding);
            if best.map(|(b, _)| score > b).unwrap_or(true) {
                best = Some((score, id));
            }
        }

        match best {
            Some((score, id)) if score >= threshold => Ok(SimilarFinding {
                found: true,
                similarity: Some(score),
                finding_id: Some(id),
            }),
            Some((score, _)) => Ok(SimilarFinding {
                found: false,
                similarity: Some(score),
                finding_id: None,
            }),
            None => Ok(SimilarFinding::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UrlCacheConfig;
    use crate::llm::MockLlmClient;

    async fn index_with_mock() -> (Arc<Store>, SemanticIndex) {
        let store = Arc::new(
            Store::open(":memory:", UrlCacheConfig::default())
                .await
                .unwrap(),
        );
        let embedder: Arc<dyn LlmClient> = Arc::new(MockLlmClient::new());
        let index = SemanticIndex::new(Arc::clone(&store), Some(embedder));
        (store, index)
    }

    #[test]
    fn test_cosine_similarity_basics() {
        let a = [1.0, 0.0, 0.0];
        let b = [1.0, 0.0, 0.0];
        let c = [0.0, 1.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&a, &c).abs() < 1e-6);
        // Não panica em entradas degeneradas
        assert_eq!(cosine_similarity(&a, &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let original = vec![0.25f32, -1.5, 3.75, 0.0];
        let decoded = decode_embedding(&encode_embedding(&original));
        assert_eq!(original, decoded);
    }

    #[tokio::test]
    async fn test_vector_dedup_finds_identical_query() {
        let (store, index) = index_with_mock().await;
        assert!(index.is_vector_ready());

        let finding = Finding::new("rate limiting in FastAPI", "summary", 0.9);
        store.save_finding(&finding, None, None).await.unwrap();
        index.embed_finding(&finding).await.unwrap();

        let similar = index
            .has_recent_similar_query_async("rate limiting in FastAPI", 60_000, 0.80)
            .await
            .unwrap();
        assert!(similar.found);
        assert_eq!(similar.finding_id, Some(finding.id));
        assert!(similar.similarity.unwrap() > 0.99);
    }

    #[tokio::test]
    async fn test_keyword_only_mode_still_answers() {
        let store = Arc::new(
            Store::open(":memory:", UrlCacheConfig::default())
                .await
                .unwrap(),
        );
        let index = SemanticIndex::new(Arc::clone(&store), None);
        assert!(!index.is_vector_ready());

        let finding = Finding::new("tokio select macro", "summary", 0.9);
        store.save_finding(&finding, None, None).await.unwrap();
        // embed é no-op sem embedder
        index.embed_finding(&finding).await.unwrap();

        let related = index.find_related_findings("tokio select", 5).await.unwrap();
        assert_eq!(related.len(), 1);

        let similar = index
            .has_recent_similar_query_async("tokio select macro", 60_000, 0.80)
            .await
            .unwrap();
        assert!(similar.found);
        assert!(similar.similarity.is_none());
    }

    #[tokio::test]
    async fn test_find_related_ranks_by_similarity() {
        let (store, index) = index_with_mock().await;

        let close = Finding::new("rust async channels tokio", "summary", 0.9);
        let far = Finding::new("css grid layout", "summary", 0.9);
        store.save_finding(&close, None, None).await.unwrap();
        store.save_finding(&far, None, None).await.unwrap();
        index.embed_finding(&close).await.unwrap();
        index.embed_finding(&far).await.unwrap();

        let related = index
            .find_related_findings("rust async channels tokio", 1)
            .await
            .unwrap();
        assert_eq!(related.len(), 1);
        assert_eq!(related[0].id, close.id);
    }
}
