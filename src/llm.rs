// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GATEWAY LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Interface uniforme `query(prompt, opts) → {text, tokens, provider, model}`.
// O gateway não faz retry: falha é propagada ao chamador, que decide
// (coordinator cai em fallback; fila re-tenta com backoff).
//
// Embeddings são expostos pela mesma trait e alimentam o vector index;
// um gateway sem embedder reporta `supports_embeddings() == false` e o
// índice opera em modo keyword-only.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::LlmConfig;

/// Erros do gateway LLM
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// Resposta não-2xx ou corpo inesperado
    #[error("API error: {0}")]
    ApiError(String),

    /// Falha de rede/timeout
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Credencial ausente no ambiente
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    /// Gateway sem modelo de embeddings configurado
    #[error("Embeddings not configured")]
    EmbeddingsUnavailable,
}

/// Opções de uma chamada ao LLM
#[derive(Debug, Clone, Copy)]
pub struct QueryOptions {
    /// Máximo de tokens de completion
    pub max_tokens: u32,
    /// Temperatura de amostragem
    pub temperature: f32,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

/// Resposta do gateway
#[derive(Debug, Clone)]
pub struct LlmReply {
    /// Texto gerado
    pub text: String,
    /// Tokens consumidos (quando o provedor reporta; senão estimado)
    pub tokens: u64,
    /// Nome do provedor
    pub provider: String,
    /// Modelo usado
    pub model: String,
}

/// Interface do gateway LLM
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Envia um prompt de texto plano e retorna a resposta
    async fn query(&self, prompt: &str, opts: &QueryOptions) -> Result<LlmReply, LlmError>;

    /// Gera um embedding para o texto
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;

    /// Se este gateway suporta embeddings
    fn supports_embeddings(&self) -> bool;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IMPLEMENTAÇÃO HTTP (Chat Completions compatível)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway HTTP para um endpoint compatível com Chat Completions
pub struct HttpLlmClient {
    config: LlmConfig,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

impl HttpLlmClient {
    /// Cria o gateway resolvendo a credencial no ambiente
    pub fn new(config: LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key()
            .ok_or_else(|| LlmError::MissingCredential(config.api_key_env.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn query(&self, prompt: &str, opts: &QueryOptions) -> Result<LlmReply, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        let body = json!({
            "model": self.config.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("{}: {}", status, detail)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ApiError(format!("invalid response body: {e}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        let tokens = parsed
            .usage
            .and_then(|u| u.total_tokens)
            .unwrap_or_else(|| crate::utils::estimate_tokens(&text));

        Ok(LlmReply {
            text,
            tokens,
            provider: self.config.base_url.clone(),
            model: self.config.model.clone(),
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let model = self
            .config
            .embedding_model
            .as_ref()
            .ok_or(LlmError::EmbeddingsUnavailable)?;

        let url = format!("{}/embeddings", self.config.base_url.trim_end_matches('/'));
        let body = json!({"model": model, "input": text});

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError(format!("{}: {}", status, detail)));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ApiError(format!("invalid response body: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| LlmError::ApiError("empty embedding response".to_string()))
    }

    fn supports_embeddings(&self) -> bool {
        self.config.embedding_model.is_some()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IMPLEMENTAÇÃO MOCK PARA TESTES
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Gateway mock com respostas roteirizadas.
///
/// Respostas empilhadas via `push_reply` são consumidas em ordem FIFO;
/// esgotadas, cai na resposta default (vazia quando não definida).
/// `set_fail(true)` faz toda chamada retornar erro - usado para exercitar
/// os fallbacks do coordinator e do watcher.
#[derive(Debug, Default)]
pub struct MockLlmClient {
    replies: Mutex<VecDeque<String>>,
    default_reply: Option<String>,
    fail: AtomicBool,
    with_embeddings: bool,
}

impl MockLlmClient {
    /// Mock com embeddings habilitados
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            default_reply: None,
            fail: AtomicBool::new(false),
            with_embeddings: true,
        }
    }

    /// Mock sem embedder (vector index em modo keyword-only)
    pub fn without_embeddings() -> Self {
        Self {
            with_embeddings: false,
            ..Self::new()
        }
    }

    /// Define a resposta default
    pub fn with_default_reply(mut self, reply: impl Into<String>) -> Self {
        self.default_reply = Some(reply.into());
        self
    }

    /// Empilha uma resposta roteirizada
    pub fn push_reply(&self, reply: impl Into<String>) {
        self.replies
            .lock()
            .expect("mock replies lock")
            .push_back(reply.into());
    }

    /// Liga/desliga o modo de falha
    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn query(&self, _prompt: &str, _opts: &QueryOptions) -> Result<LlmReply, LlmError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::ApiError("mock failure".to_string()));
        }

        let text = self
            .replies
            .lock()
            .expect("mock replies lock")
            .pop_front()
            .or_else(|| self.default_reply.clone())
            .unwrap_or_default();

        Ok(LlmReply {
            tokens: crate::utils::estimate_tokens(&text),
            text,
            provider: "mock".to_string(),
            model: "mock".to_string(),
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        if !self.with_embeddings {
            return Err(LlmError::EmbeddingsUnavailable);
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(LlmError::ApiError("mock failure".to_string()));
        }
        Ok(pseudo_embedding(text))
    }

    fn supports_embeddings(&self) -> bool {
        self.with_embeddings
    }
}

/// Embedding determinístico de 64 dimensões derivado dos tokens do texto.
///
/// Textos com os mesmos tokens normalizados produzem o mesmo vetor, o que
/// torna a similaridade cosseno previsível em testes.
pub fn pseudo_embedding(text: &str) -> Vec<f32> {
    const DIMS: usize = 64;
    let mut vector = vec![0.0f32; DIMS];

    for token in crate::utils::normalize_query(text).split_whitespace() {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for byte in token.bytes() {
            hash ^= u64::from(byte);
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        for (i, slot) in vector.iter_mut().enumerate() {
            let mixed = hash.rotate_left((i % 64) as u32);
            *slot += ((mixed & 0xffff) as f32 / 65535.0) - 0.5;
        }
    }

    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_scripted_replies_in_order() {
        let client = MockLlmClient::new();
        client.push_reply("first");
        client.push_reply("second");

        let opts = QueryOptions::default();
        assert_eq!(client.query("p", &opts).await.unwrap().text, "first");
        assert_eq!(client.query("p", &opts).await.unwrap().text, "second");
        // Esgotado: default vazio
        assert_eq!(client.query("p", &opts).await.unwrap().text, "");
    }

    #[tokio::test]
    async fn test_mock_failure_mode() {
        let client = MockLlmClient::new();
        client.set_fail(true);
        assert!(client.query("p", &QueryOptions::default()).await.is_err());
        assert!(client.embed("text").await.is_err());
    }

    #[tokio::test]
    async fn test_mock_without_embeddings() {
        let client = MockLlmClient::without_embeddings();
        assert!(!client.supports_embeddings());
        assert!(matches!(
            client.embed("text").await,
            Err(LlmError::EmbeddingsUnavailable)
        ));
    }

    #[test]
    fn test_pseudo_embedding_deterministic() {
        let a = pseudo_embedding("rate limiting in FastAPI");
        let b = pseudo_embedding("rate limiting in FastAPI");
        let c = pseudo_embedding("borrow checker lifetimes");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_missing_credential() {
        let mut config = LlmConfig::default();
        config.api_key_env = "DEFINITELY_NOT_SET_FOR_TESTS".to_string();
        assert!(matches!(
            HttpLlmClient::new(config),
            Err(LlmError::MissingCredential(_))
        ));
    }
}
