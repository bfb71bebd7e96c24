// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// MEMORY BRIDGE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Write-through de findings de alta qualidade para o sink de memória
// externa (append-only). O sink é opcional - ausência é não-fatal.
//
// Gates de qualidade:
//   meets_quality_threshold ⇔ confidence ≥ 0.7 ∧ |sources| ≥ 2
//   is_high_quality         ⇔ confidence ≥ 0.85
// A injeção automática aplica os dois; `force` os ignora. Idempotência
// por finding id, ancorada na tabela `injections`.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::persistence::Store;
use crate::types::Finding;

/// Tag gravada em toda observation deste serviço (permite filtrar as
/// próprias contribuições em buscas posteriores)
pub const OBSERVATION_TAG: &str = "research-crew";

/// Erros do bridge de memória
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    /// Falha de IO no sink
    #[error("Sink IO error: {0}")]
    Io(String),

    /// Falha de serialização da observation
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Falha da persistência local (idempotência)
    #[error("Persistence error: {0}")]
    Persistence(String),
}

/// Observation append-only gravada no sink externo
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Sessão de origem, quando houver
    pub session_id: Option<String>,
    /// Projeto (working directory), quando houver
    pub project: Option<String>,
    /// Tipo da observation
    #[serde(rename = "type")]
    pub kind: String,
    /// Título (query pesquisada)
    pub title: String,
    /// Subtítulo (domínio inferido)
    pub subtitle: Option<String>,
    /// Texto (resumo)
    pub text: String,
    /// Fatos (key points)
    pub facts: Vec<String>,
    /// Narrativa (conteúdo completo truncado)
    pub narrative: String,
    /// Conceitos (URLs das fontes)
    pub concepts: Vec<String>,
    /// Confiança do finding
    pub confidence: f32,
    /// Tag do serviço
    pub tag: String,
    /// Momento da gravação
    pub created_at: DateTime<Utc>,
}

impl Observation {
    /// Monta a observation de um finding
    pub fn from_finding(finding: &Finding, session_id: Option<&str>) -> Self {
        Self {
            session_id: session_id.map(str::to_string),
            project: None,
            kind: "research-finding".to_string(),
            title: finding.query.clone(),
            subtitle: finding.domain.clone(),
            text: finding.summary.clone(),
            facts: finding.key_points.clone(),
            narrative: crate::utils::truncate_bytes(&finding.content, 8 * 1024).to_string(),
            concepts: finding.sources.iter().map(|s| s.url.clone()).collect(),
            confidence: finding.confidence,
            tag: OBSERVATION_TAG.to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Sink de memória externa (append-only)
#[async_trait]
pub trait MemorySink: Send + Sync {
    /// Nome do sink (gravado no registro de injeção)
    fn name(&self) -> &str;

    /// Grava uma observation
    async fn record(&self, observation: &Observation) -> Result<(), MemoryError>;
}

/// Sink JSONL local: uma observation por linha, append-only
pub struct JsonlMemorySink {
    path: PathBuf,
}

impl JsonlMemorySink {
    /// Cria o sink apontando para um arquivo JSONL
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MemorySink for JsonlMemorySink {
    fn name(&self) -> &str {
        "jsonl"
    }

    async fn record(&self, observation: &Observation) -> Result<(), MemoryError> {
        let mut line = serde_json::to_string(observation)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        line.push('\n');

        use tokio::io::AsyncWriteExt;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryError::Io(e.to_string()))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Sink mock que acumula observations em memória (testes)
#[derive(Debug, Default)]
pub struct MockMemorySink {
    records: std::sync::Mutex<Vec<Observation>>,
}

impl MockMemorySink {
    /// Cria o sink vazio
    pub fn new() -> Self {
        Self::default()
    }

    /// Observations gravadas até agora
    pub fn recorded(&self) -> Vec<Observation> {
        self.records.lock().expect("mock sink lock").clone()
    }
}

#[async_trait]
impl MemorySink for MockMemorySink {
    fn name(&self) -> &str {
        "mock"
    }

    async fn record(&self, observation: &Observation) -> Result<(), MemoryError> {
        self.records
            .lock()
            .expect("mock sink lock")
            .push(observation.clone());
        Ok(())
    }
}

/// Bridge entre findings persistidos e o sink de memória externa
pub struct MemoryBridge {
    store: Arc<Store>,
    sink: Option<Arc<dyn MemorySink>>,
}

/// Gate inferior: candidato a write-through
pub fn meets_quality_threshold(finding: &Finding) -> bool {
    finding.confidence >= 0.7 && finding.sources.len() >= 2
}

/// Gate superior: alta qualidade (implica `meets_quality_threshold` na
/// dimensão de confiança)
pub fn is_high_quality(finding: &Finding) -> bool {
    finding.confidence >= 0.85
}

impl MemoryBridge {
    /// Cria o bridge. `sink = None` desativa o write-through sem erro.
    pub fn new(store: Arc<Store>, sink: Option<Arc<dyn MemorySink>>) -> Self {
        if sink.is_none() {
            log::info!("🧠 Memory bridge sem sink configurado (write-through desativado)");
        }
        Self { store, sink }
    }

    /// Injeção automática: aplica os dois gates de qualidade e exclui
    /// findings parciais. Retorna true quando uma observation foi gravada.
    pub async fn inject(
        &self,
        finding: &Finding,
        session_id: Option<&str>,
    ) -> Result<bool, MemoryError> {
        if finding.is_partial()
            || !meets_quality_threshold(finding)
            || !is_high_quality(finding)
        {
            return Ok(false);
        }
        self.write_through(finding, session_id).await
    }

    /// Injeção explícita: ignora os gates de qualidade
    pub async fn force_inject(
        &self,
        finding: &Finding,
        session_id: Option<&str>,
    ) -> Result<bool, MemoryError> {
        self.write_through(finding, session_id).await
    }

    async fn write_through(
        &self,
        finding: &Finding,
        session_id: Option<&str>,
    ) -> Result<bool, MemoryError> {
        let Some(sink) = &self.sink else {
            return Ok(false);
        };

        // Gate de idempotência: INSERT OR IGNORE em `injections`
        let newly_logged = self
            .store
            .log_injection(finding.id, sink.name())
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?;
        if !newly_logged {
            log::debug!("finding {} já injetado, pulando", finding.id);
            return Ok(false);
        }

        let observation = Observation::from_finding(finding, session_id);
        sink.record(&observation).await?;
        log::info!("🧠 Finding {} injetado na memória externa", finding.id);
        Ok(true)
    }
}
