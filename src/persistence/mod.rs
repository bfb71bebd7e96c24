// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PERSISTÊNCIA - STORE EMBEDDED (SQLite)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//
// Banco embedded single-process com journaling WAL. Uma única conexão
// serializa os writers; leitores observam writes commitados. Todas as
// operações são async via spawn_blocking.
//
// Tabelas: tasks, findings, sources, url_cache, source_quality,
// injections, vectors.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

mod vector;

pub use vector::{cosine_similarity, decode_embedding, encode_embedding, SemanticIndex, SimilarFinding};

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::config::UrlCacheConfig;
use crate::types::{Depth, Finding, FindingSource, Task, TaskStatus};
use crate::utils::{jaccard_similarity, normalize_query, normalize_url};

/// Jaccard mínimo para considerar duas queries "similares" no caminho síncrono
pub const KEYWORD_SIMILARITY_THRESHOLD: f32 = 0.8;

/// Erros da camada de persistência
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Erro do SQLite
    #[error("Database error: {0}")]
    Database(String),

    /// Erro de (de)serialização de campos JSON
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transição de status inválida (estados terminais são finais)
    #[error("Invalid task transition: {from} -> {to}")]
    InvalidTransition {
        /// Estado atual
        from: &'static str,
        /// Estado pretendido
        to: &'static str,
    },

    /// Task/finding inexistente
    #[error("Not found: {0}")]
    NotFound(String),

    /// Falha na task blocking do runtime
    #[error("Join error: {0}")]
    Join(String),

    /// Falha ao gerar embedding (gateway LLM)
    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl From<rusqlite::Error> for PersistenceError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Contagem de tasks por status
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Tasks aguardando
    pub queued: u64,
    /// Tasks em execução
    pub running: u64,
    /// Tasks concluídas
    pub completed: u64,
    /// Tasks falhadas
    pub failed: u64,
    /// Tasks canceladas
    pub cancelled: u64,
}

/// Resultado do caminho síncrono de deduplicação de queries
#[derive(Debug, Clone, Default)]
pub struct SimilarQuery {
    /// Se uma query similar recente existe
    pub found: bool,
    /// A query existente, quando encontrada
    pub existing_query: Option<String>,
}

/// Entrada do cache de URLs
#[derive(Debug, Clone)]
pub struct CachedUrl {
    /// URL normalizada
    pub url: String,
    /// Conteúdo extraído
    pub content: String,
    /// Título, quando conhecido
    pub title: Option<String>,
    /// Momento do cache
    pub cached_at: DateTime<Utc>,
}

/// Entrada do ledger de qualidade de fontes
#[derive(Debug, Clone)]
pub struct SourceQuality {
    /// Domínio (hostname)
    pub domain: String,
    /// Tópico, quando a entrada é específica de tópico
    pub topic: Option<String>,
    /// Score de confiabilidade aprendido ∈ [0,1]
    pub score: f32,
    /// Feedbacks positivos
    pub positive: u32,
    /// Feedbacks negativos
    pub negative: u32,
}

/// Campos opcionais de uma atualização de status de task
#[derive(Debug, Clone, Default)]
pub struct TaskStatusFields {
    /// Momento de início
    pub started_at: Option<DateTime<Utc>>,
    /// Momento de término
    pub completed_at: Option<DateTime<Utc>>,
    /// Finding final
    pub finding_id: Option<Uuid>,
    /// Último erro
    pub error: Option<String>,
    /// Incremento de tentativas
    pub bump_attempts: bool,
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Store embedded: tasks, findings, cache de URLs, ledger de qualidade,
/// injeções e vetores
pub struct Store {
    conn: Arc<Mutex<Connection>>,
    url_cache: UrlCacheConfig,
}

impl Store {
    /// Abre (ou cria) o banco no caminho dado. `:memory:` para testes.
    pub async fn open(path: &str, url_cache: UrlCacheConfig) -> Result<Self, PersistenceError> {
        let path = path.to_string();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, PersistenceError> {
            let conn = Connection::open(&path)?;
            // WAL é no-op para :memory:, mas é o modo padrão em disco
            let _ = conn.pragma_update(None, "journal_mode", "WAL");
            conn.pragma_update(None, "foreign_keys", "ON")?;
            migrate_schema(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))??;

        log::info!("📦 Store aberto ({} tabelas)", 7);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            url_cache,
        })
    }

    /// Executa uma closure com a conexão, em uma thread blocking
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Join(e.to_string()))?
    }

    // ─────────────────────────────────────────────────
    // Tasks
    // ─────────────────────────────────────────────────

    /// Persiste uma task recém-criada (status `queued`)
    pub async fn create_task(&self, task: &Task) -> Result<(), PersistenceError> {
        let task = task.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, query, context, depth, priority, status, session_id, \
                 trigger_label, created_at, started_at, completed_at, finding_id, attempts, error) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    task.id.to_string(),
                    task.query,
                    task.context,
                    task.depth.as_str(),
                    task.priority,
                    task.status.as_str(),
                    task.session_id,
                    task.trigger,
                    millis(task.created_at),
                    task.started_at.map(millis),
                    task.completed_at.map(millis),
                    task.finding_id.map(|id| id.to_string()),
                    task.attempts,
                    task.error,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Atualiza o status de uma task.
    ///
    /// Transições a partir de estados terminais são rejeitadas com
    /// `InvalidTransition` (monotonicidade do ciclo de vida).
    pub async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        fields: TaskStatusFields,
    ) -> Result<(), PersistenceError> {
        self.with_conn(move |conn| {
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM tasks WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;

            let current = current.ok_or_else(|| PersistenceError::NotFound(id.to_string()))?;
            let current_status = TaskStatus::parse(&current)
                .ok_or_else(|| PersistenceError::Database(format!("corrupt status: {current}")))?;

            if current_status.is_terminal() && current_status != status {
                return Err(PersistenceError::InvalidTransition {
                    from: current_status.as_str(),
                    to: status.as_str(),
                });
            }

            let tx = conn.transaction()?;
            tx.execute(
                "UPDATE tasks SET status = ?2 WHERE id = ?1",
                params![id.to_string(), status.as_str()],
            )?;
            if let Some(started) = fields.started_at {
                tx.execute(
                    "UPDATE tasks SET started_at = ?2 WHERE id = ?1",
                    params![id.to_string(), millis(started)],
                )?;
            }
            if let Some(completed) = fields.completed_at {
                tx.execute(
                    "UPDATE tasks SET completed_at = ?2 WHERE id = ?1",
                    params![id.to_string(), millis(completed)],
                )?;
            }
            if let Some(finding_id) = fields.finding_id {
                tx.execute(
                    "UPDATE tasks SET finding_id = ?2 WHERE id = ?1",
                    params![id.to_string(), finding_id.to_string()],
                )?;
            }
            if let Some(error) = fields.error {
                tx.execute(
                    "UPDATE tasks SET error = ?2 WHERE id = ?1",
                    params![id.to_string(), error],
                )?;
            }
            if fields.bump_attempts {
                tx.execute(
                    "UPDATE tasks SET attempts = attempts + 1 WHERE id = ?1",
                    params![id.to_string()],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Associa o finding final a uma task concluída
    pub async fn save_task_result(&self, id: Uuid, finding_id: Uuid) -> Result<(), PersistenceError> {
        self.update_task_status(
            id,
            TaskStatus::Completed,
            TaskStatusFields {
                completed_at: Some(Utc::now()),
                finding_id: Some(finding_id),
                ..Default::default()
            },
        )
        .await
    }

    /// Busca uma task por id
    pub async fn get_task(&self, id: Uuid) -> Result<Option<Task>, PersistenceError> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, query, context, depth, priority, status, session_id, trigger_label, \
                 created_at, started_at, completed_at, finding_id, attempts, error \
                 FROM tasks WHERE id = ?1",
                params![id.to_string()],
                row_to_task,
            )
            .optional()
            .map_err(PersistenceError::from)
        })
        .await
    }

    /// Tasks `queued` em ordem de admissão: prioridade desc, criação asc
    pub async fn get_queued_tasks(&self, limit: usize) -> Result<Vec<Task>, PersistenceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, query, context, depth, priority, status, session_id, trigger_label, \
                 created_at, started_at, completed_at, finding_id, attempts, error \
                 FROM tasks WHERE status = 'queued' \
                 ORDER BY priority DESC, created_at ASC LIMIT ?1",
            )?;
            let tasks = stmt
                .query_map(params![limit as i64], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await
    }

    /// Tasks mais recentes (qualquer status), criação desc
    pub async fn get_recent_tasks(&self, limit: usize) -> Result<Vec<Task>, PersistenceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, query, context, depth, priority, status, session_id, trigger_label, \
                 created_at, started_at, completed_at, finding_id, attempts, error \
                 FROM tasks ORDER BY created_at DESC LIMIT ?1",
            )?;
            let tasks = stmt
                .query_map(params![limit as i64], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await
    }

    /// Busca keyword em tasks (query LIKE), mais recentes primeiro
    pub async fn search_tasks(&self, query: &str, limit: usize) -> Result<Vec<Task>, PersistenceError> {
        let pattern = format!("%{}%", query.trim());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, query, context, depth, priority, status, session_id, trigger_label, \
                 created_at, started_at, completed_at, finding_id, attempts, error \
                 FROM tasks WHERE query LIKE ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let tasks = stmt
                .query_map(params![pattern, limit as i64], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tasks)
        })
        .await
    }

    /// Contagem de tasks por status
    pub async fn get_queue_stats(&self) -> Result<QueueStats, PersistenceError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status")?;
            let mut stats = QueueStats::default();
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (status, count) = row?;
                let count = count.max(0) as u64;
                match status.as_str() {
                    "queued" => stats.queued = count,
                    "running" => stats.running = count,
                    "completed" => stats.completed = count,
                    "failed" => stats.failed = count,
                    "cancelled" => stats.cancelled = count,
                    _ => {}
                }
            }
            Ok(stats)
        })
        .await
    }

    // ─────────────────────────────────────────────────
    // Findings
    // ─────────────────────────────────────────────────

    /// Persiste um finding (sanitizado na entrada) e suas fontes
    pub async fn save_finding(
        &self,
        finding: &Finding,
        session_id: Option<&str>,
        project_path: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let mut finding = finding.clone();
        finding.sanitize();
        let session_id = session_id.map(str::to_string);
        let project_path = project_path.map(str::to_string);

        self.with_conn(move |conn| {
            let key_points = serde_json::to_string(&finding.key_points)?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO findings (id, query, summary, key_points, content, domain, depth, \
                 confidence, session_id, project_path, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    finding.id.to_string(),
                    finding.query,
                    finding.summary,
                    key_points,
                    finding.content,
                    finding.domain,
                    finding.depth.as_str(),
                    finding.confidence,
                    session_id,
                    project_path,
                    millis(finding.created_at),
                ],
            )?;
            for (position, source) in finding.sources.iter().enumerate() {
                tx.execute(
                    "INSERT INTO sources (finding_id, position, title, url, snippet, relevance, quality) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        finding.id.to_string(),
                        position as i64,
                        source.title,
                        source.url,
                        source.snippet,
                        source.relevance,
                        source.quality,
                    ],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Busca um finding por id (com fontes, em ordem)
    pub async fn get_finding(&self, id: Uuid) -> Result<Option<Finding>, PersistenceError> {
        self.with_conn(move |conn| {
            let finding = conn
                .query_row(
                    "SELECT id, query, summary, key_points, content, domain, depth, confidence, created_at \
                     FROM findings WHERE id = ?1",
                    params![id.to_string()],
                    row_to_finding,
                )
                .optional()?;

            let Some(mut finding) = finding else {
                return Ok(None);
            };

            let mut stmt = conn.prepare(
                "SELECT title, url, snippet, relevance, quality FROM sources \
                 WHERE finding_id = ?1 ORDER BY position ASC",
            )?;
            finding.sources = stmt
                .query_map(params![id.to_string()], |row| {
                    Ok(FindingSource {
                        title: row.get(0)?,
                        url: row.get(1)?,
                        snippet: row.get(2)?,
                        relevance: row.get(3)?,
                        quality: row.get(4)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(Some(finding))
        })
        .await
    }

    /// Busca keyword em findings (query/summary/content LIKE), recentes primeiro
    pub async fn search_findings(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Finding>, PersistenceError> {
        let pattern = format!("%{}%", query.trim());
        let ids: Vec<Uuid> = self
            .with_conn(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id FROM findings \
                     WHERE query LIKE ?1 OR summary LIKE ?1 OR content LIKE ?1 \
                     ORDER BY created_at DESC LIMIT ?2",
                )?;
                let ids = stmt
                    .query_map(params![pattern, limit as i64], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ids
                    .into_iter()
                    .filter_map(|raw| Uuid::parse_str(&raw).ok())
                    .collect())
            })
            .await?;

        let mut findings = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(finding) = self.get_finding(id).await? {
                findings.push(finding);
            }
        }
        Ok(findings)
    }

    /// Caminho síncrono (barato) de deduplicação: substring normalizada ou
    /// Jaccard ≥ 0.8 contra queries recentes de findings e tasks
    pub async fn has_recent_similar_query(
        &self,
        text: &str,
        window_ms: u64,
    ) -> Result<SimilarQuery, PersistenceError> {
        let cutoff = now_millis() - window_ms as i64;
        let needle = normalize_query(text);
        if needle.is_empty() {
            return Ok(SimilarQuery::default());
        }

        self.with_conn(move |conn| {
            let mut candidates: Vec<String> = Vec::new();

            let mut stmt =
                conn.prepare("SELECT query FROM findings WHERE created_at >= ?1")?;
            candidates.extend(
                stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?,
            );

            let mut stmt = conn.prepare(
                "SELECT query FROM tasks WHERE created_at >= ?1 AND status != 'failed'",
            )?;
            candidates.extend(
                stmt.query_map(params![cutoff], |row| row.get::<_, String>(0))?
                    .collect::<Result<Vec<_>, _>>()?,
            );

            for candidate in candidates {
                let normalized = normalize_query(&candidate);
                if normalized.is_empty() {
                    continue;
                }
                let contained =
                    normalized.contains(&needle) || needle.contains(&normalized);
                if contained
                    || jaccard_similarity(&needle, &normalized) >= KEYWORD_SIMILARITY_THRESHOLD
                {
                    return Ok(SimilarQuery {
                        found: true,
                        existing_query: Some(candidate),
                    });
                }
            }

            Ok(SimilarQuery::default())
        })
        .await
    }

    // ─────────────────────────────────────────────────
    // Cache de URLs
    // ─────────────────────────────────────────────────

    /// Busca conteúdo cacheado de uma URL. Entradas expiradas (TTL) são
    /// removidas; hits atualizam o last-access (LRU).
    pub async fn get_cached_url(&self, url: &str) -> Result<Option<CachedUrl>, PersistenceError> {
        let key = normalize_url(url);
        let ttl_ms = self.url_cache.ttl_ms as i64;
        self.with_conn(move |conn| {
            let row = conn
                .query_row(
                    "SELECT url, content, title, cached_at FROM url_cache WHERE url = ?1",
                    params![key],
                    |row| {
                        Ok(CachedUrl {
                            url: row.get(0)?,
                            content: row.get(1)?,
                            title: row.get(2)?,
                            cached_at: from_millis(row.get(3)?),
                        })
                    },
                )
                .optional()?;

            let Some(entry) = row else {
                return Ok(None);
            };

            let age_ms = now_millis() - millis(entry.cached_at);
            if age_ms > ttl_ms {
                conn.execute("DELETE FROM url_cache WHERE url = ?1", params![entry.url])?;
                log::debug!("url cache expired: {}", entry.url);
                return Ok(None);
            }

            conn.execute(
                "UPDATE url_cache SET last_access = ?2 WHERE url = ?1",
                params![entry.url, now_millis()],
            )?;
            Ok(Some(entry))
        })
        .await
    }

    /// Cacheia o conteúdo de uma URL e aplica o teto de bytes (eviction
    /// LRU por last-access)
    pub async fn cache_url(
        &self,
        url: &str,
        content: &str,
        title: Option<&str>,
    ) -> Result<(), PersistenceError> {
        let key = normalize_url(url);
        let content = content.to_string();
        let title = title.map(str::to_string);
        let max_bytes = self.url_cache.max_bytes as i64;

        self.with_conn(move |conn| {
            let now = now_millis();
            conn.execute(
                "INSERT OR REPLACE INTO url_cache (url, content, title, byte_len, cached_at, last_access) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![key, content, title, content.len() as i64, now],
            )?;

            // Eviction por byte cap: remove os menos recentemente acessados
            loop {
                let total: i64 = conn.query_row(
                    "SELECT COALESCE(SUM(byte_len), 0) FROM url_cache",
                    [],
                    |row| row.get(0),
                )?;
                if total <= max_bytes {
                    break;
                }
                let victim: Option<String> = conn
                    .query_row(
                        "SELECT url FROM url_cache ORDER BY last_access ASC LIMIT 1",
                        [],
                        |row| row.get(0),
                    )
                    .optional()?;
                match victim {
                    Some(victim) => {
                        conn.execute("DELETE FROM url_cache WHERE url = ?1", params![victim])?;
                        log::debug!("url cache evicted: {victim}");
                    }
                    None => break,
                }
            }
            Ok(())
        })
        .await
    }

    // ─────────────────────────────────────────────────
    // Ledger de qualidade de fontes
    // ─────────────────────────────────────────────────

    /// Registra feedback de qualidade para um (domínio, tópico).
    ///
    /// O score aprendido é a fração positiva com smoothing em direção a 0.5
    /// para amostras pequenas.
    pub async fn update_source_quality(
        &self,
        domain: &str,
        topic: Option<&str>,
        positive: bool,
    ) -> Result<(), PersistenceError> {
        let domain = domain.to_lowercase();
        let topic = topic.map(|t| t.to_lowercase()).unwrap_or_default();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO source_quality (domain, topic, score, positive, negative, updated_at) \
                 VALUES (?1, ?2, 0.5, 0, 0, ?3) \
                 ON CONFLICT(domain, topic) DO NOTHING",
                params![domain, topic, now_millis()],
            )?;

            let column = if positive { "positive" } else { "negative" };
            conn.execute(
                &format!(
                    "UPDATE source_quality SET {column} = {column} + 1, updated_at = ?3 \
                     WHERE domain = ?1 AND topic = ?2"
                ),
                params![domain, topic, now_millis()],
            )?;

            conn.execute(
                "UPDATE source_quality \
                 SET score = (positive + 2.5) / (positive + negative + 5.0) \
                 WHERE domain = ?1 AND topic = ?2",
                params![domain, topic],
            )?;
            Ok(())
        })
        .await
    }

    /// Entrada do ledger para um (domínio, tópico), com fallback para a
    /// entrada sem tópico
    pub async fn get_source_quality(
        &self,
        domain: &str,
        topic: Option<&str>,
    ) -> Result<Option<SourceQuality>, PersistenceError> {
        let domain = domain.to_lowercase();
        let topic = topic.map(|t| t.to_lowercase()).unwrap_or_default();

        self.with_conn(move |conn| {
            let lookup = |conn: &Connection, topic: &str| {
                conn.query_row(
                    "SELECT domain, topic, score, positive, negative FROM source_quality \
                     WHERE domain = ?1 AND topic = ?2",
                    params![domain, topic],
                    row_to_source_quality,
                )
                .optional()
            };

            if let Some(entry) = lookup(conn, &topic)? {
                return Ok(Some(entry));
            }
            if !topic.is_empty() {
                return Ok(lookup(conn, "")?);
            }
            Ok(None)
        })
        .await
    }

    /// Fontes mais confiáveis para um tópico ou domínio
    pub async fn get_reliable_sources(
        &self,
        topic_or_domain: &str,
        limit: usize,
    ) -> Result<Vec<SourceQuality>, PersistenceError> {
        let pattern = format!("%{}%", topic_or_domain.to_lowercase());
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT domain, topic, score, positive, negative FROM source_quality \
                 WHERE domain LIKE ?1 OR topic LIKE ?1 \
                 ORDER BY score DESC LIMIT ?2",
            )?;
            let entries = stmt
                .query_map(params![pattern, limit as i64], row_to_source_quality)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
    }

    // ─────────────────────────────────────────────────
    // Injeções (write-through para memória externa)
    // ─────────────────────────────────────────────────

    /// Registra uma injeção. Retorna `false` quando o finding já foi
    /// injetado (chave de idempotência = finding id).
    pub async fn log_injection(
        &self,
        finding_id: Uuid,
        target: &str,
    ) -> Result<bool, PersistenceError> {
        let target = target.to_string();
        self.with_conn(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO injections (finding_id, target, created_at) VALUES (?1, ?2, ?3)",
                params![finding_id.to_string(), target, now_millis()],
            )?;
            Ok(inserted > 0)
        })
        .await
    }

    /// Se um finding já foi injetado
    pub async fn has_injection(&self, finding_id: Uuid) -> Result<bool, PersistenceError> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM injections WHERE finding_id = ?1",
                params![finding_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    // ─────────────────────────────────────────────────
    // Vetores (usados pelo SemanticIndex)
    // ─────────────────────────────────────────────────

    /// Persiste o embedding de um finding
    pub async fn save_embedding(
        &self,
        finding_id: Uuid,
        embedding: &[f32],
    ) -> Result<(), PersistenceError> {
        let blob = encode_embedding(embedding);
        let dims = embedding.len() as i64;
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO vectors (finding_id, embedding, dims, created_at) \
                 VALUES (?1, ?2, ?3, ?4)",
                params![finding_id.to_string(), blob, dims, now_millis()],
            )?;
            Ok(())
        })
        .await
    }

    /// Embeddings de findings criados dentro da janela, com a query original
    pub async fn embeddings_since(
        &self,
        window_ms: Option<u64>,
    ) -> Result<Vec<(Uuid, String, Vec<f32>)>, PersistenceError> {
        let cutoff = window_ms.map(|w| now_millis() - w as i64).unwrap_or(i64::MIN);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT v.finding_id, f.query, v.embedding FROM vectors v \
                 JOIN findings f ON f.id = v.finding_id \
                 WHERE f.created_at >= ?1 ORDER BY f.created_at DESC",
            )?;
            let rows = stmt
                .query_map(params![cutoff], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows
                .into_iter()
                .filter_map(|(id, query, blob)| {
                    Uuid::parse_str(&id)
                        .ok()
                        .map(|id| (id, query, decode_embedding(&blob)))
                })
                .collect())
        })
        .await
    }
}

// ─────────────────────────────────────────────────
// Schema e mapeamentos de linha
// ─────────────────────────────────────────────────

fn migrate_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS tasks (
            id            TEXT PRIMARY KEY,
            query         TEXT NOT NULL,
            context       TEXT,
            depth         TEXT NOT NULL,
            priority      INTEGER NOT NULL,
            status        TEXT NOT NULL,
            session_id    TEXT,
            trigger_label TEXT NOT NULL,
            created_at    INTEGER NOT NULL,
            started_at    INTEGER,
            completed_at  INTEGER,
            finding_id    TEXT,
            attempts      INTEGER NOT NULL DEFAULT 0,
            error         TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks (status, priority DESC, created_at ASC);

        CREATE TABLE IF NOT EXISTS findings (
            id           TEXT PRIMARY KEY,
            query        TEXT NOT NULL,
            summary      TEXT NOT NULL,
            key_points   TEXT NOT NULL,
            content      TEXT NOT NULL,
            domain       TEXT,
            depth        TEXT NOT NULL,
            confidence   REAL NOT NULL,
            session_id   TEXT,
            project_path TEXT,
            created_at   INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_findings_created ON findings (created_at DESC);

        CREATE TABLE IF NOT EXISTS sources (
            finding_id TEXT NOT NULL REFERENCES findings(id) ON DELETE CASCADE,
            position   INTEGER NOT NULL,
            title      TEXT NOT NULL,
            url        TEXT NOT NULL,
            snippet    TEXT,
            relevance  REAL NOT NULL,
            quality    REAL,
            PRIMARY KEY (finding_id, position)
        );

        CREATE TABLE IF NOT EXISTS url_cache (
            url         TEXT PRIMARY KEY,
            content     TEXT NOT NULL,
            title       TEXT,
            byte_len    INTEGER NOT NULL,
            cached_at   INTEGER NOT NULL,
            last_access INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS source_quality (
            domain     TEXT NOT NULL,
            topic      TEXT NOT NULL DEFAULT '',
            score      REAL NOT NULL,
            positive   INTEGER NOT NULL DEFAULT 0,
            negative   INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (domain, topic)
        );

        CREATE TABLE IF NOT EXISTS injections (
            finding_id TEXT PRIMARY KEY,
            target     TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS vectors (
            finding_id TEXT PRIMARY KEY,
            embedding  BLOB NOT NULL,
            dims       INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let status: String = row.get(5)?;
    let finding_id: Option<String> = row.get(11)?;
    Ok(Task {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        query: row.get(1)?,
        context: row.get(2)?,
        depth: Depth::parse(&row.get::<_, String>(3)?),
        priority: row.get::<_, i64>(4)?.clamp(1, 10) as u8,
        status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Failed),
        session_id: row.get(6)?,
        trigger: row.get(7)?,
        created_at: from_millis(row.get(8)?),
        started_at: row.get::<_, Option<i64>>(9)?.map(from_millis),
        completed_at: row.get::<_, Option<i64>>(10)?.map(from_millis),
        finding_id: finding_id.and_then(|raw| Uuid::parse_str(&raw).ok()),
        attempts: row.get::<_, i64>(12)?.max(0) as u32,
        error: row.get(13)?,
    })
}

fn row_to_finding(row: &rusqlite::Row<'_>) -> rusqlite::Result<Finding> {
    let id: String = row.get(0)?;
    let key_points: String = row.get(3)?;
    Ok(Finding {
        id: Uuid::parse_str(&id).unwrap_or_default(),
        query: row.get(1)?,
        summary: row.get(2)?,
        key_points: serde_json::from_str(&key_points).unwrap_or_default(),
        content: row.get(4)?,
        sources: Vec::new(),
        domain: row.get(5)?,
        depth: Depth::parse(&row.get::<_, String>(6)?),
        confidence: row.get(7)?,
        created_at: from_millis(row.get(8)?),
    })
}

fn row_to_source_quality(row: &rusqlite::Row<'_>) -> rusqlite::Result<SourceQuality> {
    let topic: String = row.get(1)?;
    Ok(SourceQuality {
        domain: row.get(0)?,
        topic: if topic.is_empty() { None } else { Some(topic) },
        score: row.get(2)?,
        positive: row.get::<_, i64>(3)?.max(0) as u32,
        negative: row.get::<_, i64>(4)?.max(0) as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Depth, Finding, FindingSource, Task, TaskStatus};

    async fn memory_store() -> Store {
        Store::open(":memory:", UrlCacheConfig::default())
            .await
            .unwrap()
    }

    fn sample_finding(query: &str, confidence: f32) -> Finding {
        let mut finding = Finding::new(query, format!("summary of {query}"), confidence);
        finding.key_points = vec!["first point".into(), "second point".into()];
        finding.content = format!("full content about {query}");
        finding.sources.push(FindingSource {
            title: "Example".into(),
            url: "https://example.com/a".into(),
            snippet: Some("snippet".into()),
            relevance: 0.9,
            quality: Some(0.8),
        });
        finding
    }

    #[tokio::test]
    async fn test_finding_roundtrip_preserves_fields() {
        let store = memory_store().await;
        let finding = sample_finding("tokio graceful shutdown", 0.82);

        store.save_finding(&finding, Some("s1"), None).await.unwrap();
        let loaded = store.get_finding(finding.id).await.unwrap().unwrap();

        assert_eq!(loaded.id, finding.id);
        assert_eq!(loaded.query, finding.query);
        assert_eq!(loaded.summary, finding.summary);
        assert_eq!(loaded.key_points, finding.key_points);
        assert_eq!(loaded.content, finding.content);
        assert_eq!(loaded.sources.len(), 1);
        assert_eq!(loaded.sources[0].url, "https://example.com/a");
        assert!(loaded.confidence >= 0.0 && loaded.confidence <= 1.0);
        assert!(loaded.sources[0].relevance >= 0.0 && loaded.sources[0].relevance <= 1.0);
    }

    #[tokio::test]
    async fn test_task_lifecycle_and_monotonic_transitions() {
        let store = memory_store().await;
        let task = Task::new("query", Depth::Quick, "user", 5);
        store.create_task(&task).await.unwrap();

        store
            .update_task_status(
                task.id,
                TaskStatus::Running,
                TaskStatusFields {
                    started_at: Some(Utc::now()),
                    bump_attempts: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let finding = sample_finding("query", 0.9);
        store.save_finding(&finding, None, None).await.unwrap();
        store.save_task_result(task.id, finding.id).await.unwrap();

        let loaded = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Completed);
        assert_eq!(loaded.finding_id, Some(finding.id));
        assert_eq!(loaded.attempts, 1);

        // Estado terminal: nenhuma transição adicional é aceita
        let result = store
            .update_task_status(task.id, TaskStatus::Running, TaskStatusFields::default())
            .await;
        assert!(matches!(
            result,
            Err(PersistenceError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_queued_tasks_admission_order() {
        let store = memory_store().await;
        let mut low = Task::new("low", Depth::Quick, "user", 2);
        low.created_at = Utc::now() - chrono::Duration::seconds(10);
        let mut high_old = Task::new("high old", Depth::Quick, "user", 8);
        high_old.created_at = Utc::now() - chrono::Duration::seconds(5);
        let high_new = Task::new("high new", Depth::Quick, "user", 8);

        store.create_task(&low).await.unwrap();
        store.create_task(&high_new).await.unwrap();
        store.create_task(&high_old).await.unwrap();

        let queued = store.get_queued_tasks(10).await.unwrap();
        assert_eq!(queued[0].query, "high old");
        assert_eq!(queued[1].query, "high new");
        assert_eq!(queued[2].query, "low");
    }

    #[tokio::test]
    async fn test_queue_stats() {
        let store = memory_store().await;
        store
            .create_task(&Task::new("a", Depth::Quick, "user", 5))
            .await
            .unwrap();
        store
            .create_task(&Task::new("b", Depth::Quick, "user", 5))
            .await
            .unwrap();

        let stats = store.get_queue_stats().await.unwrap();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_recent_similar_query_jaccard() {
        let store = memory_store().await;
        let finding = sample_finding("how to implement rate limiting in FastAPI", 0.9);
        store.save_finding(&finding, None, None).await.unwrap();

        let similar = store
            .has_recent_similar_query("implement rate limiting FastAPI how to in", 60_000)
            .await
            .unwrap();
        assert!(similar.found);
        assert!(similar.existing_query.unwrap().contains("rate limiting"));

        let distinct = store
            .has_recent_similar_query("rust borrow checker lifetimes", 60_000)
            .await
            .unwrap();
        assert!(!distinct.found);
    }

    #[tokio::test]
    async fn test_url_cache_ttl_and_eviction() {
        let config = UrlCacheConfig {
            ttl_ms: 60_000,
            max_bytes: 40,
        };
        let store = Store::open(":memory:", config).await.unwrap();

        store
            .cache_url("https://a.example/", "0123456789012345678901234", None)
            .await
            .unwrap();
        // Hit via URL com case diferente (chave normalizada)
        let hit = store.get_cached_url("HTTPS://A.EXAMPLE").await.unwrap();
        assert!(hit.is_some());

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        // Segunda entrada estoura o byte cap e evicta a menos acessada
        store
            .cache_url("https://b.example/", "0123456789012345678901234", Some("B"))
            .await
            .unwrap();
        let total_a = store.get_cached_url("https://a.example").await.unwrap();
        let total_b = store.get_cached_url("https://b.example").await.unwrap();
        assert!(total_a.is_none());
        assert!(total_b.is_some());
    }

    #[tokio::test]
    async fn test_source_quality_feedback_roundtrip() {
        let store = memory_store().await;
        store
            .update_source_quality("docs.rs", Some("rust"), true)
            .await
            .unwrap();
        let after_up = store
            .get_source_quality("docs.rs", Some("rust"))
            .await
            .unwrap()
            .unwrap();

        store
            .update_source_quality("docs.rs", Some("rust"), false)
            .await
            .unwrap();
        let after_down = store
            .get_source_quality("docs.rs", Some("rust"))
            .await
            .unwrap()
            .unwrap();

        // +1/-1: contagens mudam, score volta para o ponto neutro
        assert_eq!(after_down.positive, 1);
        assert_eq!(after_down.negative, 1);
        assert!((after_down.score - 0.5).abs() < 1e-6);
        assert!(after_up.score > after_down.score);
    }

    #[tokio::test]
    async fn test_injection_idempotency() {
        let store = memory_store().await;
        let finding = sample_finding("q", 0.9);
        store.save_finding(&finding, None, None).await.unwrap();

        assert!(store.log_injection(finding.id, "memory").await.unwrap());
        assert!(!store.log_injection(finding.id, "memory").await.unwrap());
        assert!(store.has_injection(finding.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_search_tasks_keyword() {
        let store = memory_store().await;
        store
            .create_task(&Task::new("debug tokio deadlock", Depth::Quick, "user", 5))
            .await
            .unwrap();
        store
            .create_task(&Task::new("css centering", Depth::Quick, "user", 5))
            .await
            .unwrap();

        let hits = store.search_tasks("tokio", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].query, "debug tokio deadlock");
    }

    #[tokio::test]
    async fn test_reliable_sources_ranked_by_score() {
        let store = memory_store().await;
        for _ in 0..5 {
            store
                .update_source_quality("docs.rs", Some("rust"), true)
                .await
                .unwrap();
        }
        store
            .update_source_quality("sketchy.example", Some("rust"), false)
            .await
            .unwrap();

        let reliable = store.get_reliable_sources("rust", 10).await.unwrap();
        assert_eq!(reliable.len(), 2);
        assert_eq!(reliable[0].domain, "docs.rs");
        assert!(reliable[0].score > reliable[1].score);
    }

    #[tokio::test]
    async fn test_search_findings_keyword() {
        let store = memory_store().await;
        store
            .save_finding(&sample_finding("tokio channels", 0.9), None, None)
            .await
            .unwrap();
        store
            .save_finding(&sample_finding("python asyncio", 0.9), None, None)
            .await
            .unwrap();

        let hits = store.search_findings("tokio", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].query, "tokio channels");
    }
}
