use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tokio::{
    sync::{Mutex, Semaphore},
    time::{Instant, sleep, sleep_until},
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    cache::{self, CacheEntry, StatusCache},
    config::Settings,
    error::JobError,
    extract::Extractor,
    llm::Completion,
    registry::{self, DocumentRecord},
    storage::BlobStore,
    summarize::Summarizer,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

/// Outcome of a summary submission. An already-known job reports the
/// state it is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    AlreadyActive(JobStatus),
    NotFound,
}

/// Durable record of one summarization job. The id equals the document id,
/// which is what makes enqueueing idempotent.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub status: String,
    pub result_text: Option<String>,
    pub failure_reason: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn fetch_job(pool: &PgPool, document_id: Uuid) -> Result<Option<JobRecord>> {
    sqlx::query_as::<_, JobRecord>(
        "SELECT id, owner_id, status, result_text, failure_reason, error_message, created_at, updated_at
         FROM summary_jobs WHERE id = $1",
    )
    .bind(document_id)
    .fetch_optional(pool)
    .await
    .context("failed to load summary job")
}

/// Projects a durable job record into the cache/polling shape.
pub fn entry_for_record(record: &JobRecord) -> CacheEntry {
    let status = JobStatus::parse(&record.status).unwrap_or(JobStatus::Pending);
    CacheEntry {
        job_id: record.id,
        status,
        content: match status {
            JobStatus::Completed => record.result_text.clone(),
            _ => None,
        },
        error_reason: match status {
            JobStatus::Failed => record.failure_reason.clone(),
            _ => None,
        },
        error_detail: match status {
            JobStatus::Failed => record.error_message.clone(),
            _ => None,
        },
    }
}

/// Spaces out worker launches so accepted jobs reach the downstream
/// services at a bounded rate.
pub struct RateGate {
    min_gap: Duration,
    next: Mutex<Instant>,
}

impl RateGate {
    pub fn new(rate_per_sec: u32) -> Self {
        let min_gap = if rate_per_sec == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / rate_per_sec
        };
        Self {
            min_gap,
            next: Mutex::new(Instant::now()),
        }
    }

    pub async fn acquire(&self) {
        if self.min_gap.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_gap;
            slot
        };
        sleep_until(slot).await;
    }
}

fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2_u32.saturating_pow(attempt.saturating_sub(1))
}

/// Retry decision for one failed attempt: transient failures back off
/// exponentially until the attempt ceiling, everything else is terminal
/// on first occurrence.
fn retry_delay(err: &JobError, attempt: u32, max_attempts: u32, base: Duration) -> Option<Duration> {
    if err.is_retryable() && attempt < max_attempts {
        Some(backoff_delay(base, attempt))
    } else {
        None
    }
}

/// Whether a submission that hit an existing job row should start a
/// worker anyway. Only a pending row qualifies: one without a live worker
/// (an earlier claim failure, or a restart) would never run again.
fn should_respawn(status: JobStatus) -> bool {
    status == JobStatus::Pending
}

/// Durable, idempotent execution of "produce a summary for document X".
/// Accepted submissions run on spawned worker tasks behind a concurrency
/// semaphore and a submission rate gate.
#[derive(Clone)]
pub struct SummaryQueue {
    pool: PgPool,
    blob: Arc<dyn BlobStore>,
    cache: Arc<dyn StatusCache>,
    settings: Arc<Settings>,
    extractor: Extractor,
    summarizer: Arc<Summarizer>,
    semaphore: Arc<Semaphore>,
    rate: Arc<RateGate>,
}

impl SummaryQueue {
    pub fn new(
        pool: PgPool,
        blob: Arc<dyn BlobStore>,
        cache: Arc<dyn StatusCache>,
        llm: Arc<dyn Completion>,
        settings: Arc<Settings>,
    ) -> Self {
        Self {
            extractor: Extractor::new(settings.download_timeout),
            summarizer: Arc::new(Summarizer::new(llm, &settings)),
            semaphore: Arc::new(Semaphore::new(settings.worker_concurrency)),
            rate: Arc::new(RateGate::new(settings.submit_rate_per_sec)),
            pool,
            blob,
            cache,
            settings,
        }
    }

    /// Idempotent on the document id: the job primary key doubles as the
    /// atomic check-and-insert, so two concurrent submissions for the same
    /// document produce exactly one job and one worker execution.
    pub async fn submit(&self, document_id: Uuid) -> Result<SubmitOutcome> {
        let Some(document) = registry::fetch_document(&self.pool, document_id).await? else {
            return Ok(SubmitOutcome::NotFound);
        };

        let inserted = sqlx::query(
            "INSERT INTO summary_jobs (id, owner_id, status) VALUES ($1, $2, $3)
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(document_id)
        .bind(document.owner_id)
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .context("failed to enqueue summary job")?;

        if inserted.rows_affected() == 0 {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT status FROM summary_jobs WHERE id = $1")
                    .bind(document_id)
                    .fetch_optional(&self.pool)
                    .await
                    .context("failed to inspect existing summary job")?;
            let Some((status,)) = row else {
                // The job row vanished between the insert and this read,
                // so the document was purged concurrently.
                return Ok(SubmitOutcome::NotFound);
            };
            let status = JobStatus::parse(&status).unwrap_or(JobStatus::Pending);

            if should_respawn(status) {
                let queue = self.clone();
                tokio::spawn(async move {
                    queue.run_job(document_id).await;
                });
            }

            return Ok(SubmitOutcome::AlreadyActive(status));
        }

        cache::store_entry(
            self.cache.as_ref(),
            &CacheEntry {
                job_id: document_id,
                status: JobStatus::Pending,
                content: None,
                error_reason: None,
                error_detail: None,
            },
        )
        .await;

        let queue = self.clone();
        tokio::spawn(async move {
            queue.run_job(document_id).await;
        });

        Ok(SubmitOutcome::Accepted)
    }

    /// Restores durability after a restart: interrupted `processing` rows
    /// are reset to `pending`, then every `pending` row gets a fresh
    /// worker. The claim guard keeps duplicate workers harmless.
    pub async fn recover(&self) -> Result<usize> {
        sqlx::query("UPDATE summary_jobs SET status = $2, updated_at = NOW() WHERE status = $1")
            .bind(JobStatus::Processing.as_str())
            .bind(JobStatus::Pending.as_str())
            .execute(&self.pool)
            .await
            .context("failed to reset interrupted summary jobs")?;

        let rows: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM summary_jobs WHERE status = $1")
            .bind(JobStatus::Pending.as_str())
            .fetch_all(&self.pool)
            .await
            .context("failed to list pending summary jobs")?;

        let resumed = rows.len();
        for (document_id,) in rows {
            let queue = self.clone();
            tokio::spawn(async move {
                queue.run_job(document_id).await;
            });
        }

        Ok(resumed)
    }

    async fn run_job(self, document_id: Uuid) {
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };
        self.rate.acquire().await;

        if let Err(err) = self.execute(document_id).await {
            error!(?err, %document_id, "summary job failed outside the pipeline");
            self.fail_job(document_id, "internal-error", &err.to_string())
                .await;
        }

        drop(permit);
    }

    async fn execute(&self, document_id: Uuid) -> Result<()> {
        let claimed = sqlx::query(
            "UPDATE summary_jobs SET status = $2, updated_at = NOW()
             WHERE id = $1 AND status = $3",
        )
        .bind(document_id)
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .execute(&self.pool)
        .await
        .context("failed to claim summary job")?;

        // Someone else claimed it, or the job is already terminal.
        if claimed.rows_affected() == 0 {
            return Ok(());
        }

        cache::store_entry(
            self.cache.as_ref(),
            &CacheEntry {
                job_id: document_id,
                status: JobStatus::Processing,
                content: None,
                error_reason: None,
                error_detail: None,
            },
        )
        .await;

        let document = registry::fetch_document(&self.pool, document_id)
            .await?
            .ok_or_else(|| anyhow!("document record vanished for job {document_id}"))?;

        let mut extracted = document
            .extracted_text
            .clone()
            .filter(|text| !text.trim().is_empty());

        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.attempt_summary(&document, &mut extracted).await {
                Ok(summary) => break Ok(summary),
                Err(err) => match retry_delay(
                    &err,
                    attempt,
                    self.settings.max_attempts,
                    self.settings.retry_base_delay,
                ) {
                    Some(delay) => {
                        warn!(%err, attempt, "summary job attempt failed, will retry");
                        sleep(delay).await;
                    }
                    None => break Err(err),
                },
            }
        };

        match result {
            Ok(summary) => self.complete_job(document_id, &summary).await?,
            Err(err) => {
                error!(%err, %document_id, reason = err.reason_code(), "summary job failed");
                self.fail_job(document_id, err.reason_code(), &err.to_string())
                    .await;
            }
        }

        Ok(())
    }

    /// One attempt at the extract-then-summarize pipeline. The extracted
    /// text is kept across attempts so a retry after a completion outage
    /// does not re-download or re-parse the document.
    async fn attempt_summary(
        &self,
        document: &DocumentRecord,
        extracted: &mut Option<String>,
    ) -> Result<String, JobError> {
        let text = match extracted {
            Some(text) => text.clone(),
            None => {
                let text = self
                    .extractor
                    .extract(self.blob.as_ref(), &document.storage_ref, &document.extension)
                    .await?;
                if let Err(err) =
                    registry::save_extracted_text(&self.pool, document.id, &text).await
                {
                    warn!(?err, document_id = %document.id, "failed to persist extracted text");
                }
                *extracted = Some(text.clone());
                text
            }
        };

        self.summarizer.summarize(&text).await.map_err(JobError::from)
    }

    async fn complete_job(&self, document_id: Uuid, summary: &str) -> Result<()> {
        // Guarded on the processing state so the terminal transition can
        // only happen once.
        sqlx::query(
            "UPDATE summary_jobs SET status = $2, result_text = $3, updated_at = NOW()
             WHERE id = $1 AND status = $4",
        )
        .bind(document_id)
        .bind(JobStatus::Completed.as_str())
        .bind(summary)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await
        .context("failed to finalize summary job")?;

        cache::store_entry(
            self.cache.as_ref(),
            &CacheEntry {
                job_id: document_id,
                status: JobStatus::Completed,
                content: Some(summary.to_string()),
                error_reason: None,
                error_detail: None,
            },
        )
        .await;

        Ok(())
    }

    async fn fail_job(&self, document_id: Uuid, reason: &str, detail: &str) {
        let updated = sqlx::query(
            "UPDATE summary_jobs
             SET status = $2, failure_reason = $3, error_message = $4, updated_at = NOW()
             WHERE id = $1 AND status = $5",
        )
        .bind(document_id)
        .bind(JobStatus::Failed.as_str())
        .bind(reason)
        .bind(detail)
        .bind(JobStatus::Processing.as_str())
        .execute(&self.pool)
        .await;

        match updated {
            Err(err) => {
                error!(?err, %document_id, "failed to record summary job failure");
                return;
            }
            // A terminal state was already recorded; leave its cache entry.
            Ok(result) if result.rows_affected() == 0 => return,
            Ok(_) => {}
        }

        cache::store_entry(
            self.cache.as_ref(),
            &CacheEntry {
                job_id: document_id,
                status: JobStatus::Failed,
                content: None,
                error_reason: Some(reason.to_string()),
                error_detail: Some(detail.to_string()),
            },
        )
        .await;
    }
}
