//! Bounded regenerate-until-approved state machine.
//!
//! ```text
//! PendingFeedback --Approve-----------------------------> Approved
//! PendingFeedback --Reject/Ambiguous, count < max-------> Regenerating
//! Regenerating    --new content, count + 1 < max--------> PendingFeedback
//! Regenerating    --new content, count + 1 == max-------> NeedsManualReview
//! PendingFeedback --Reject/Ambiguous, count >= max------> NeedsManualReview
//! ```
//!
//! Engine failures leave the record untouched. Failed write-backs are
//! queued in memory and replayed by [`RegenerationController::flush_pending_writes`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::claims::ClaimSet;
use super::model::{FeedbackRecord, RecordStatus, update_fields};
use super::prompt::build_regeneration_prompt;
use crate::classifier::{Classifier, Verdict};
use crate::config::{ESCALATION_MARKER, LoopConfig};
use crate::engine::{ContentEngine, validate_output};
use crate::error::{EngineError, GatewayError, LoopError};
use crate::gateway::PersistenceGateway;
use crate::memory::{MemoryEntry, ToneMemoryStore, content_hash};
use crate::retry::{RetryError, RetryPolicy, retry_async};

/// What processing a record did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Approved; `memory_inserted` is false when the post was already remembered.
    Approved { memory_inserted: bool },
    /// New content written, awaiting fresh feedback.
    Regenerated { regeneration_count: u32 },
    /// Regeneration budget used up; handed to a human.
    Escalated { regeneration_count: u32 },
    /// Engine produced nothing usable; record left as it was.
    EngineFailed { attempts: u32, reason: String },
    /// Nothing to do for this record right now.
    Skipped { reason: String },
}

/// A write-back that failed and waits for the next cycle.
#[derive(Debug, Clone)]
pub struct PendingWrite {
    pub fields: Map<String, Value>,
    pub queued_at: DateTime<Utc>,
    pub attempts: u32,
}

pub struct RegenerationController {
    config: LoopConfig,
    classifier: Arc<dyn Classifier>,
    engine: Arc<dyn ContentEngine>,
    gateway: Arc<dyn PersistenceGateway>,
    memory: Arc<ToneMemoryStore>,
    claims: ClaimSet,
    pending_writes: Mutex<HashMap<String, PendingWrite>>,
    engine_policy: RetryPolicy,
    gateway_policy: RetryPolicy,
}

impl RegenerationController {
    pub fn new(
        config: LoopConfig,
        classifier: Arc<dyn Classifier>,
        engine: Arc<dyn ContentEngine>,
        gateway: Arc<dyn PersistenceGateway>,
        memory: Arc<ToneMemoryStore>,
    ) -> Self {
        let engine_policy = RetryPolicy::new(config.engine_attempts, config.engine_timeout);
        let gateway_policy = RetryPolicy::new(config.gateway_attempts, config.gateway_timeout);
        Self {
            config,
            classifier,
            engine,
            gateway,
            memory,
            claims: ClaimSet::new(),
            pending_writes: Mutex::new(HashMap::new()),
            engine_policy,
            gateway_policy,
        }
    }

    /// Override the backoff base for both retry policies.
    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.engine_policy = self.engine_policy.with_base_delay(delay);
        self.gateway_policy = self.gateway_policy.with_base_delay(delay);
        self
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    pub fn gateway(&self) -> &Arc<dyn PersistenceGateway> {
        &self.gateway
    }

    pub fn memory(&self) -> &Arc<ToneMemoryStore> {
        &self.memory
    }

    pub fn claims(&self) -> &ClaimSet {
        &self.claims
    }

    /// Run one state transition for `record`.
    pub async fn process(&self, record: &FeedbackRecord) -> Result<Outcome, LoopError> {
        if record.status.is_terminal() {
            return Err(LoopError::TerminalRecord {
                id: record.id.clone(),
                status: record.status.to_string(),
            });
        }

        let _claim = self
            .claims
            .try_claim(&record.id)
            .ok_or_else(|| LoopError::AlreadyClaimed(record.id.clone()))?;

        if self.has_pending_write(&record.id).await {
            return Ok(Outcome::Skipped {
                reason: "write-back pending".into(),
            });
        }
        if record.feedback_text.is_empty() {
            return Ok(Outcome::Skipped {
                reason: "no feedback".into(),
            });
        }

        let verdict = self.classifier.classify(&record.feedback_text);
        info!(
            record_id = %record.id,
            classifier = self.classifier.name(),
            verdict = verdict.label(),
            regeneration_count = record.regeneration_count,
            "Feedback classified"
        );

        match verdict {
            Verdict::Approve => self.approve(record).await,
            verdict if record.regeneration_count >= self.config.max_regenerations => {
                debug!(record_id = %record.id, verdict = verdict.label(), "Regeneration budget already spent");
                self.escalate(record).await
            }
            _ => self.regenerate(record).await,
        }
    }

    async fn approve(&self, record: &FeedbackRecord) -> Result<Outcome, LoopError> {
        let next = transition(&record.id, record.status, RecordStatus::Approved)?;

        let entry = MemoryEntry::new(&self.config.client_id, &record.topic, &record.content)
            .with_quality(record.quality);
        let memory_inserted = self.memory.add(entry).await?;

        let fields = update_fields(None, "", record.regeneration_count, next);
        self.write_back(&record.id, fields, None).await?;

        info!(record_id = %record.id, memory_inserted, "Post approved");
        Ok(Outcome::Approved { memory_inserted })
    }

    async fn escalate(&self, record: &FeedbackRecord) -> Result<Outcome, LoopError> {
        let next = transition(&record.id, record.status, RecordStatus::NeedsManualReview)?;
        let fields = update_fields(None, ESCALATION_MARKER, record.regeneration_count, next);
        self.write_back(&record.id, fields, None).await?;

        warn!(
            record_id = %record.id,
            regeneration_count = record.regeneration_count,
            "Maximum regenerations reached, marked for manual review"
        );
        Ok(Outcome::Escalated {
            regeneration_count: record.regeneration_count,
        })
    }

    async fn regenerate(&self, record: &FeedbackRecord) -> Result<Outcome, LoopError> {
        let status = transition(&record.id, record.status, RecordStatus::Regenerating)?;
        let attempt = record.regeneration_count + 1;

        let exemplars = self
            .memory
            .retrieve_similar(&record.topic, &self.config.client_id, 0, None)
            .await;
        let prompt = build_regeneration_prompt(
            &record.topic,
            &record.content,
            &record.feedback_text,
            &exemplars,
            attempt,
        );
        debug!(record_id = %record.id, exemplars = exemplars.len(), prompt_len = prompt.len(), "Regeneration prompt built");

        let previous_hash = content_hash(&record.content);
        let min_len = self.config.min_content_length;
        let generated = retry_async(&self.engine_policy, "engine.generate", |_| {
            let prompt = &prompt;
            let previous_hash = &previous_hash;
            async move {
                let raw = self.engine.generate(prompt).await?;
                let text = validate_output(&raw, min_len)?;
                if content_hash(&text) == *previous_hash {
                    return Err(EngineError::Unchanged);
                }
                Ok(text)
            }
        })
        .await;

        let content = match generated {
            Ok(text) => text,
            Err(e) => {
                let attempts = e.attempts();
                let cause = engine_error(e);
                error!(record_id = %record.id, attempts, error = %cause, "Regeneration failed, record left for next cycle");
                return Ok(Outcome::EngineFailed {
                    attempts,
                    reason: cause.to_string(),
                });
            }
        };

        let (target, feedback) = if attempt >= self.config.max_regenerations {
            (RecordStatus::NeedsManualReview, ESCALATION_MARKER)
        } else {
            (RecordStatus::PendingFeedback, "")
        };
        let next = transition(&record.id, status, target)?;

        let fields = update_fields(Some(&content), feedback, attempt, next);
        self.write_back(&record.id, fields, Some(&content)).await?;

        info!(
            record_id = %record.id,
            regeneration_count = attempt,
            status = %next,
            content_len = content.chars().count(),
            "Post regenerated"
        );
        if next == RecordStatus::NeedsManualReview {
            warn!(record_id = %record.id, "Maximum regenerations reached, marked for manual review");
            Ok(Outcome::Escalated {
                regeneration_count: attempt,
            })
        } else {
            Ok(Outcome::Regenerated {
                regeneration_count: attempt,
            })
        }
    }

    async fn write_back(
        &self,
        id: &str,
        fields: Map<String, Value>,
        generated: Option<&str>,
    ) -> Result<(), LoopError> {
        let result = retry_async(&self.gateway_policy, "gateway.update_record", |_| {
            self.gateway.update_record(id, &fields)
        })
        .await;

        match result {
            Ok(true) => Ok(()),
            Ok(false) => {
                match generated {
                    Some(text) => {
                        warn!(record_id = %id, content = %text, "Record disappeared before write-back, generated content dropped")
                    }
                    None => warn!(record_id = %id, "Record disappeared before write-back"),
                }
                Err(GatewayError::NotFound(id.to_string()).into())
            }
            Err(e) => {
                if let Some(text) = generated {
                    warn!(record_id = %id, content = %text, "Generated content not yet stored, keeping it for retry");
                }
                error!(record_id = %id, error = %e, "Write-back failed, queued for next cycle");
                self.pending_writes.lock().await.insert(
                    id.to_string(),
                    PendingWrite {
                        fields,
                        queued_at: Utc::now(),
                        attempts: e.attempts(),
                    },
                );
                Err(gateway_error("update_record", e).into())
            }
        }
    }

    /// Replay queued write-backs. Returns how many were stored.
    pub async fn flush_pending_writes(&self) -> usize {
        let queued: Vec<(String, PendingWrite)> = self
            .pending_writes
            .lock()
            .await
            .iter()
            .map(|(id, w)| (id.clone(), w.clone()))
            .collect();

        let mut flushed = 0;
        for (id, write) in queued {
            let result = retry_async(&self.gateway_policy, "gateway.flush", |_| {
                self.gateway.update_record(&id, &write.fields)
            })
            .await;

            let mut pending = self.pending_writes.lock().await;
            match result {
                Ok(true) => {
                    pending.remove(&id);
                    flushed += 1;
                    info!(record_id = %id, queued_at = %write.queued_at, "Queued write-back stored");
                }
                Ok(false) => {
                    pending.remove(&id);
                    warn!(record_id = %id, "Dropping queued write-back for missing record");
                }
                Err(e) => {
                    if let Some(w) = pending.get_mut(&id) {
                        w.attempts += e.attempts();
                    }
                    warn!(record_id = %id, error = %e, "Queued write-back still failing");
                }
            }
        }
        flushed
    }

    pub async fn has_pending_write(&self, id: &str) -> bool {
        self.pending_writes.lock().await.contains_key(id)
    }

    pub async fn pending_write_count(&self) -> usize {
        self.pending_writes.lock().await.len()
    }
}

fn transition(
    record_id: &str,
    from: RecordStatus,
    to: RecordStatus,
) -> Result<RecordStatus, LoopError> {
    if !from.can_transition_to(to) {
        return Err(LoopError::InvalidTransition {
            id: record_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    debug!(record_id, %from, %to, "Record transition");
    Ok(to)
}

pub(crate) fn gateway_error(op: &str, err: RetryError<GatewayError>) -> GatewayError {
    match err {
        RetryError::Exhausted { last, .. } => last,
        RetryError::TimedOut { timeout, .. } => GatewayError::Timeout {
            op: op.to_string(),
            timeout,
        },
    }
}

fn engine_error(err: RetryError<EngineError>) -> EngineError {
    match err {
        RetryError::Exhausted { last, .. } => last,
        RetryError::TimedOut { timeout, .. } => EngineError::Timeout(timeout),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::classifier::LexiconClassifier;
    use crate::gateway::{GatewayRecord, LocalGateway, fields};
    use crate::store::{Database, LibSqlBackend};

    const ORIGINAL: &str = "The original draft about pricing your services.";

    /// Returns queued outputs in order; empty output once the script runs out.
    struct ScriptedEngine {
        outputs: std::sync::Mutex<VecDeque<Result<String, EngineError>>>,
        calls: AtomicU32,
    }

    impl ScriptedEngine {
        fn new(outputs: Vec<Result<String, EngineError>>) -> Self {
            Self {
                outputs: std::sync::Mutex::new(outputs.into()),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl ContentEngine for ScriptedEngine {
        fn model_name(&self) -> &str {
            "scripted"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(String::new()))
        }
    }

    /// Local gateway whose next `fail_updates` updates fail.
    struct FlakyGateway {
        inner: LocalGateway,
        fail_updates: AtomicU32,
    }

    #[async_trait]
    impl PersistenceGateway for FlakyGateway {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn get_all_records(&self) -> Result<Vec<GatewayRecord>, GatewayError> {
            self.inner.get_all_records().await
        }

        async fn update_record(
            &self,
            id: &str,
            partial: &Map<String, Value>,
        ) -> Result<bool, GatewayError> {
            let remaining = self.fail_updates.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_updates.store(remaining - 1, Ordering::SeqCst);
                return Err(GatewayError::Request("connection reset".into()));
            }
            self.inner.update_record(id, partial).await
        }
    }

    struct Fixture {
        controller: RegenerationController,
        gateway: Arc<FlakyGateway>,
        engine: Arc<ScriptedEngine>,
        memory: Arc<ToneMemoryStore>,
    }

    fn test_config() -> LoopConfig {
        LoopConfig {
            min_content_length: 10,
            engine_attempts: 2,
            gateway_attempts: 1,
            engine_timeout: Duration::from_secs(2),
            gateway_timeout: Duration::from_secs(2),
            client_id: "sam".into(),
            ..LoopConfig::default()
        }
    }

    async fn fixture(outputs: Vec<Result<String, EngineError>>) -> Fixture {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(FlakyGateway {
            inner: LocalGateway::new(db.clone()),
            fail_updates: AtomicU32::new(0),
        });
        let engine = Arc::new(ScriptedEngine::new(outputs));
        let memory = Arc::new(ToneMemoryStore::load(db, None).await.unwrap());
        let controller = RegenerationController::new(
            test_config(),
            Arc::new(LexiconClassifier::default()),
            engine.clone(),
            gateway.clone(),
            memory.clone(),
        )
        .with_retry_base_delay(Duration::ZERO);
        Fixture {
            controller,
            gateway,
            engine,
            memory,
        }
    }

    async fn seed(fx: &Fixture, feedback: &str, count: u32) -> FeedbackRecord {
        let id = fx.gateway.inner.create_record("pricing", ORIGINAL).await.unwrap();
        let mut partial = Map::new();
        partial.insert(fields::FEEDBACK.into(), Value::from(feedback));
        partial.insert(fields::REGENERATION_COUNT.into(), Value::from(count));
        fx.gateway.inner.update_record(&id, &partial).await.unwrap();
        reload(fx, &id).await
    }

    async fn reload(fx: &Fixture, id: &str) -> FeedbackRecord {
        let record = fx
            .gateway
            .get_all_records()
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.id == id)
            .unwrap();
        FeedbackRecord::from_gateway(&record).unwrap()
    }

    #[tokio::test]
    async fn approval_stores_memory_and_finalizes() {
        let fx = fixture(vec![]).await;
        let record = seed(&fx, "Yes, I love this, publish it", 0).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert_eq!(outcome, Outcome::Approved { memory_inserted: true });

        let after = reload(&fx, &record.id).await;
        assert_eq!(after.status, RecordStatus::Approved);
        assert_eq!(after.feedback_text, "");
        assert_eq!(after.content, ORIGINAL);

        let stats = fx.memory.stats().await;
        assert_eq!(stats.total_posts, 1);
        let stored = fx.memory.entries(Some("sam")).await;
        assert_eq!(stored[0].content_hash, content_hash(ORIGINAL));
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_regenerates_and_clears_feedback() {
        let fx = fixture(vec![Ok("A warmer, more personal take on pricing.".into())]).await;
        let record = seed(&fx, "No, too generic, make it more personal", 0).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert_eq!(outcome, Outcome::Regenerated { regeneration_count: 1 });

        let after = reload(&fx, &record.id).await;
        assert_eq!(after.status, RecordStatus::PendingFeedback);
        assert_eq!(after.regeneration_count, 1);
        assert_eq!(after.feedback_text, "");
        assert_ne!(after.content, ORIGINAL);
        assert_eq!(fx.memory.stats().await.total_posts, 0);
    }

    #[tokio::test]
    async fn ambiguous_feedback_regenerates() {
        let fx = fixture(vec![Ok("Another angle on pricing entirely.".into())]).await;
        let record = seed(&fx, "hmm, not sure", 0).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert_eq!(outcome, Outcome::Regenerated { regeneration_count: 1 });
    }

    #[tokio::test]
    async fn engine_failure_leaves_record_untouched() {
        let fx = fixture(vec![
            Ok(String::new()),
            Ok("short".into()),
        ])
        .await;
        let record = seed(&fx, "too long", 2).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert!(matches!(outcome, Outcome::EngineFailed { attempts: 2, .. }));
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 2);

        let after = reload(&fx, &record.id).await;
        assert_eq!(after, record);
    }

    #[tokio::test]
    async fn unchanged_output_counts_as_failure() {
        let fx = fixture(vec![
            Ok(format!("  {ORIGINAL}  ")),
            Ok("A genuinely different version of the post.".into()),
        ])
        .await;
        let record = seed(&fx, "redo", 0).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert_eq!(outcome, Outcome::Regenerated { regeneration_count: 1 });
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn last_regeneration_escalates() {
        let fx = fixture(vec![Ok("Fifth and final rewrite of this post.".into())]).await;
        let record = seed(&fx, "still too generic", 4).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert_eq!(outcome, Outcome::Escalated { regeneration_count: 5 });

        let after = reload(&fx, &record.id).await;
        assert_eq!(after.status, RecordStatus::NeedsManualReview);
        assert_eq!(after.regeneration_count, 5);
        assert_eq!(after.feedback_text, ESCALATION_MARKER);
        assert_eq!(after.content, "Fifth and final rewrite of this post.");
    }

    #[tokio::test]
    async fn spent_budget_escalates_without_engine_call() {
        let fx = fixture(vec![]).await;
        let record = seed(&fx, "no", 5).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        assert_eq!(outcome, Outcome::Escalated { regeneration_count: 5 });
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reload(&fx, &record.id).await.content, ORIGINAL);
    }

    #[tokio::test]
    async fn approval_still_wins_at_budget() {
        let fx = fixture(vec![]).await;
        let record = seed(&fx, "perfect", 5).await;
        let outcome = fx.controller.process(&record).await.unwrap();
        assert!(matches!(outcome, Outcome::Approved { .. }));
    }

    #[tokio::test]
    async fn terminal_and_claimed_records_are_refused() {
        let fx = fixture(vec![]).await;
        let mut record = seed(&fx, "yes", 0).await;

        let guard = fx.controller.claims().try_claim(&record.id).unwrap();
        let err = fx.controller.process(&record).await.unwrap_err();
        assert!(matches!(err, LoopError::AlreadyClaimed(_)));
        drop(guard);

        record.status = RecordStatus::Approved;
        let err = fx.controller.process(&record).await.unwrap_err();
        assert!(matches!(err, LoopError::TerminalRecord { .. }));
    }

    #[tokio::test]
    async fn empty_feedback_is_skipped() {
        let fx = fixture(vec![]).await;
        let record = seed(&fx, "", 0).await;
        let outcome = fx.controller.process(&record).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn failed_write_back_is_queued_and_replayed() {
        let fx = fixture(vec![Ok("A rewrite that could not be saved at first.".into())]).await;
        let record = seed(&fx, "change the ending", 0).await;
        fx.gateway.fail_updates.store(1, Ordering::SeqCst);

        let err = fx.controller.process(&record).await.unwrap_err();
        assert!(matches!(err, LoopError::Gateway(_)));
        assert_eq!(fx.controller.pending_write_count().await, 1);
        assert_eq!(reload(&fx, &record.id).await.regeneration_count, 0);

        // The same record is not regenerated again while its write is queued.
        let outcome = fx.controller.process(&record).await.unwrap();
        assert!(matches!(outcome, Outcome::Skipped { .. }));
        assert_eq!(fx.engine.calls.load(Ordering::SeqCst), 1);

        assert_eq!(fx.controller.flush_pending_writes().await, 1);
        assert_eq!(fx.controller.pending_write_count().await, 0);

        let after = reload(&fx, &record.id).await;
        assert_eq!(after.regeneration_count, 1);
        assert_eq!(after.content, "A rewrite that could not be saved at first.");
    }

    #[tokio::test]
    async fn provider_errors_leave_record_untouched() {
        let refused = || EngineError::RequestFailed {
            provider: "openai".into(),
            reason: "429 rate limited".into(),
        };
        let fx = fixture(vec![Err(refused()), Err(refused())]).await;
        let record = seed(&fx, "make it punchier", 1).await;

        let outcome = fx.controller.process(&record).await.unwrap();
        match outcome {
            Outcome::EngineFailed { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert!(reason.contains("429 rate limited"), "{reason}");
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(reload(&fx, &record.id).await, record);
        assert!(fx.controller.claims().is_empty());
    }

    /// Sleeps past any reasonable engine timeout.
    struct StalledEngine;

    #[async_trait]
    impl ContentEngine for StalledEngine {
        fn model_name(&self) -> &str {
            "stalled"
        }

        async fn generate(&self, _prompt: &str) -> Result<String, EngineError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok("never returned".into())
        }
    }

    #[tokio::test]
    async fn engine_timeout_leaves_record_untouched() {
        let fx = fixture(vec![]).await;
        let record = seed(&fx, "shorter please", 0).await;

        let config = LoopConfig {
            engine_timeout: Duration::from_millis(50),
            ..test_config()
        };
        let controller = RegenerationController::new(
            config,
            Arc::new(LexiconClassifier::default()),
            Arc::new(StalledEngine),
            fx.gateway.clone(),
            fx.memory.clone(),
        )
        .with_retry_base_delay(Duration::ZERO);

        let outcome = controller.process(&record).await.unwrap();
        match outcome {
            Outcome::EngineFailed { attempts, reason } => {
                assert_eq!(attempts, 2);
                assert_eq!(reason, EngineError::Timeout(Duration::from_millis(50)).to_string());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(reload(&fx, &record.id).await, record);
    }

    #[tokio::test]
    async fn vanished_record_is_not_queued() {
        let fx = fixture(vec![Ok("A rewrite for a record that is gone.".into())]).await;
        let mut record = seed(&fx, "try again", 0).await;
        record.id = "rec-deleted".into();

        let err = fx.controller.process(&record).await.unwrap_err();
        assert!(matches!(err, LoopError::Gateway(GatewayError::NotFound(ref id)) if id == "rec-deleted"));
        assert_eq!(fx.controller.pending_write_count().await, 0);
        assert!(fx.controller.claims().is_empty());
    }
}
