//! Bounded worker pool for the per-session redact + classify step.

use anyhow::{Context, Result};
use codeclaw_storage::{RedactedSession, Session, TrajectoryLabel};
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::classifier::TrajectoryClassifier;
use crate::redaction::RedactionEngine;

/// A session that went through redaction and classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedSession {
    pub redacted: RedactedSession,
    pub label: TrajectoryLabel,
}

impl ProcessedSession {
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.redacted.session().session_id
    }
}

/// Redact, then classify what is left. Classification never sees raw content.
///
/// # Errors
///
/// Returns an error if the redaction engine fails
pub fn process_session(
    engine: &RedactionEngine,
    classifier: TrajectoryClassifier,
    session: &Session,
) -> Result<ProcessedSession> {
    let redacted = engine.redact(session)?;
    let label = classifier.classify(&redacted);
    Ok(ProcessedSession { redacted, label })
}

pub struct Pipeline {
    engine: Arc<RedactionEngine>,
    classifier: TrajectoryClassifier,
    max_parallel: Arc<Semaphore>,
}

impl Pipeline {
    #[must_use]
    pub fn new(engine: RedactionEngine, worker_count: usize) -> Self {
        Self {
            engine: Arc::new(engine),
            classifier: TrajectoryClassifier::new(),
            max_parallel: Arc::new(Semaphore::new(worker_count.max(1))),
        }
    }

    #[must_use]
    pub fn engine(&self) -> &RedactionEngine {
        &self.engine
    }

    /// Process sessions on the blocking pool, at most `worker_count` at a
    /// time. Results come back in input order.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker fails or panics
    pub async fn process(&self, sessions: Vec<Session>) -> Result<Vec<ProcessedSession>> {
        let total = sessions.len();
        let mut handles = Vec::with_capacity(total);

        for session in sessions {
            let permit = Arc::clone(&self.max_parallel)
                .acquire_owned()
                .await
                .context("Worker pool closed")?;
            let engine = Arc::clone(&self.engine);
            let classifier = self.classifier;
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                process_session(&engine, classifier, &session)
            }));
        }

        let mut processed = Vec::with_capacity(total);
        for handle in handles {
            processed.push(handle.await.context("Worker task panicked")??);
        }

        let quarantined = processed.iter().filter(|p| p.redacted.is_quarantined()).count();
        log::info!("Processed {total} sessions ({quarantined} flagged for quarantine)");
        Ok(processed)
    }
}
