//! In-memory job state store.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::broadcast;

use crate::error::{ControlError, ControlResult};
use crate::types::{
    BuildEngine, BuildStatus, JobId, JobState, StateTransition, UserToken, WebhookSecret,
};

use super::{StateStore, StateSubscription};

const DEFAULT_SUBSCRIBER_CAPACITY: usize = 15;

/// One tracked job: its state plus the broadcast handle feeding subscribers.
///
/// `notifier` is dropped when the job finishes. Receivers drain whatever
/// snapshots are still buffered and then observe the channel as closed.
#[derive(Debug)]
struct JobEntry {
    state: JobState,
    notifier: Option<broadcast::Sender<JobState>>,
}

/// In-memory job state store.
///
/// State lives only as long as the process. Jobs in flight when the service
/// restarts are recovered by the reporters re-delivering their statuses, not
/// by this store.
#[derive(Debug)]
pub struct MemoryStateStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
    /// Live (non-terminal) job count per owner token.
    counts: RwLock<HashMap<String, u32>>,
    /// Webhook secret to job id.
    secrets: RwLock<HashMap<String, String>>,
    subscriber_capacity: usize,
}

impl MemoryStateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::with_subscriber_capacity(DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Create a store whose per-job update feeds buffer `capacity` snapshots.
    ///
    /// A subscriber that falls more than `capacity` updates behind loses the
    /// oldest buffered snapshots, never the newest.
    #[must_use]
    pub fn with_subscriber_capacity(capacity: usize) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            counts: RwLock::new(HashMap::new()),
            secrets: RwLock::new(HashMap::new()),
            subscriber_capacity: capacity.max(1),
        }
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create_state(
        &self,
        job_id: &JobId,
        owner_token: &UserToken,
        engine: BuildEngine,
    ) -> ControlResult<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let key = job_id.as_str().to_owned();
        if jobs.contains_key(&key) {
            return Err(ControlError::internal(format!(
                "job {key} already registered"
            )));
        }

        let (notifier, _) = broadcast::channel(self.subscriber_capacity);
        jobs.insert(
            key,
            JobEntry {
                state: JobState::new(owner_token.clone(), engine),
                notifier: Some(notifier),
            },
        );

        let mut counts = self
            .counts
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;
        *counts.entry(owner_token.as_str().to_owned()).or_insert(0) += 1;

        Ok(())
    }

    async fn get_state(&self, job_id: &JobId) -> ControlResult<JobState> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        jobs.get(job_id.as_str())
            .map(|entry| entry.state.clone())
            .ok_or_else(|| ControlError::not_found(format!("no state for job {job_id}")))
    }

    async fn update_state(
        &self,
        job_id: &JobId,
        reason: &str,
        new_status: BuildStatus,
    ) -> ControlResult<()> {
        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let entry = jobs
            .get_mut(job_id.as_str())
            .ok_or_else(|| ControlError::not_found(format!("no state for job {job_id}")))?;

        // Finished jobs accept no further moves; re-delivered terminal
        // reports land here and are dropped.
        if entry.state.status.is_terminal() {
            return Ok(());
        }

        // A report naming a status the log has already recorded is a
        // re-delivery. Drop it without appending.
        let already_seen = entry
            .state
            .transitions
            .iter()
            .any(|t| t.from == new_status || t.to == new_status);
        if already_seen {
            return Ok(());
        }

        let now = Utc::now();
        entry.state.transitions.push(StateTransition {
            from: entry.state.status,
            to: new_status,
            at: now,
            reason: reason.to_owned(),
        });
        entry.state.status = new_status;
        entry.state.updated_at = now;

        if new_status.is_terminal() {
            let mut counts = self
                .counts
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            match counts.get_mut(entry.state.owner_token.as_str()) {
                Some(count) if *count > 1 => *count -= 1,
                Some(_) => {
                    counts.remove(entry.state.owner_token.as_str());
                }
                None => {}
            }
        }

        // Fan out the fresh snapshot. Send failures just mean nobody is
        // listening right now.
        if let Some(notifier) = &entry.notifier {
            let _ = notifier.send(entry.state.clone());
        }
        if new_status.is_terminal() {
            entry.notifier = None;
        }

        Ok(())
    }

    async fn concurrent_builds(&self, owner_token: &UserToken) -> ControlResult<u32> {
        let counts = self
            .counts
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        Ok(counts.get(owner_token.as_str()).copied().unwrap_or(0))
    }

    async fn subscribe(&self, job_id: &JobId) -> ControlResult<StateSubscription> {
        let jobs = self
            .jobs
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let entry = jobs
            .get(job_id.as_str())
            .ok_or_else(|| ControlError::not_found(format!("no state for job {job_id}")))?;

        Ok(StateSubscription {
            snapshot: entry.state.clone(),
            updates: entry.notifier.as_ref().map(broadcast::Sender::subscribe),
        })
    }

    async fn attach_secret(&self, secret: &WebhookSecret, job_id: &JobId) -> ControlResult<()> {
        if secret.as_str().is_empty() {
            return Err(ControlError::invalid_argument(
                "webhook secret must not be empty",
            ));
        }

        let mut secrets = self
            .secrets
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        secrets.insert(secret.as_str().to_owned(), job_id.as_str().to_owned());
        Ok(())
    }

    async fn resolve_secret(&self, secret: &WebhookSecret) -> ControlResult<JobId> {
        let secrets = self
            .secrets
            .read()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        secrets
            .get(secret.as_str())
            .map(JobId::new)
            .ok_or_else(|| ControlError::not_found("no job for webhook secret"))
    }

    async fn evict_finished(&self, ttl: Duration) -> ControlResult<usize> {
        let ttl =
            chrono::Duration::from_std(ttl).map_err(|e| ControlError::internal(e.to_string()))?;
        let cutoff = Utc::now() - ttl;

        let mut jobs = self
            .jobs
            .write()
            .map_err(|_| ControlError::internal("lock poisoned"))?;

        let expired: Vec<String> = jobs
            .iter()
            .filter(|(_, entry)| {
                entry.state.status.is_terminal() && entry.state.updated_at < cutoff
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            jobs.remove(id);
        }

        if !expired.is_empty() {
            let mut secrets = self
                .secrets
                .write()
                .map_err(|_| ControlError::internal("lock poisoned"))?;
            secrets.retain(|_, job| !expired.contains(job));
        }

        Ok(expired.len())
    }
}
