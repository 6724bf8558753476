//! Status reconciliation for build jobs.
//!
//! Two feeders advance a scheduler-backed job: the build workflow pushes
//! reports through the status webhook, and a per-job background poller
//! pulls the scheduler's report list. Both paths apply reports through the
//! state store, whose dedup rules make them safe to run together.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::ControlResult;
use crate::scheduler::{StatusReport, WorkloadScheduler};
use crate::state::StateStore;
use crate::types::{JobId, WebhookSecret};

/// Apply one pushed status report to the job its webhook secret names.
///
/// Returns the job the report was attributed to. Unknown secrets report
/// [`crate::error::ControlError::NotFound`].
pub async fn apply_report(
    store: &Arc<dyn StateStore>,
    secret: &WebhookSecret,
    report: &StatusReport,
) -> ControlResult<JobId> {
    let job_id = store.resolve_secret(secret).await?;
    store
        .update_state(&job_id, &report.message, report.status)
        .await?;
    Ok(job_id)
}

/// Cancellation handle for one job's poller.
struct PollerHandle {
    token: CancellationToken,
}

/// Tracks the background pollers that pull scheduler status for live jobs.
///
/// Each watched job gets its own task and cancellation handle. Pollers
/// deregister themselves when their job finishes or their retry budget
/// runs out; [`PollerRegistry::shutdown`] cancels whatever remains.
pub struct PollerRegistry {
    store: Arc<dyn StateStore>,
    scheduler: Arc<dyn WorkloadScheduler>,
    poll_interval: Duration,
    max_attempts: u32,
    pollers: RwLock<HashMap<JobId, PollerHandle>>,
    cancel: CancellationToken,
}

impl PollerRegistry {
    /// Create a registry polling `scheduler` every `poll_interval`.
    ///
    /// `max_attempts` bounds how many failed or empty reads one job gets
    /// before its poller gives up; successful reads do not consume it.
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        scheduler: Arc<dyn WorkloadScheduler>,
        poll_interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            scheduler,
            poll_interval,
            max_attempts,
            pollers: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Start polling scheduler status for `job_id`.
    pub fn watch(self: &Arc<Self>, job_id: JobId) {
        let token = self.cancel.child_token();
        self.pollers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(job_id.clone(), PollerHandle { token: token.clone() });

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    debug!(job = %job_id, "status poll cancelled");
                }
                () = registry.poll_job(&job_id) => {}
            }
            registry
                .pollers
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&job_id);
        });
    }

    /// Stop polling `job_id`, if a poller is live for it.
    ///
    /// Webhook delivery of a terminal report makes further polling
    /// pointless; this releases the task ahead of its next tick.
    pub fn unwatch(&self, job_id: &JobId) {
        let handle = self
            .pollers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
        if let Some(handle) = handle {
            handle.token.cancel();
        }
    }

    /// Number of jobs currently being polled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pollers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Whether no pollers are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every live poller.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pollers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    async fn poll_job(&self, job_id: &JobId) {
        let mut attempts_left = self.max_attempts;
        loop {
            tokio::time::sleep(self.poll_interval).await;

            // The sweep may have evicted the job; nothing left to feed.
            let state = match self.store.get_state(job_id).await {
                Ok(state) => state,
                Err(_) => return,
            };
            if state.status.is_terminal() {
                return;
            }

            let reports = match self.scheduler.workflow_reports(job_id).await {
                Ok(Some(reports)) => reports,
                Ok(None) => {
                    attempts_left = attempts_left.saturating_sub(1);
                    if attempts_left == 0 {
                        warn!(
                            job = %job_id,
                            "poll budget exhausted before the workflow materialised"
                        );
                        return;
                    }
                    continue;
                }
                Err(e) => {
                    attempts_left = attempts_left.saturating_sub(1);
                    if attempts_left == 0 {
                        warn!(job = %job_id, error = %e, "poll budget exhausted");
                        return;
                    }
                    debug!(job = %job_id, error = %e, "status poll failed, will retry");
                    continue;
                }
            };

            for report in &reports {
                // The webhook path may have delivered this status already.
                let seen = state
                    .transitions
                    .iter()
                    .any(|t| t.from == report.status || t.to == report.status);
                if seen {
                    continue;
                }
                if let Err(e) = self
                    .store
                    .update_state(job_id, &report.message, report.status)
                    .await
                {
                    warn!(job = %job_id, error = %e, "failed to apply polled report");
                    return;
                }
                if report.status.is_terminal() {
                    info!(job = %job_id, status = %report.status, "job finished");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::MockScheduler;
    use crate::state::MemoryStateStore;
    use crate::types::{BuildEngine, BuildStatus, UserToken};

    fn report(status: BuildStatus, message: &str) -> StatusReport {
        StatusReport {
            status,
            message: message.to_owned(),
            time: None,
        }
    }

    async fn wait_for_status(store: &Arc<dyn StateStore>, job_id: &JobId, status: BuildStatus) {
        for _ in 0..300 {
            if let Ok(state) = store.get_state(job_id).await {
                if state.status == status {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {status}");
    }

    async fn wait_for_drained(registry: &PollerRegistry) {
        for _ in 0..300 {
            if registry.is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pollers never drained");
    }

    #[tokio::test]
    async fn apply_report_resolves_the_webhook_secret() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let job_id = JobId::generate();
        let secret = WebhookSecret::generate();
        store
            .create_state(&job_id, &UserToken::new("caller"), BuildEngine::ExternalScheduler)
            .await
            .unwrap();
        store.attach_secret(&secret, &job_id).await.unwrap();

        let applied = apply_report(&store, &secret, &report(BuildStatus::Building, "compiling"))
            .await
            .unwrap();
        assert_eq!(applied, job_id);

        let state = store.get_state(&job_id).await.unwrap();
        assert_eq!(state.status, BuildStatus::Building);
    }

    #[tokio::test]
    async fn apply_report_rejects_unknown_secrets() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

        let err = apply_report(
            &store,
            &WebhookSecret::new("no-such-secret"),
            &report(BuildStatus::Building, "compiling"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, crate::error::ControlError::NotFound(_)));
    }

    #[tokio::test]
    async fn watch_applies_polled_reports_until_terminal() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let scheduler = Arc::new(MockScheduler::new());
        let job_id = JobId::generate();
        store
            .create_state(&job_id, &UserToken::new("caller"), BuildEngine::ExternalScheduler)
            .await
            .unwrap();

        scheduler.push_poll_answer(&job_id, None);
        scheduler.push_poll_answer(
            &job_id,
            Some(vec![report(BuildStatus::Scheduled, "workflow accepted")]),
        );
        scheduler.push_poll_answer(
            &job_id,
            Some(vec![
                report(BuildStatus::Scheduled, "workflow accepted"),
                report(BuildStatus::Building, "compiling"),
                report(BuildStatus::Succeeded, "done"),
            ]),
        );

        let registry = Arc::new(PollerRegistry::new(
            Arc::clone(&store),
            scheduler as Arc<dyn WorkloadScheduler>,
            Duration::from_millis(10),
            35,
        ));
        registry.watch(job_id.clone());

        wait_for_status(&store, &job_id, BuildStatus::Succeeded).await;
        wait_for_drained(&registry).await;

        let state = store.get_state(&job_id).await.unwrap();
        let moves: Vec<BuildStatus> = state.transitions.iter().map(|t| t.to).collect();
        assert_eq!(
            moves,
            vec![
                BuildStatus::Pending,
                BuildStatus::Scheduled,
                BuildStatus::Building,
                BuildStatus::Succeeded,
            ]
        );
    }

    #[tokio::test]
    async fn poll_budget_stops_quiet_jobs() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let scheduler = Arc::new(MockScheduler::new());
        let job_id = JobId::generate();
        store
            .create_state(&job_id, &UserToken::new("caller"), BuildEngine::ExternalScheduler)
            .await
            .unwrap();
        scheduler.push_poll_answer(&job_id, None);

        let registry = Arc::new(PollerRegistry::new(
            Arc::clone(&store),
            scheduler as Arc<dyn WorkloadScheduler>,
            Duration::from_millis(5),
            3,
        ));
        registry.watch(job_id.clone());

        wait_for_drained(&registry).await;

        let state = store.get_state(&job_id).await.unwrap();
        assert_eq!(state.status, BuildStatus::Pending);
    }

    #[tokio::test]
    async fn unwatch_stops_a_single_poller() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let scheduler = Arc::new(MockScheduler::new());
        let job_id = JobId::generate();
        store
            .create_state(&job_id, &UserToken::new("caller"), BuildEngine::ExternalScheduler)
            .await
            .unwrap();
        scheduler.push_poll_answer(&job_id, None);

        let registry = Arc::new(PollerRegistry::new(
            Arc::clone(&store),
            scheduler as Arc<dyn WorkloadScheduler>,
            Duration::from_secs(60),
            35,
        ));
        registry.watch(job_id.clone());
        assert_eq!(registry.len(), 1);

        registry.unwatch(&job_id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn shutdown_cancels_live_pollers() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let scheduler = Arc::new(MockScheduler::new());
        let job_id = JobId::generate();
        store
            .create_state(&job_id, &UserToken::new("caller"), BuildEngine::ExternalScheduler)
            .await
            .unwrap();
        scheduler.push_poll_answer(&job_id, None);

        let registry = Arc::new(PollerRegistry::new(
            Arc::clone(&store),
            scheduler as Arc<dyn WorkloadScheduler>,
            Duration::from_secs(60),
            35,
        ));
        registry.watch(job_id);
        assert_eq!(registry.len(), 1);

        registry.shutdown();
        assert!(registry.is_empty());
    }
}
