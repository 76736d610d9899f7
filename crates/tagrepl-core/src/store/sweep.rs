//! Reconciliation sweep run once when a store is opened.

use tracing::{debug, warn};

use crate::domain::{StoreError, TaskState};
use crate::ports::{RemoteValidator, TaskSource};

/// Counts of tasks kept and purged by the sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub retained_pending: usize,
    pub retained_failed: usize,
    pub purged_pending: usize,
    pub purged_failed: usize,
}

impl SweepReport {
    pub fn purged(&self) -> usize {
        self.purged_pending + self.purged_failed
    }

    pub fn retained(&self) -> usize {
        self.retained_pending + self.retained_failed
    }

    fn record(&mut self, state: TaskState, kept: bool) {
        let slot = match (state, kept) {
            (TaskState::Pending, true) => &mut self.retained_pending,
            (TaskState::Failed, true) => &mut self.retained_failed,
            (TaskState::Pending, false) => &mut self.purged_pending,
            (TaskState::Failed, false) => &mut self.purged_failed,
        };
        *slot += 1;
    }
}

/// Ask `validator` about every persisted task and delete the rejected ones.
///
/// Pending is swept before failed, each in insertion order. The first
/// validator error stops the sweep: deletions already made stay, and the
/// remaining tasks are left untouched.
pub(crate) async fn reconcile(
    source: &dyn TaskSource,
    validator: &dyn RemoteValidator,
) -> Result<SweepReport, StoreError> {
    let mut report = SweepReport::default();

    for state in [TaskState::Pending, TaskState::Failed] {
        for task in source.scan(state).await? {
            let valid = validator
                .valid(&task.tag, &task.destination)
                .await
                .inspect_err(|e| warn!(error = %e, "validator failed during reconciliation"))?;

            if !valid {
                source.delete(&task.key()).await?;
                debug!(
                    tag = %task.tag,
                    destination = %task.destination,
                    %state,
                    "purged task rejected by validator"
                );
            }
            report.record(state, valid);
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::domain::{Task, ValidatorError};
    use crate::impls::{MemoryTaskSource, StaticValidator};

    /// Records every question and fails on a chosen tag.
    #[derive(Default)]
    struct RecordingValidator {
        asked: Mutex<Vec<String>>,
        fail_on: Option<&'static str>,
    }

    #[async_trait]
    impl RemoteValidator for RecordingValidator {
        async fn valid(&self, tag: &str, destination: &str) -> Result<bool, ValidatorError> {
            self.asked.lock().unwrap().push(tag.to_string());
            if self.fail_on == Some(tag) {
                return Err(ValidatorError::new(
                    crate::domain::TaskKey::new(tag, destination),
                    "connection refused",
                ));
            }
            Ok(true)
        }
    }

    async fn seeded() -> MemoryTaskSource {
        let source = MemoryTaskSource::new();
        for (tag, dest, state) in [
            ("a", "dc2", TaskState::Pending),
            ("b", "dc-old", TaskState::Pending),
            ("c", "dc2", TaskState::Failed),
            ("d", "dc-old", TaskState::Failed),
        ] {
            source
                .insert(state, &Task::new(tag, dest, Duration::ZERO))
                .await
                .unwrap();
        }
        source
    }

    #[tokio::test]
    async fn purges_rejected_and_keeps_valid() {
        let source = seeded().await;
        let validator = StaticValidator::accept_all().rejecting_destinations(["dc-old"]);

        let report = reconcile(&source, &validator).await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                retained_pending: 1,
                retained_failed: 1,
                purged_pending: 1,
                purged_failed: 1,
            }
        );
        assert_eq!(report.purged(), 2);
        assert_eq!(report.retained(), 2);

        let pending: Vec<_> = source.scan(TaskState::Pending).await.unwrap();
        let failed: Vec<_> = source.scan(TaskState::Failed).await.unwrap();
        assert_eq!(pending.iter().map(|t| t.tag.as_str()).collect::<Vec<_>>(), ["a"]);
        assert_eq!(failed.iter().map(|t| t.tag.as_str()).collect::<Vec<_>>(), ["c"]);
    }

    #[tokio::test]
    async fn asks_pending_first_in_insertion_order() {
        let source = seeded().await;
        let validator = RecordingValidator::default();

        reconcile(&source, &validator).await.unwrap();

        assert_eq!(*validator.asked.lock().unwrap(), ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn validator_error_stops_the_sweep() {
        let source = seeded().await;
        let validator = RecordingValidator {
            fail_on: Some("c"),
            ..Default::default()
        };

        let err = reconcile(&source, &validator).await.unwrap_err();

        assert!(matches!(err, StoreError::Validator(_)));
        assert_eq!(*validator.asked.lock().unwrap(), ["a", "b", "c"]);
        assert_eq!(source.scan(TaskState::Failed).await.unwrap().len(), 2);
    }
}
