//! Retention cleanup of finished operations
//!
//! Only terminal siblings are candidates. They are ranked newest first by
//! finish time (creation time when no finish time was recorded) and
//! everything past the keep-count goes, except the operation being
//! reconciled.

use std::cmp::Reverse;

use tracing::{info, warn};

use keeper_common::crd::OperationKind;

use crate::client::{OperationKubeClient, OperationRecord};

/// Records to delete so that at most `keep` terminal records remain
pub fn select_for_deletion(
    records: Vec<OperationRecord>,
    current: &str,
    keep: usize,
) -> Vec<OperationRecord> {
    let mut terminal: Vec<OperationRecord> = records
        .into_iter()
        .filter(|r| r.phase.is_terminal())
        .collect();
    terminal.sort_by_key(|r| Reverse(r.finished_at.or(r.created_at)));
    terminal
        .into_iter()
        .skip(keep)
        .filter(|r| r.name != current)
        .collect()
}

/// Delete old terminal operations of `kind` in `namespace` and their jobs
///
/// Failures are logged and skipped; returns how many operations were removed.
pub async fn cleanup_old(
    kube: &dyn OperationKubeClient,
    kind: OperationKind,
    namespace: &str,
    current: &str,
    keep: usize,
) -> usize {
    let records = match kube.list_operations(kind, namespace).await {
        Ok(records) => records,
        Err(e) => {
            warn!(kind = %kind, namespace = %namespace, error = %e, "could not list operations for cleanup");
            return 0;
        }
    };

    let mut deleted = 0;
    for record in select_for_deletion(records, current, keep) {
        if let Err(e) = kube.delete_operation(kind, namespace, &record.name).await {
            warn!(kind = %kind, name = %record.name, namespace = %namespace, error = %e, "could not delete old operation");
            continue;
        }
        deleted += 1;

        let job = kind.job_name(&record.name);
        if let Err(e) = kube.delete_job(namespace, &job).await {
            warn!(job = %job, namespace = %namespace, error = %e, "could not delete job of old operation");
        }
    }

    if deleted > 0 {
        info!(kind = %kind, namespace = %namespace, deleted, keep, "cleaned up old operations");
    }
    deleted
}
