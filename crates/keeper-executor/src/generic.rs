//! The executor contract and the context executors share
//!
//! An executor is built for one operation and consumed by one `execute`
//! call. It declares its kind's concurrency limit and exclusivity for the
//! arbiter; the status helpers on [`ExecutorContext`] are how every
//! executor reports progress back on the operation.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use keeper_common::crd::{
    Condition, ConditionStatus, OperationKind, OperationPhase, OperationStatus, CONDITION_READY,
    REASON_STARTED,
};
use keeper_common::{Error, OperatorConfig};

use crate::backup::BackupExecutor;
use crate::check::CheckExecutor;
use crate::client::OperationKubeClient;
use crate::error::SchedulingError;
use crate::hooks::PreBackupHooks;
use crate::operation::Operation;
use crate::retention;

/// Capabilities every concrete executor exposes
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> OperationKind;

    /// Maximum concurrently running jobs of this kind; 0 means unlimited
    fn concurrency_limit(&self) -> usize;

    /// Whether this kind must not run alongside any other job
    fn exclusive(&self) -> bool {
        false
    }

    /// Bring the operation one step closer to its desired state
    async fn execute(&self) -> Result<(), SchedulingError>;
}

/// Collaborators and configuration passed to every executor
pub struct ExecutorContext {
    pub kube: Arc<dyn OperationKubeClient>,
    pub hooks: Arc<dyn PreBackupHooks>,
    pub config: Arc<OperatorConfig>,
}

impl ExecutorContext {
    pub fn new(
        kube: Arc<dyn OperationKubeClient>,
        hooks: Arc<dyn PreBackupHooks>,
        config: Arc<OperatorConfig>,
    ) -> Self {
        Self {
            kube,
            hooks,
            config,
        }
    }

    /// Replace the operation's reported status
    pub async fn update_status(
        &self,
        op: &Operation,
        status: &OperationStatus,
    ) -> Result<(), Error> {
        let namespace = op.namespace()?;
        debug!(kind = %op.kind(), name = %op.name(), namespace = %namespace, phase = %status.phase, "updating status");
        self.kube
            .patch_status(op.kind(), &namespace, &op.name(), status)
            .await
    }

    /// Report `Ready=False` with a reason, keeping the phase
    pub async fn set_condition_false(
        &self,
        op: &Operation,
        reason: &str,
        message: impl Into<String>,
    ) -> Result<(), Error> {
        let mut status = op.status();
        status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::False,
            reason,
            message,
        ));
        self.update_status(op, &status).await
    }

    /// Move the operation to `Started`
    pub async fn set_started(
        &self,
        op: &Operation,
        message: impl Into<String>,
    ) -> Result<(), Error> {
        let mut status = op.status();
        status.phase = OperationPhase::Started;
        status.started_at = Some(Utc::now());
        status.set_condition(Condition::new(
            CONDITION_READY,
            ConditionStatus::True,
            REASON_STARTED,
            message,
        ));
        self.update_status(op, &status).await
    }

    /// Keep-count for the operation: its own setting, then configuration
    pub fn keep_jobs(&self, op: &Operation) -> usize {
        op.runnable()
            .keep_jobs
            .unwrap_or_else(|| self.config.keep_jobs_for(op.kind())) as usize
    }

    /// Run retention cleanup for the operation's kind and namespace
    pub async fn cleanup_old(&self, op: &Operation) -> Result<usize, Error> {
        let namespace = op.namespace()?;
        Ok(retention::cleanup_old(
            self.kube.as_ref(),
            op.kind(),
            &namespace,
            &op.name(),
            self.keep_jobs(op),
        )
        .await)
    }
}

/// Build the executor matching the operation's kind
pub fn executor_for(
    op: Operation,
    ctx: Arc<ExecutorContext>,
) -> Result<Box<dyn Executor>, SchedulingError> {
    Ok(match op.kind() {
        OperationKind::Check => Box::new(CheckExecutor::new(op, ctx)?),
        OperationKind::Backup => Box::new(BackupExecutor::new(op, ctx)?),
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::client::MockOperationKubeClient;
    use crate::hooks::MockPreBackupHooks;
    use keeper_common::crd::{Backup, BackupSpec, Check, CheckSpec, RunnableSpec};
    use mockall::predicate::eq;

    fn check(keep_jobs: Option<u32>) -> Operation {
        let mut check = Check::new(
            "nightly",
            CheckSpec {
                runnable: RunnableSpec {
                    keep_jobs,
                    ..Default::default()
                },
            },
        );
        check.metadata.namespace = Some("apps".to_string());
        Operation::from(check)
    }

    fn backup() -> Operation {
        let mut backup = Backup::new("daily", BackupSpec::default());
        backup.metadata.namespace = Some("apps".to_string());
        Operation::from(backup)
    }

    #[test]
    fn test_executor_for_dispatches_on_kind() {
        let config = OperatorConfig {
            global_concurrent_check_jobs_limit: 1,
            global_concurrent_backup_jobs_limit: 3,
            ..Default::default()
        };
        let ctx = context(
            MockOperationKubeClient::new(),
            MockPreBackupHooks::new(),
            config,
        );

        let exec = executor_for(check(None), ctx.clone()).unwrap();
        assert_eq!(exec.kind(), OperationKind::Check);
        assert_eq!(exec.concurrency_limit(), 1);
        assert!(exec.exclusive());

        let exec = executor_for(backup(), ctx).unwrap();
        assert_eq!(exec.kind(), OperationKind::Backup);
        assert_eq!(exec.concurrency_limit(), 3);
        assert!(!exec.exclusive());
    }

    #[test]
    fn test_keep_jobs_prefers_operation_setting() {
        let config = OperatorConfig {
            global_keep_jobs: 6,
            global_check_keep_jobs: Some(4),
            ..Default::default()
        };
        let ctx = context(MockOperationKubeClient::new(), MockPreBackupHooks::new(), config);

        assert_eq!(ctx.keep_jobs(&check(Some(2))), 2);
        assert_eq!(ctx.keep_jobs(&check(None)), 4);
        assert_eq!(ctx.keep_jobs(&backup()), 6);
    }

    #[tokio::test]
    async fn test_set_started_patches_phase_and_condition() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_patch_status()
            .with(
                eq(OperationKind::Check),
                eq("apps"),
                eq("nightly"),
                mockall::predicate::function(|s: &OperationStatus| {
                    s.phase == OperationPhase::Started
                        && s.started_at.is_some()
                        && s.condition(CONDITION_READY)
                            .is_some_and(|c| c.reason == REASON_STARTED && c.message == "created")
                }),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let ctx = context(kube, MockPreBackupHooks::new(), OperatorConfig::default());

        ctx.set_started(&check(None), "created").await.unwrap();
    }
}
