//! Check and Backup reconciliation
//!
//! Each pass over an operation:
//! 1. records the outcome of a finished job on a `Started` operation
//! 2. asks the arbiter whether a not-yet-started operation may run now
//! 3. runs the matching executor
//!
//! Non-terminal operations are requeued so job completion is picked up even
//! when the owned-job watch misses an event.

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use keeper_common::crd::{Backup, Check, OperationPhase};
use keeper_executor::arbiter::{admit, running_jobs, Admission, Declaration};
use keeper_executor::completion::observe_completion;
use keeper_executor::{executor_for, ExecutorContext, Operation, SchedulingError};

/// Requeue interval while an operation is in flight
pub const RUNNING_REQUEUE: Duration = Duration::from_secs(15);

/// Requeue interval after the arbiter denied admission
pub const ADMISSION_REQUEUE: Duration = Duration::from_secs(10);

/// Requeue interval after a retryable error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

/// Shared context for the Check and Backup controllers
pub struct Context {
    pub executors: Arc<ExecutorContext>,
}

impl Context {
    pub fn new(executors: Arc<ExecutorContext>) -> Self {
        Self { executors }
    }
}

pub async fn reconcile_check(
    check: Arc<Check>,
    ctx: Arc<Context>,
) -> Result<Action, SchedulingError> {
    reconcile_operation(Operation::Check(check), &ctx).await
}

pub async fn reconcile_backup(
    backup: Arc<Backup>,
    ctx: Arc<Context>,
) -> Result<Action, SchedulingError> {
    reconcile_operation(Operation::Backup(backup), &ctx).await
}

/// Drive one operation a single step
#[instrument(skip_all, fields(kind = %op.kind(), name = %op.name()))]
pub async fn reconcile_operation(op: Operation, ctx: &Context) -> Result<Action, SchedulingError> {
    let executors = &ctx.executors;

    if let Some(phase) = observe_completion(&op, executors).await? {
        debug!(phase = %phase, "job finished, waiting for the status update to come back");
        return Ok(Action::await_change());
    }

    let phase = op.phase();
    let namespace = op.namespace()?;
    let job_name = op.job_name();
    let executor = executor_for(op, executors.clone())?;

    if matches!(
        phase,
        OperationPhase::NotStarted | OperationPhase::WaitingForPreBackup
    ) {
        let jobs = executors.kube.list_running_jobs().await?;
        let others: Vec<_> = running_jobs(&jobs)
            .into_iter()
            .filter(|j| !(j.namespace == namespace && j.name == job_name))
            .collect();

        if let Admission::Deny { reason } = admit(&Declaration::of(executor.as_ref()), &others) {
            info!(reason = %reason, "not admitted yet");
            return Ok(Action::requeue(ADMISSION_REQUEUE));
        }
    }

    executor.execute().await?;

    if phase.is_terminal() {
        Ok(Action::await_change())
    } else {
        Ok(Action::requeue(RUNNING_REQUEUE))
    }
}

/// Error policy shared by both controllers
pub fn error_policy<K: ResourceExt>(
    obj: Arc<K>,
    error: &SchedulingError,
    _ctx: Arc<Context>,
) -> Action {
    if error.is_fatal() {
        error!(?error, name = %obj.name_any(), "reconciliation failed permanently");
        return Action::await_change();
    }
    warn!(
        error = %error,
        name = %obj.name_any(),
        retryable = error.is_retryable(),
        "reconciliation failed, requeueing"
    );
    Action::requeue(ERROR_REQUEUE)
}
