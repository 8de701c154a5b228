//! Maps finished jobs back onto their operation's status

use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use tracing::info;

use keeper_common::crd::{
    Condition, ConditionStatus, OperationPhase, CONDITION_COMPLETED, REASON_FAILED,
    REASON_SUCCEEDED,
};

use crate::error::SchedulingError;
use crate::generic::ExecutorContext;
use crate::operation::Operation;

/// Observed outcome of a job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Running,
    Succeeded,
    Failed,
}

pub fn job_outcome(job: &Job) -> JobOutcome {
    let Some(status) = job.status.as_ref() else {
        return JobOutcome::Running;
    };
    if status.succeeded.unwrap_or(0) > 0 {
        return JobOutcome::Succeeded;
    }
    let failed = status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Failed" && c.status == "True");
    if failed {
        JobOutcome::Failed
    } else {
        JobOutcome::Running
    }
}

/// Record the job's outcome on a `Started` operation
///
/// Returns the new phase when the operation finished. A missing job leaves
/// the operation untouched.
pub async fn observe_completion(
    op: &Operation,
    ctx: &ExecutorContext,
) -> Result<Option<OperationPhase>, SchedulingError> {
    if op.phase() != OperationPhase::Started {
        return Ok(None);
    }

    let namespace = op.namespace()?;
    let Some(job) = ctx.kube.get_job(&namespace, &op.job_name()).await? else {
        return Ok(None);
    };

    let (phase, reason, message) = match job_outcome(&job) {
        JobOutcome::Running => return Ok(None),
        JobOutcome::Succeeded => (OperationPhase::Succeeded, REASON_SUCCEEDED, "the job succeeded"),
        JobOutcome::Failed => (OperationPhase::Failed, REASON_FAILED, "the job failed"),
    };

    info!(kind = %op.kind(), name = %op.name(), namespace = %namespace, phase = %phase, "operation finished");
    let mut status = op.status();
    status.phase = phase;
    status.finished_at = Some(Utc::now());
    status.set_condition(Condition::new(
        CONDITION_COMPLETED,
        ConditionStatus::True,
        reason,
        message,
    ));
    ctx.update_status(op, &status).await?;
    Ok(Some(phase))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockOperationKubeClient;
    use crate::generic::test_support::context;
    use crate::hooks::MockPreBackupHooks;
    use k8s_openapi::api::batch::v1::{JobCondition, JobStatus};
    use keeper_common::crd::{Check, CheckSpec, OperationKind, OperationStatus};
    use keeper_common::OperatorConfig;
    use mockall::predicate::{eq, function};

    fn job(status: Option<JobStatus>) -> Job {
        Job {
            status,
            ..Default::default()
        }
    }

    fn failed_condition() -> JobCondition {
        JobCondition {
            type_: "Failed".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }
    }

    fn check(phase: OperationPhase) -> Operation {
        let mut check = Check::new("nightly", CheckSpec::default());
        check.metadata.namespace = Some("apps".to_string());
        check.status = Some(OperationStatus::with_phase(phase));
        Operation::from(check)
    }

    #[test]
    fn test_job_outcome() {
        assert_eq!(job_outcome(&job(None)), JobOutcome::Running);
        assert_eq!(
            job_outcome(&job(Some(JobStatus {
                active: Some(1),
                ..Default::default()
            }))),
            JobOutcome::Running
        );
        assert_eq!(
            job_outcome(&job(Some(JobStatus {
                succeeded: Some(1),
                ..Default::default()
            }))),
            JobOutcome::Succeeded
        );
        assert_eq!(
            job_outcome(&job(Some(JobStatus {
                conditions: Some(vec![failed_condition()]),
                ..Default::default()
            }))),
            JobOutcome::Failed
        );
    }

    #[tokio::test]
    async fn story_finished_job_completes_the_operation() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_get_job()
            .with(eq("apps"), eq("check-nightly"))
            .times(1)
            .returning(|_, _| {
                Ok(Some(job(Some(JobStatus {
                    conditions: Some(vec![failed_condition()]),
                    ..Default::default()
                }))))
            });
        kube.expect_patch_status()
            .with(
                eq(OperationKind::Check),
                eq("apps"),
                eq("nightly"),
                function(|s: &OperationStatus| {
                    s.phase == OperationPhase::Failed
                        && s.finished_at.is_some()
                        && s.condition(CONDITION_COMPLETED)
                            .is_some_and(|c| c.reason == REASON_FAILED)
                }),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));
        let ctx = context(kube, MockPreBackupHooks::new(), OperatorConfig::default());

        let phase = observe_completion(&check(OperationPhase::Started), &ctx)
            .await
            .unwrap();
        assert_eq!(phase, Some(OperationPhase::Failed));
    }

    #[tokio::test]
    async fn test_only_started_operations_are_observed() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_get_job().never();
        let ctx = context(kube, MockPreBackupHooks::new(), OperatorConfig::default());

        for phase in [OperationPhase::NotStarted, OperationPhase::Succeeded] {
            assert_eq!(observe_completion(&check(phase), &ctx).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_missing_job_leaves_status_alone() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_get_job().returning(|_, _| Ok(None));
        kube.expect_patch_status().never();
        let ctx = context(kube, MockPreBackupHooks::new(), OperatorConfig::default());

        assert_eq!(
            observe_completion(&check(OperationPhase::Started), &ctx).await.unwrap(),
            None
        );
    }
}
