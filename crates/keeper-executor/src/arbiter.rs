//! Admission of new jobs against running ones
//!
//! Executors only declare their kind's concurrency limit and exclusivity.
//! This module turns those declarations and the jobs currently running in
//! the cluster into an admit/deny decision. Limits count jobs of the
//! candidate's own kind only; exclusivity spans every kind.

use k8s_openapi::api::batch::v1::Job;
use kube::ResourceExt;

use keeper_common::crd::OperationKind;
use keeper_common::{LABEL_EXCLUSIVE, LABEL_TYPE};

use crate::completion::{job_outcome, JobOutcome};
use crate::generic::Executor;

/// What an executor declares about its kind
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub kind: OperationKind,
    pub concurrency_limit: usize,
    pub exclusive: bool,
}

impl Declaration {
    pub fn of(executor: &dyn Executor) -> Self {
        Self {
            kind: executor.kind(),
            concurrency_limit: executor.concurrency_limit(),
            exclusive: executor.exclusive(),
        }
    }
}

/// A job that has not finished yet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunningJob {
    pub namespace: String,
    pub name: String,
    pub kind: OperationKind,
    pub exclusive: bool,
}

impl RunningJob {
    /// `None` for jobs without a recognized kind label
    pub fn from_job(job: &Job) -> Option<Self> {
        let labels = job.labels();
        let kind = labels.get(LABEL_TYPE).and_then(|v| OperationKind::from_label(v))?;
        Some(Self {
            namespace: job.namespace().unwrap_or_default(),
            name: job.name_any(),
            kind,
            exclusive: labels.get(LABEL_EXCLUSIVE).is_some_and(|v| v == "true"),
        })
    }
}

/// Unfinished Keeper jobs among `jobs`
pub fn running_jobs(jobs: &[Job]) -> Vec<RunningJob> {
    jobs.iter()
        .filter(|j| job_outcome(j) == JobOutcome::Running)
        .filter_map(RunningJob::from_job)
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Deny { reason: String },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admit)
    }
}

/// Decide whether a job for `declaration` may start next to `running`
///
/// `running` must not include the candidate's own job.
pub fn admit(declaration: &Declaration, running: &[RunningJob]) -> Admission {
    if let Some(job) = running.iter().find(|j| j.exclusive) {
        return Admission::Deny {
            reason: format!("exclusive job '{}/{}' is running", job.namespace, job.name),
        };
    }
    if declaration.exclusive && !running.is_empty() {
        return Admission::Deny {
            reason: format!(
                "{} jobs run exclusively and {} other job(s) are running",
                declaration.kind,
                running.len()
            ),
        };
    }

    let same_kind = running.iter().filter(|j| j.kind == declaration.kind).count();
    if declaration.concurrency_limit > 0 && same_kind >= declaration.concurrency_limit {
        return Admission::Deny {
            reason: format!(
                "{} of {} concurrent {} jobs are running",
                same_kind, declaration.concurrency_limit, declaration.kind
            ),
        };
    }
    Admission::Admit
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;
    use std::collections::BTreeMap;

    fn running(kind: OperationKind, exclusive: bool) -> RunningJob {
        RunningJob {
            namespace: "apps".to_string(),
            name: kind.job_name("x"),
            kind,
            exclusive,
        }
    }

    fn decl(kind: OperationKind, limit: usize, exclusive: bool) -> Declaration {
        Declaration {
            kind,
            concurrency_limit: limit,
            exclusive,
        }
    }

    fn job(labels: &[(&str, &str)], succeeded: bool) -> Job {
        let mut job = Job::default();
        job.metadata.name = Some("j".to_string());
        job.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        );
        if succeeded {
            job.status = Some(JobStatus {
                succeeded: Some(1),
                ..Default::default()
            });
        }
        job
    }

    #[test]
    fn test_idle_cluster_admits_everything() {
        assert!(admit(&decl(OperationKind::Check, 1, true), &[]).is_admitted());
        assert!(admit(&decl(OperationKind::Backup, 0, false), &[]).is_admitted());
    }

    #[test]
    fn story_exclusive_jobs_block_and_are_blocked() {
        let check_running = [running(OperationKind::Check, true)];
        assert!(!admit(&decl(OperationKind::Backup, 0, false), &check_running).is_admitted());

        let backup_running = [running(OperationKind::Backup, false)];
        assert!(!admit(&decl(OperationKind::Check, 0, true), &backup_running).is_admitted());
    }

    #[test]
    fn test_limit_counts_only_own_kind() {
        let jobs = [
            running(OperationKind::Backup, false),
            running(OperationKind::Backup, false),
        ];
        assert!(!admit(&decl(OperationKind::Backup, 2, false), &jobs).is_admitted());
        assert!(admit(&decl(OperationKind::Backup, 3, false), &jobs).is_admitted());
        assert!(admit(&decl(OperationKind::Backup, 0, false), &jobs).is_admitted());
    }

    #[test]
    fn test_running_jobs_skips_finished_and_foreign_jobs() {
        let jobs = vec![
            job(&[(LABEL_TYPE, "check"), (LABEL_EXCLUSIVE, "true")], false),
            job(&[(LABEL_TYPE, "backup")], true),
            job(&[(LABEL_TYPE, "prune")], false),
            job(&[], false),
        ];
        let running = running_jobs(&jobs);
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].kind, OperationKind::Check);
        assert!(running[0].exclusive);
    }
}
