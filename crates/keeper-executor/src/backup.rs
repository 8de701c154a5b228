//! Backup executor
//!
//! Phase machine driven one step per `execute` call:
//! - terminal: resume hook targets, clean up old backups
//! - `Started`: wait for the job to finish
//! - otherwise: pause hook targets, then create the job once they are ready
//!
//! Unlike checks, an existing backup job is never modified.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use keeper_common::crd::{
    Backup, Condition, ConditionStatus, OperationKind, OperationPhase, CONDITION_PRE_BACKUP_READY,
    REASON_CREATION_FAILED, REASON_FAILED, REASON_READY, REASON_RETRIEVAL_FAILED, REASON_WAITING,
};
use keeper_common::Error;

use crate::env::{backend_env, default_env, env_from_sources, merge_logged};
use crate::error::SchedulingError;
use crate::generic::{Executor, ExecutorContext};
use crate::hooks::HookReadiness;
use crate::operation::Operation;
use crate::template::{generic_job, JobMutation};
use crate::volumes::VolumeAssembler;

const READ_WRITE_MANY: &str = "ReadWriteMany";

/// Boolean parsing accepting the usual spellings (`1`, `t`, `TRUE`, `false`, ...)
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Whether a claim should be backed up
///
/// RWX claims are included unless annotated `false`; other claims only when
/// annotated. An unparsable annotation counts as present.
pub fn is_eligible(claim: &PersistentVolumeClaim, annotation: &str) -> bool {
    let rwx = claim
        .spec
        .as_ref()
        .and_then(|s| s.access_modes.as_ref())
        .is_some_and(|modes| modes.iter().any(|m| m == READ_WRITE_MANY));
    let value = claim.annotations().get(annotation);

    let excluded = match value.map(|v| (v, parse_bool(v))) {
        Some((_, Some(flag))) => !flag,
        Some((raw, None)) => {
            warn!(
                claim = %claim.name_any(),
                annotation = %annotation,
                value = %raw,
                "unparsable backup annotation, treating the claim as opted in"
            );
            false
        }
        None => false,
    };

    (rwx || value.is_some()) && !excluded
}

/// Names of the eligible claims, sorted
pub fn eligible_claims(claims: &[PersistentVolumeClaim], annotation: &str) -> Vec<String> {
    let mut names: Vec<String> = claims
        .iter()
        .filter(|c| is_eligible(c, annotation))
        .map(|c| c.name_any())
        .collect();
    names.sort();
    names
}

/// Arguments for a backup run, one `--tag` pair per tag
pub fn backup_args(var_dir: &str, tags: &[String]) -> Vec<String> {
    let mut args = vec!["-varDir".to_string(), var_dir.to_string()];
    for tag in tags {
        args.extend(["--tag".to_string(), tag.clone()]);
    }
    args
}

pub struct BackupExecutor {
    op: Operation,
    backup: Arc<Backup>,
    ctx: Arc<ExecutorContext>,
}

impl BackupExecutor {
    pub fn new(op: Operation, ctx: Arc<ExecutorContext>) -> Result<Self, SchedulingError> {
        match &op {
            Operation::Backup(backup) => Ok(Self {
                backup: backup.clone(),
                op,
                ctx,
            }),
            other => Err(SchedulingError::TypeMismatch {
                expected: OperationKind::Backup,
                found: other.kind(),
            }),
        }
    }

    /// Desired job state for `template` with the given eligible claims
    pub fn mutation(&self, template: Job, claims: &[String]) -> Result<JobMutation, Error> {
        let config = &self.ctx.config;
        let namespace = self.op.namespace()?;
        let runnable = self.op.runnable();
        let backend = runnable.backend.as_ref();

        let mut env = backend_env(backend);
        merge_logged(
            &mut env,
            default_env(&namespace, config),
            config.env_merge_policy,
            &self.op.name(),
            &namespace,
        );

        let plan = VolumeAssembler::new(&config.var_dir)
            .backend_mounts(backend.and_then(|b| b.volume_mounts.as_deref()))
            .claims(claims, &config.data_mount_root)
            .declared(runnable.volumes.as_deref())
            .build();

        Ok(JobMutation {
            env: env.into_env_vars(),
            env_from: env_from_sources(&runnable.env_from),
            volumes: plan.volumes,
            mounts: plan.mounts,
            args: backup_args(&config.var_dir, &self.backup.spec.tags),
            service_account: Some(config.service_account.clone()),
            exclusive: false,
            ..JobMutation::new(template)
        })
    }

    async fn report(&self, reason: &str, message: String) {
        if let Err(e) = self.ctx.set_condition_false(&self.op, reason, message).await {
            warn!(backup = %self.op.name(), error = %e, "could not report backup condition");
        }
    }

    /// Ask the hooks to pause their targets; `true` when the job may be created
    async fn hooks_ready(&self, phase: OperationPhase) -> Result<bool, SchedulingError> {
        let name = self.op.name();
        let mut status = self.op.status();

        match self.ctx.hooks.start(&self.backup).await? {
            HookReadiness::NotReady { pending } => {
                debug!(backup = %name, pending = ?pending, "waiting for pre-backup hooks");
                status.phase = OperationPhase::WaitingForPreBackup;
                status.set_condition(Condition::new(
                    CONDITION_PRE_BACKUP_READY,
                    ConditionStatus::False,
                    REASON_WAITING,
                    format!("waiting for deployments to pause: {}", pending.join(", ")),
                ));
                self.ctx.update_status(&self.op, &status).await?;
                Ok(false)
            }
            HookReadiness::Failed { reason } => {
                error!(backup = %name, reason = %reason, "pre-backup hook failed");
                status.phase = OperationPhase::Failed;
                status.finished_at = Some(Utc::now());
                status.set_condition(Condition::new(
                    CONDITION_PRE_BACKUP_READY,
                    ConditionStatus::False,
                    REASON_FAILED,
                    reason.clone(),
                ));
                self.ctx.update_status(&self.op, &status).await?;
                Err(SchedulingError::PreBackupFailed { message: reason })
            }
            HookReadiness::Ready if phase == OperationPhase::WaitingForPreBackup => {
                info!(backup = %name, "pre-backup hooks ready");
                status.phase = OperationPhase::NotStarted;
                status.set_condition(Condition::new(
                    CONDITION_PRE_BACKUP_READY,
                    ConditionStatus::True,
                    REASON_READY,
                    "all pre-backup hooks are ready",
                ));
                self.ctx.update_status(&self.op, &status).await?;
                Ok(false)
            }
            HookReadiness::Ready => Ok(true),
        }
    }
}

#[async_trait]
impl Executor for BackupExecutor {
    fn kind(&self) -> OperationKind {
        OperationKind::Backup
    }

    fn concurrency_limit(&self) -> usize {
        self.ctx.config.concurrency_limit_for(OperationKind::Backup)
    }

    async fn execute(&self) -> Result<(), SchedulingError> {
        let name = self.op.name();
        let phase = self.op.phase();

        if phase.is_terminal() {
            if let Err(e) = self.ctx.hooks.stop(&self.backup).await {
                warn!(backup = %name, error = %e, "could not resume pre-backup hook targets");
            }
            self.ctx.cleanup_old(&self.op).await?;
            return Ok(());
        }
        if phase == OperationPhase::Started {
            return Ok(());
        }

        let namespace = self.op.namespace()?;
        self.ctx.kube.ensure_service_account(&namespace).await?;
        let template = generic_job(&self.op, &self.ctx.config)?;

        if !self.hooks_ready(phase).await? {
            return Ok(());
        }

        let claims = match self.ctx.kube.list_volume_claims(&namespace).await {
            Ok(claims) => claims,
            Err(e) => {
                error!(backup = %name, namespace = %namespace, error = %e, "could not list volume claims");
                self.report(REASON_RETRIEVAL_FAILED, format!("could not list volume claims: {}", e))
                    .await;
                return Err(SchedulingError::RetrievalFailed {
                    namespace,
                    source: e,
                });
            }
        };
        let claims = eligible_claims(&claims, &self.ctx.config.backup_annotation);
        debug!(backup = %name, claims = ?claims, "eligible volume claims");

        let job = self.mutation(template, &claims)?.render()?;
        let job_name = self.op.job_name();

        match self.ctx.kube.create_job_if_absent(&job).await {
            Ok(true) => info!(backup = %name, namespace = %namespace, job = %job_name, "backup job created"),
            Ok(false) => debug!(backup = %name, job = %job_name, "backup job already exists"),
            Err(e) => {
                error!(backup = %name, namespace = %namespace, error = %e, "could not create job");
                self.report(REASON_CREATION_FAILED, format!("could not create job: {}", e))
                    .await;
                return Err(SchedulingError::CreationFailed {
                    job: job_name,
                    source: e,
                });
            }
        }

        self.ctx
            .set_started(&self.op, format!("the job '{}/{}' was created", namespace, job_name))
            .await?;
        Ok(())
    }
}
