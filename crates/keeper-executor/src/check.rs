//! Check executor
//!
//! Checks run exclusively and have their job upserted: re-running the
//! executor before the job starts converges the job to the current spec.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info, warn};

use keeper_common::crd::{BackendOptions, OperationKind, OperationPhase, REASON_CREATION_FAILED};
use keeper_common::Error;

use crate::env::{backend_env, default_env, env_from_sources, merge_logged};
use crate::error::SchedulingError;
use crate::generic::{Executor, ExecutorContext};
use crate::operation::Operation;
use crate::template::{generic_job, JobMutation};
use crate::volumes::VolumeAssembler;

/// Arguments for a check run
///
/// TLS flags are added only when their paths are set; the client certificate
/// and key are passed together or not at all.
pub fn check_args(var_dir: &str, options: Option<&BackendOptions>) -> Vec<String> {
    let mut args = vec![
        "-varDir".to_string(),
        var_dir.to_string(),
        "-check".to_string(),
    ];
    let Some(options) = options else {
        return args;
    };
    if !options.ca_cert.is_empty() {
        args.extend(["-caCert".to_string(), options.ca_cert.clone()]);
    }
    if !options.client_cert.is_empty() && !options.client_key.is_empty() {
        args.extend([
            "-clientCert".to_string(),
            options.client_cert.clone(),
            "-clientKey".to_string(),
            options.client_key.clone(),
        ]);
    }
    args
}

pub struct CheckExecutor {
    op: Operation,
    ctx: Arc<ExecutorContext>,
}

impl CheckExecutor {
    pub fn new(op: Operation, ctx: Arc<ExecutorContext>) -> Result<Self, SchedulingError> {
        match op {
            Operation::Check(_) => Ok(Self { op, ctx }),
            other => Err(SchedulingError::TypeMismatch {
                expected: OperationKind::Check,
                found: other.kind(),
            }),
        }
    }

    /// Desired job state for this check
    pub fn mutation(&self) -> Result<JobMutation, Error> {
        let config = &self.ctx.config;
        let namespace = self.op.namespace()?;
        let runnable = self.op.runnable();
        let backend = runnable.backend.as_ref();

        let mut env = backend_env(backend);
        env.set_string("PROM_URL", &config.prom_url);
        merge_logged(
            &mut env,
            default_env(&namespace, config),
            config.env_merge_policy,
            &self.op.name(),
            &namespace,
        );

        let plan = VolumeAssembler::new(&config.var_dir)
            .backend_mounts(backend.and_then(|b| b.volume_mounts.as_deref()))
            .declared(runnable.volumes.as_deref())
            .build();

        Ok(JobMutation {
            env: env.into_env_vars(),
            env_from: env_from_sources(&runnable.env_from),
            volumes: plan.volumes,
            mounts: plan.mounts,
            args: check_args(&config.var_dir, backend.and_then(|b| b.tls_options())),
            exclusive: true,
            ..JobMutation::new(generic_job(&self.op, config)?)
        })
    }
}

#[async_trait]
impl Executor for CheckExecutor {
    fn kind(&self) -> OperationKind {
        OperationKind::Check
    }

    fn concurrency_limit(&self) -> usize {
        self.ctx.config.concurrency_limit_for(OperationKind::Check)
    }

    fn exclusive(&self) -> bool {
        true
    }

    async fn execute(&self) -> Result<(), SchedulingError> {
        let phase = self.op.phase();
        if phase.is_terminal() {
            self.ctx.cleanup_old(&self.op).await?;
            return Ok(());
        }
        if phase == OperationPhase::Started {
            return Ok(());
        }

        let name = self.op.name();
        let namespace = self.op.namespace()?;
        let job = self.op.job_name();
        let mutation = self.mutation()?;

        if let Err(e) = self.ctx.kube.upsert_job(&namespace, &job, &mutation).await {
            error!(check = %name, namespace = %namespace, error = %e, "could not create job");
            if let Err(status_err) = self
                .ctx
                .set_condition_false(
                    &self.op,
                    REASON_CREATION_FAILED,
                    format!("could not create job: {}", e),
                )
                .await
            {
                warn!(check = %name, namespace = %namespace, error = %status_err, "could not report creation failure");
            }
            return Err(SchedulingError::CreationFailed { job, source: e });
        }

        info!(check = %name, namespace = %namespace, job = %job, "check job created");
        self.ctx
            .set_started(&self.op, format!("the job '{}/{}' was created", namespace, job))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{MockOperationKubeClient, OperationRecord};
    use crate::generic::test_support::context;
    use crate::hooks::MockPreBackupHooks;
    use crate::volumes::SCRATCH_VOLUME;
    use keeper_common::crd::{
        Backend, Backup, BackupSpec, Check, CheckSpec, ConditionStatus, OperationStatus,
        RunnableSpec, CONDITION_READY, REASON_STARTED,
    };
    use keeper_common::{OperatorConfig, LABEL_EXCLUSIVE};
    use mockall::predicate::{always, eq, function};

    fn options(ca: &str, cert: &str, key: &str) -> BackendOptions {
        BackendOptions {
            ca_cert: ca.to_string(),
            client_cert: cert.to_string(),
            client_key: key.to_string(),
        }
    }

    fn check(phase: OperationPhase, backend: Option<Backend>) -> Operation {
        let mut check = Check::new(
            "nightly",
            CheckSpec {
                runnable: RunnableSpec {
                    backend,
                    ..Default::default()
                },
            },
        );
        check.metadata.namespace = Some("apps".to_string());
        check.status = Some(OperationStatus::with_phase(phase));
        Operation::from(check)
    }

    fn executor(op: Operation, kube: MockOperationKubeClient) -> CheckExecutor {
        let config = OperatorConfig {
            prom_url: "http://prometheus:9091".to_string(),
            ..Default::default()
        };
        CheckExecutor::new(op, context(kube, MockPreBackupHooks::new(), config)).unwrap()
    }

    // ==========================================================================
    // Arguments
    // ==========================================================================

    #[test]
    fn test_args_always_start_with_var_dir_and_check() {
        for opts in [None, Some(options("", "", "")), Some(options("/ca", "/c", "/k"))] {
            let args = check_args("/keeper", opts.as_ref());
            assert_eq!(&args[..3], &["-varDir", "/keeper", "-check"]);
        }
    }

    #[test]
    fn test_ca_cert_only_when_set() {
        let args = check_args("/keeper", Some(&options("/certs/ca.pem", "", "")));
        assert_eq!(args[3..], ["-caCert", "/certs/ca.pem"]);

        let args = check_args("/keeper", Some(&options("", "", "")));
        assert!(!args.contains(&"-caCert".to_string()));
    }

    #[test]
    fn test_client_cert_and_key_only_together() {
        let args = check_args("/keeper", Some(&options("", "/c.pem", "/k.pem")));
        assert_eq!(args[3..], ["-clientCert", "/c.pem", "-clientKey", "/k.pem"]);

        for (cert, key) in [("/c.pem", ""), ("", "/k.pem")] {
            let args = check_args("/keeper", Some(&options("", cert, key)));
            assert!(!args.contains(&"-clientCert".to_string()));
            assert!(!args.contains(&"-clientKey".to_string()));
        }
    }

    // ==========================================================================
    // Construction and job shape
    // ==========================================================================

    #[test]
    fn test_rejects_backup_operations() {
        let mut backup = Backup::new("daily", BackupSpec::default());
        backup.metadata.namespace = Some("apps".to_string());
        let ctx = context(
            MockOperationKubeClient::new(),
            MockPreBackupHooks::new(),
            OperatorConfig::default(),
        );
        let err = CheckExecutor::new(Operation::from(backup), ctx).err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_mutation_carries_exclusive_label_env_and_scratch() {
        let exec = executor(check(OperationPhase::NotStarted, None), MockOperationKubeClient::new());
        let job = exec.mutation().unwrap().render().unwrap();

        assert_eq!(job.metadata.labels.as_ref().unwrap()[LABEL_EXCLUSIVE], "true");
        let pod = job.spec.unwrap().template.spec.unwrap();
        let env = pod.containers[0].env.clone().unwrap();
        let names: Vec<&str> = env.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["PROM_URL", "HOSTNAME"]);
        assert_eq!(pod.volumes.unwrap()[0].name, SCRATCH_VOLUME);
    }

    // ==========================================================================
    // Execute
    // ==========================================================================

    #[tokio::test]
    async fn story_not_started_check_upserts_job_and_reports_started() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_upsert_job()
            .with(eq("apps"), eq("check-nightly"), always())
            .times(1)
            .returning(|_, _, m| m.render());
        kube.expect_patch_status()
            .with(
                eq(OperationKind::Check),
                eq("apps"),
                eq("nightly"),
                function(|s: &OperationStatus| {
                    s.phase == OperationPhase::Started
                        && s.condition(CONDITION_READY).is_some_and(|c| {
                            c.reason == REASON_STARTED
                                && c.message == "the job 'apps/check-nightly' was created"
                        })
                }),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        executor(check(OperationPhase::NotStarted, None), kube)
            .execute()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn story_upsert_failure_reports_creation_failed() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_upsert_job()
            .times(1)
            .returning(|_, _, _| Err(Error::internal_with_context("test", "quota exceeded")));
        kube.expect_patch_status()
            .with(
                eq(OperationKind::Check),
                eq("apps"),
                eq("nightly"),
                function(|s: &OperationStatus| {
                    s.phase == OperationPhase::NotStarted
                        && s.condition(CONDITION_READY).is_some_and(|c| {
                            c.status == ConditionStatus::False
                                && c.reason == REASON_CREATION_FAILED
                                && c.message.contains("quota exceeded")
                        })
                }),
            )
            .times(1)
            .returning(|_, _, _, _| Ok(()));

        let err = executor(check(OperationPhase::NotStarted, None), kube)
            .execute()
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulingError::CreationFailed { ref job, .. } if job == "check-nightly"));
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_started_check_is_left_alone() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_upsert_job().never();
        kube.expect_patch_status().never();

        executor(check(OperationPhase::Started, None), kube)
            .execute()
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_finished_check_triggers_cleanup_only() {
        let mut kube = MockOperationKubeClient::new();
        kube.expect_upsert_job().never();
        kube.expect_list_operations()
            .with(eq(OperationKind::Check), eq("apps"))
            .times(1)
            .returning(|_, _| {
                Ok(vec![OperationRecord {
                    name: "nightly".to_string(),
                    phase: OperationPhase::Failed,
                    created_at: None,
                    finished_at: None,
                }])
            });

        executor(check(OperationPhase::Failed, None), kube)
            .execute()
            .await
            .unwrap();
    }
}
