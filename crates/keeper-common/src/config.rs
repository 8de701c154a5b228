//! Operator configuration
//!
//! Built once at startup from CLI flags and `KEEPER_*` environment variables,
//! then shared read-only (`Arc<OperatorConfig>`) with every executor.

use clap::{Args, ValueEnum};

use crate::crd::OperationKind;

/// Default mount path for the scratch volume inside job pods
pub const DEFAULT_VAR_DIR: &str = "/keeper";
/// Default root under which backup PVCs are mounted
pub const DEFAULT_DATA_MOUNT_ROOT: &str = "/data";
/// Default PVC annotation controlling backup eligibility
pub const DEFAULT_BACKUP_ANNOTATION: &str = "keeper.dev/backup";
/// Default service account for backup pods
pub const DEFAULT_SERVICE_ACCOUNT: &str = "keeper-executor";
/// Default cluster role bound to the executor service account
pub const DEFAULT_EXECUTOR_CLUSTER_ROLE: &str = "keeper-executor";
/// Default job container image
pub const DEFAULT_EXECUTOR_IMAGE: &str = "ghcr.io/keeper-dev/keeper:latest";
/// Default number of finished operations kept per namespace and kind
pub const DEFAULT_KEEP_JOBS: u32 = 6;

/// How default environment entries interact with explicitly set ones
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum EnvMergePolicy {
    /// Explicit entries win; conflicting defaults are logged and dropped
    #[default]
    KeepExplicit,
    /// Defaults replace conflicting explicit entries (logged)
    PreferDefaults,
}

/// Process-wide operator configuration
#[derive(Args, Clone, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Mount path of the scratch volume, passed to the job as `-varDir`
    #[arg(long, env = "KEEPER_VAR_DIR", default_value = DEFAULT_VAR_DIR)]
    pub var_dir: String,

    /// Directory under which backed-up claims are mounted
    #[arg(long, env = "KEEPER_DATA_MOUNT_ROOT", default_value = DEFAULT_DATA_MOUNT_ROOT)]
    pub data_mount_root: String,

    /// PVC annotation that opts a claim in (`true`) or out (`false`) of backups
    #[arg(long, env = "KEEPER_BACKUP_ANNOTATION", default_value = DEFAULT_BACKUP_ANNOTATION)]
    pub backup_annotation: String,

    /// Service account used by backup pods
    #[arg(long, env = "KEEPER_SERVICE_ACCOUNT", default_value = DEFAULT_SERVICE_ACCOUNT)]
    pub service_account: String,

    /// ClusterRole bound to the service account in each namespace
    #[arg(long, env = "KEEPER_EXECUTOR_CLUSTER_ROLE", default_value = DEFAULT_EXECUTOR_CLUSTER_ROLE)]
    pub executor_cluster_role: String,

    /// Image running the backup/check tool
    #[arg(long, env = "KEEPER_EXECUTOR_IMAGE", default_value = DEFAULT_EXECUTOR_IMAGE)]
    pub executor_image: String,

    /// Prometheus push gateway URL handed to check jobs
    #[arg(long, env = "KEEPER_PROM_URL", default_value = "")]
    pub prom_url: String,

    /// Max concurrent check jobs (0 = unlimited)
    #[arg(long, env = "KEEPER_GLOBAL_CONCURRENT_CHECK_JOBS_LIMIT", default_value_t = 0)]
    pub global_concurrent_check_jobs_limit: usize,

    /// Max concurrent backup jobs (0 = unlimited)
    #[arg(long, env = "KEEPER_GLOBAL_CONCURRENT_BACKUP_JOBS_LIMIT", default_value_t = 0)]
    pub global_concurrent_backup_jobs_limit: usize,

    /// Finished operations kept per namespace and kind
    #[arg(long, env = "KEEPER_GLOBAL_KEEP_JOBS", default_value_t = DEFAULT_KEEP_JOBS)]
    pub global_keep_jobs: u32,

    /// Overrides `global_keep_jobs` for checks
    #[arg(long, env = "KEEPER_GLOBAL_CHECK_KEEP_JOBS")]
    pub global_check_keep_jobs: Option<u32>,

    /// Overrides `global_keep_jobs` for backups
    #[arg(long, env = "KEEPER_GLOBAL_BACKUP_KEEP_JOBS")]
    pub global_backup_keep_jobs: Option<u32>,

    /// Default repository password
    #[arg(long, env = "KEEPER_GLOBAL_REPO_PASSWORD", default_value = "", hide_env_values = true)]
    pub global_repo_password: String,

    /// Default S3 endpoint
    #[arg(long, env = "KEEPER_GLOBAL_S3_ENDPOINT", default_value = "")]
    pub global_s3_endpoint: String,

    /// Default S3 bucket
    #[arg(long, env = "KEEPER_GLOBAL_S3_BUCKET", default_value = "")]
    pub global_s3_bucket: String,

    /// Default S3 access key id
    #[arg(long, env = "KEEPER_GLOBAL_ACCESS_KEY_ID", default_value = "", hide_env_values = true)]
    pub global_access_key_id: String,

    /// Default S3 secret access key
    #[arg(long, env = "KEEPER_GLOBAL_SECRET_ACCESS_KEY", default_value = "", hide_env_values = true)]
    pub global_secret_access_key: String,

    /// Default stats webhook URL
    #[arg(long, env = "KEEPER_GLOBAL_STATS_URL", default_value = "")]
    pub global_stats_url: String,

    /// Precedence between explicit and default environment entries
    #[arg(long, env = "KEEPER_ENV_MERGE_POLICY", value_enum, default_value_t = EnvMergePolicy::KeepExplicit)]
    pub env_merge_policy: EnvMergePolicy,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            var_dir: DEFAULT_VAR_DIR.to_string(),
            data_mount_root: DEFAULT_DATA_MOUNT_ROOT.to_string(),
            backup_annotation: DEFAULT_BACKUP_ANNOTATION.to_string(),
            service_account: DEFAULT_SERVICE_ACCOUNT.to_string(),
            executor_cluster_role: DEFAULT_EXECUTOR_CLUSTER_ROLE.to_string(),
            executor_image: DEFAULT_EXECUTOR_IMAGE.to_string(),
            prom_url: String::new(),
            global_concurrent_check_jobs_limit: 0,
            global_concurrent_backup_jobs_limit: 0,
            global_keep_jobs: DEFAULT_KEEP_JOBS,
            global_check_keep_jobs: None,
            global_backup_keep_jobs: None,
            global_repo_password: String::new(),
            global_s3_endpoint: String::new(),
            global_s3_bucket: String::new(),
            global_access_key_id: String::new(),
            global_secret_access_key: String::new(),
            global_stats_url: String::new(),
            env_merge_policy: EnvMergePolicy::KeepExplicit,
        }
    }
}

impl OperatorConfig {
    /// Concurrency limit declared for the given operation kind (0 = unlimited)
    pub fn concurrency_limit_for(&self, kind: OperationKind) -> usize {
        match kind {
            OperationKind::Check => self.global_concurrent_check_jobs_limit,
            OperationKind::Backup => self.global_concurrent_backup_jobs_limit,
        }
    }

    /// Keep-count for finished operations of the given kind
    pub fn keep_jobs_for(&self, kind: OperationKind) -> u32 {
        let per_kind = match kind {
            OperationKind::Check => self.global_check_keep_jobs,
            OperationKind::Backup => self.global_backup_keep_jobs,
        };
        per_kind.unwrap_or(self.global_keep_jobs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: OperatorConfig,
    }

    #[test]
    fn test_cli_defaults_match_default_impl() {
        let cli = TestCli::parse_from(["keeper"]);
        assert_eq!(cli.config, OperatorConfig::default());
    }

    #[test]
    fn test_flags_override_defaults() {
        let cli = TestCli::parse_from([
            "keeper",
            "--var-dir",
            "/scratch",
            "--global-concurrent-check-jobs-limit",
            "2",
            "--env-merge-policy",
            "prefer-defaults",
        ]);
        assert_eq!(cli.config.var_dir, "/scratch");
        assert_eq!(cli.config.concurrency_limit_for(OperationKind::Check), 2);
        assert_eq!(cli.config.concurrency_limit_for(OperationKind::Backup), 0);
        assert_eq!(cli.config.env_merge_policy, EnvMergePolicy::PreferDefaults);
    }

    #[test]
    fn test_keep_jobs_falls_back_to_global() {
        let config = OperatorConfig {
            global_keep_jobs: 4,
            global_backup_keep_jobs: Some(10),
            ..Default::default()
        };
        assert_eq!(config.keep_jobs_for(OperationKind::Backup), 10);
        assert_eq!(config.keep_jobs_for(OperationKind::Check), 4);
    }
}
