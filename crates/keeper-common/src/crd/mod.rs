//! Custom Resource Definitions for Keeper

mod backend;
mod backup;
mod check;
mod prebackup_hook;
mod runnable;
mod types;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use backend::{
    AzureBackend, B2Backend, Backend, BackendOptions, GcsBackend, LocalBackend, RestBackend,
    S3Backend, PASSWORD_ENV, REPOSITORY_ENV,
};
pub use backup::{Backup, BackupSpec};
pub use check::{Check, CheckSpec};
pub use prebackup_hook::{PreBackupHook, PreBackupHookSpec};
pub use runnable::{
    BackendMount, ClaimSource, ConfigMapSource, EnvFromRef, ResourceSpec, RunnableSpec,
    RunnableVolume, SecretKeyRef, SecretSource,
};
pub use types::{
    Condition, ConditionStatus, OperationKind, OperationPhase, OperationStatus,
    CONDITION_COMPLETED, CONDITION_PRE_BACKUP_READY, CONDITION_READY, REASON_CREATION_FAILED,
    REASON_FAILED, REASON_READY, REASON_RETRIEVAL_FAILED, REASON_STARTED, REASON_SUCCEEDED,
    REASON_WAITING,
};

/// Every CRD the operator owns, for installation or `--crd` output
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![Check::crd(), Backup::crd(), PreBackupHook::crd()]
}
