//! Common types for Keeper: CRDs, configuration, errors and telemetry

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod error;
pub mod telemetry;

pub use config::{EnvMergePolicy, OperatorConfig};
pub use error::Error;

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "keeper-operator";

/// Label carrying the operation kind (`check`, `backup`) on generated jobs
pub const LABEL_TYPE: &str = "keeper.dev/type";

/// Label carrying the owning operation's name on generated jobs
pub const LABEL_OWNED_BY: &str = "keeper.dev/owned-by";

/// Label marking a job that must not run alongside any other job
pub const LABEL_EXCLUSIVE: &str = "keeper.dev/exclusive";

/// Standard managed-by label key
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value for the managed-by label
pub const LABEL_MANAGED_BY_KEEPER: &str = "keeper";

/// Annotation recording a paused deployment's replica count
pub const ANNOTATION_ORIGINAL_REPLICAS: &str = "keeper.dev/original-replicas";

/// Annotation listing the backups holding a deployment paused, comma separated
pub const ANNOTATION_PAUSED_BY: &str = "keeper.dev/paused-by";
