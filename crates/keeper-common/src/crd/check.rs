//! Check Custom Resource Definition
//!
//! A Check verifies the integrity of a repository. Checks run exclusively:
//! no other operation may run in the cluster while a check job is active.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::runnable::RunnableSpec;
use super::types::OperationStatus;

/// Specification for a Check
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "keeper.dev",
    version = "v1",
    kind = "Check",
    plural = "checks",
    namespaced,
    status = "OperationStatus",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CheckSpec {
    /// Backend, volumes, environment and retention settings
    #[serde(flatten)]
    pub runnable: RunnableSpec,
}
