//! Discriminated union over the operation kinds an executor can run

use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use keeper_common::crd::{
    Backup, Check, OperationKind, OperationPhase, OperationStatus, RunnableSpec,
};
use keeper_common::Error;

/// A Check or Backup handed over by the driver
#[derive(Clone, Debug)]
pub enum Operation {
    /// Repository integrity check
    Check(Arc<Check>),
    /// Volume backup
    Backup(Arc<Backup>),
}

impl Operation {
    pub fn kind(&self) -> OperationKind {
        match self {
            Self::Check(_) => OperationKind::Check,
            Self::Backup(_) => OperationKind::Backup,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Self::Check(c) => c.meta(),
            Self::Backup(b) => b.meta(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Self::Check(c) => c.name_any(),
            Self::Backup(b) => b.name_any(),
        }
    }

    /// Namespace of the operation; operations are always namespaced
    pub fn namespace(&self) -> Result<String, Error> {
        self.meta()
            .namespace
            .clone()
            .ok_or_else(|| Error::validation_for(self.name(), "operation has no namespace"))
    }

    /// Deterministic name of the job backing this operation
    pub fn job_name(&self) -> String {
        self.kind().job_name(&self.name())
    }

    pub fn runnable(&self) -> &RunnableSpec {
        match self {
            Self::Check(c) => &c.spec.runnable,
            Self::Backup(b) => &b.spec.runnable,
        }
    }

    /// Current status, defaulting to `NotStarted` when none was reported yet
    pub fn status(&self) -> OperationStatus {
        let status = match self {
            Self::Check(c) => c.status.clone(),
            Self::Backup(b) => b.status.clone(),
        };
        status.unwrap_or_default()
    }

    pub fn phase(&self) -> OperationPhase {
        self.status().phase
    }

    /// Controller owner reference so jobs are garbage-collected with the operation
    pub fn owner_reference(&self) -> Option<OwnerReference> {
        match self {
            Self::Check(c) => c.controller_owner_ref(&()),
            Self::Backup(b) => b.controller_owner_ref(&()),
        }
    }
}

impl From<Check> for Operation {
    fn from(check: Check) -> Self {
        Self::Check(Arc::new(check))
    }
}

impl From<Backup> for Operation {
    fn from(backup: Backup) -> Self {
        Self::Backup(Arc::new(backup))
    }
}
