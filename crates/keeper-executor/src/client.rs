//! Cluster access for executors
//!
//! Wraps the kube-rs calls the executors need behind [`OperationKubeClient`]
//! so the orchestration logic can be tested without an API server.

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, ServiceAccount};
use k8s_openapi::api::rbac::v1::{RoleBinding, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::entry::{CommitError, Entry};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams, PropagationPolicy};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use keeper_common::crd::{Backup, Check, OperationKind, OperationPhase, OperationStatus};
use keeper_common::{Error, OperatorConfig, FIELD_MANAGER, LABEL_TYPE};

use crate::template::JobMutation;

/// Attempts before a conflicting upsert is given up
const UPSERT_ATTEMPTS: usize = 5;

/// Summary of an operation as seen by retention
#[derive(Clone, Debug, PartialEq)]
pub struct OperationRecord {
    pub name: String,
    pub phase: OperationPhase,
    pub created_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OperationRecord {
    fn from_parts(meta: &ObjectMeta, status: Option<&OperationStatus>) -> Self {
        Self {
            name: meta.name.clone().unwrap_or_default(),
            phase: status.map(|s| s.phase).unwrap_or_default(),
            created_at: meta.creation_timestamp.as_ref().map(|t| t.0),
            finished_at: status.and_then(|s| s.finished_at),
        }
    }
}

/// Trait abstracting the cluster calls made by executors
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperationKubeClient: Send + Sync {
    /// Fetch-mutate-write the named job; created from the mutation's template when absent
    async fn upsert_job(
        &self,
        namespace: &str,
        name: &str,
        mutation: &JobMutation,
    ) -> Result<Job, Error>;

    /// Create `job` unless one with the same name exists; returns whether it was created
    async fn create_job_if_absent(&self, job: &Job) -> Result<bool, Error>;

    /// Get a job, `None` when it does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error>;

    /// Delete a job and its pods; a missing job is not an error
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error>;

    /// Every Keeper job in the cluster
    async fn list_running_jobs(&self) -> Result<Vec<Job>, Error>;

    /// Ensure the executor service account and its role binding exist
    async fn ensure_service_account(&self, namespace: &str) -> Result<(), Error>;

    async fn list_volume_claims(&self, namespace: &str)
        -> Result<Vec<PersistentVolumeClaim>, Error>;

    async fn list_operations(
        &self,
        kind: OperationKind,
        namespace: &str,
    ) -> Result<Vec<OperationRecord>, Error>;

    /// Delete an operation; a missing operation is not an error
    async fn delete_operation(
        &self,
        kind: OperationKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error>;

    async fn patch_status(
        &self,
        kind: OperationKind,
        namespace: &str,
        name: &str,
        status: &OperationStatus,
    ) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct OperationKubeClientImpl {
    client: Client,
    service_account: String,
    cluster_role: String,
}

impl OperationKubeClientImpl {
    pub fn new(client: Client, config: &OperatorConfig) -> Self {
        Self {
            client,
            service_account: config.service_account.clone(),
            cluster_role: config.executor_cluster_role.clone(),
        }
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

async fn delete_ignoring_missing<K>(
    api: Api<K>,
    name: &str,
    params: &DeleteParams,
) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, params).await.map_err(Error::from) {
        Ok(_) => Ok(()),
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(e),
    }
}

fn commit_error(name: &str, error: CommitError) -> Error {
    match error {
        CommitError::Save(e) => e.into(),
        CommitError::Validate(e) => {
            Error::internal_with_context("upsert", format!("job '{}': {}", name, e))
        }
    }
}

#[async_trait]
impl OperationKubeClient for OperationKubeClientImpl {
    async fn upsert_job(
        &self,
        namespace: &str,
        name: &str,
        mutation: &JobMutation,
    ) -> Result<Job, Error> {
        let api = self.jobs(namespace);
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut entry = match api.entry(name).await? {
                Entry::Occupied(mut occupied) => {
                    mutation.mutate(occupied.get_mut())?;
                    occupied
                }
                Entry::Vacant(vacant) => vacant.insert(mutation.render()?),
            };

            match entry.commit(&params).await {
                Ok(()) => return Ok(entry.get().clone()),
                Err(CommitError::Save(kube::Error::Api(ae)))
                    if ae.code == 409 && attempt < UPSERT_ATTEMPTS =>
                {
                    debug!(job = %name, namespace = %namespace, attempt, "conflict on job upsert, retrying");
                }
                Err(e) => return Err(commit_error(name, e)),
            }
        }
    }

    async fn create_job_if_absent(&self, job: &Job) -> Result<bool, Error> {
        let namespace = job
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| Error::validation_for(job.name_any(), "job has no namespace"))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match self.jobs(namespace).create(&params, job).await {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<Option<Job>, Error> {
        Ok(self.jobs(namespace).get_opt(name).await?)
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<(), Error> {
        let params = DeleteParams {
            propagation_policy: Some(PropagationPolicy::Background),
            ..Default::default()
        };
        delete_ignoring_missing(self.jobs(namespace), name, &params).await
    }

    async fn list_running_jobs(&self) -> Result<Vec<Job>, Error> {
        let api: Api<Job> = Api::all(self.client.clone());
        let jobs = api.list(&ListParams::default().labels(LABEL_TYPE)).await?;
        Ok(jobs.items)
    }

    async fn ensure_service_account(&self, namespace: &str) -> Result<(), Error> {
        let params = PatchParams::apply(FIELD_MANAGER);

        let account = ServiceAccount {
            metadata: ObjectMeta {
                name: Some(self.service_account.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        accounts
            .patch(&self.service_account, &params, &Patch::Apply(&account))
            .await?;

        let binding = RoleBinding {
            metadata: ObjectMeta {
                name: Some(self.service_account.clone()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            role_ref: RoleRef {
                api_group: "rbac.authorization.k8s.io".to_string(),
                kind: "ClusterRole".to_string(),
                name: self.cluster_role.clone(),
            },
            subjects: Some(vec![Subject {
                kind: "ServiceAccount".to_string(),
                name: self.service_account.clone(),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            }]),
        };
        let bindings: Api<RoleBinding> = Api::namespaced(self.client.clone(), namespace);
        bindings
            .patch(&self.service_account, &params, &Patch::Apply(&binding))
            .await?;

        debug!(namespace = %namespace, "executor service account ensured");
        Ok(())
    }

    async fn list_volume_claims(
        &self,
        namespace: &str,
    ) -> Result<Vec<PersistentVolumeClaim>, Error> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_operations(
        &self,
        kind: OperationKind,
        namespace: &str,
    ) -> Result<Vec<OperationRecord>, Error> {
        let lp = ListParams::default();
        let records = match kind {
            OperationKind::Check => {
                let api: Api<Check> = Api::namespaced(self.client.clone(), namespace);
                api.list(&lp)
                    .await?
                    .items
                    .iter()
                    .map(|c| OperationRecord::from_parts(&c.metadata, c.status.as_ref()))
                    .collect()
            }
            OperationKind::Backup => {
                let api: Api<Backup> = Api::namespaced(self.client.clone(), namespace);
                api.list(&lp)
                    .await?
                    .items
                    .iter()
                    .map(|b| OperationRecord::from_parts(&b.metadata, b.status.as_ref()))
                    .collect()
            }
        };
        Ok(records)
    }

    async fn delete_operation(
        &self,
        kind: OperationKind,
        namespace: &str,
        name: &str,
    ) -> Result<(), Error> {
        let params = DeleteParams::default();
        match kind {
            OperationKind::Check => {
                let api: Api<Check> = Api::namespaced(self.client.clone(), namespace);
                delete_ignoring_missing(api, name, &params).await
            }
            OperationKind::Backup => {
                let api: Api<Backup> = Api::namespaced(self.client.clone(), namespace);
                delete_ignoring_missing(api, name, &params).await
            }
        }
    }

    async fn patch_status(
        &self,
        kind: OperationKind,
        namespace: &str,
        name: &str,
        status: &OperationStatus,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({ "status": status });
        let params = PatchParams::apply(FIELD_MANAGER);
        let result = match kind {
            OperationKind::Check => {
                let api: Api<Check> = Api::namespaced(self.client.clone(), namespace);
                api.patch_status(name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
            }
            OperationKind::Backup => {
                let api: Api<Backup> = Api::namespaced(self.client.clone(), namespace);
                api.patch_status(name, &params, &Patch::Merge(&patch))
                    .await
                    .map(|_| ())
            }
        };

        match result.map_err(Error::from) {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(kind = %kind, name = %name, namespace = %namespace, "operation vanished before status update");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
