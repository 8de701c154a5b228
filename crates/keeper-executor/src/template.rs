//! Base job template and the pure mutation applied on upsert
//!
//! `generic_job` renders the skeleton every operation starts from.
//! [`JobMutation`] carries the per-operation desired state and is handed to
//! the upsert primitive, which may apply it more than once on conflict.

use std::collections::BTreeMap;

use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvFromSource, EnvVar, PodSpec, PodTemplateSpec, ResourceRequirements, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use keeper_common::crd::ResourceSpec;
use keeper_common::{
    Error, OperatorConfig, LABEL_EXCLUSIVE, LABEL_MANAGED_BY, LABEL_MANAGED_BY_KEEPER,
    LABEL_OWNED_BY, LABEL_TYPE,
};

use crate::operation::Operation;

/// Entrypoint of the executor image
pub const EXECUTOR_COMMAND: [&str; 2] = ["/usr/local/bin/keeper", "restic"];

fn quantities(values: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
    if values.is_empty() {
        return None;
    }
    Some(
        values
            .iter()
            .map(|(k, v)| (k.clone(), Quantity(v.clone())))
            .collect(),
    )
}

fn resource_requirements(spec: Option<&ResourceSpec>) -> Option<ResourceRequirements> {
    let spec = spec?;
    Some(ResourceRequirements {
        requests: quantities(&spec.requests),
        limits: quantities(&spec.limits),
        ..Default::default()
    })
}

/// Labels identifying a job as belonging to an operation
pub fn operation_labels(op: &Operation) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_TYPE.to_string(), op.kind().as_str().to_string()),
        (LABEL_OWNED_BY.to_string(), op.name()),
        (
            LABEL_MANAGED_BY.to_string(),
            LABEL_MANAGED_BY_KEEPER.to_string(),
        ),
    ])
}

/// Render the skeleton job for an operation
pub fn generic_job(op: &Operation, config: &OperatorConfig) -> Result<Job, Error> {
    let namespace = op.namespace()?;
    let labels = operation_labels(op);

    Ok(Job {
        metadata: ObjectMeta {
            name: Some(op.job_name()),
            namespace: Some(namespace),
            labels: Some(labels.clone()),
            owner_references: op.owner_reference().map(|owner| vec![owner]),
            ..Default::default()
        },
        spec: Some(JobSpec {
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("OnFailure".to_string()),
                    containers: vec![Container {
                        name: op.kind().as_str().to_string(),
                        image: Some(config.executor_image.clone()),
                        command: Some(EXECUTOR_COMMAND.iter().map(|s| s.to_string()).collect()),
                        resources: resource_requirements(op.runnable().resources.as_ref()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Desired state of a job, applied as a single mutation
///
/// `mutate` only overwrites fields it owns, so applying it to its own output
/// changes nothing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JobMutation {
    pub template: Job,
    pub env: Vec<EnvVar>,
    pub env_from: Vec<EnvFromSource>,
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
    pub args: Vec<String>,
    pub service_account: Option<String>,
    pub exclusive: bool,
}

impl JobMutation {
    pub fn new(template: Job) -> Self {
        Self {
            template,
            ..Default::default()
        }
    }

    fn container_name(&self) -> Option<&str> {
        self.template
            .spec
            .as_ref()
            .and_then(|s| s.template.spec.as_ref())
            .and_then(|p| p.containers.first())
            .map(|c| c.name.as_str())
    }

    fn desired_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.template.metadata.labels.clone().unwrap_or_default();
        if self.exclusive {
            labels.insert(LABEL_EXCLUSIVE.to_string(), "true".to_string());
        }
        labels
    }

    /// Bring `job` to the desired state
    ///
    /// A job without a spec receives the template's spec first. Fails when
    /// the job has no container matching the template's.
    pub fn mutate(&self, job: &mut Job) -> Result<(), Error> {
        let container_name = self
            .container_name()
            .ok_or_else(|| {
                Error::internal_with_context("job template", "template has no container")
            })?
            .to_string();

        let labels = self.desired_labels();
        job.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels.clone());
        if job.metadata.owner_references.is_none() {
            job.metadata.owner_references = self.template.metadata.owner_references.clone();
        }

        if job.spec.is_none() {
            job.spec = self.template.spec.clone();
        }
        let Some(spec) = job.spec.as_mut() else {
            return Err(Error::internal_with_context("job template", "job has no spec"));
        };

        spec.template
            .metadata
            .get_or_insert_with(ObjectMeta::default)
            .labels
            .get_or_insert_with(BTreeMap::new)
            .extend(labels);

        let pod = spec.template.spec.get_or_insert_with(PodSpec::default);
        pod.volumes = Some(self.volumes.clone());
        if self.service_account.is_some() {
            pod.service_account_name = self.service_account.clone();
        }

        let container = pod
            .containers
            .iter_mut()
            .find(|c| c.name == container_name)
            .ok_or_else(|| {
                Error::internal_with_context(
                    "job template",
                    format!("job has no container named '{}'", container_name),
                )
            })?;
        container.env = Some(self.env.clone());
        container.env_from = (!self.env_from.is_empty()).then(|| self.env_from.clone());
        container.volume_mounts = Some(self.mounts.clone());
        container.args = Some(self.args.clone());
        Ok(())
    }

    /// The template with this mutation applied, for create-only paths
    pub fn render(&self) -> Result<Job, Error> {
        let mut job = self.template.clone();
        self.mutate(&mut job)?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_common::crd::{Check, CheckSpec, RunnableSpec};

    fn check_op() -> Operation {
        let mut check = Check::new(
            "nightly",
            CheckSpec {
                runnable: RunnableSpec {
                    resources: Some(ResourceSpec {
                        requests: BTreeMap::from([("cpu".to_string(), "100m".to_string())]),
                        limits: BTreeMap::new(),
                    }),
                    ..Default::default()
                },
            },
        );
        check.metadata.namespace = Some("apps".to_string());
        check.metadata.uid = Some("uid-1".to_string());
        Operation::from(check)
    }

    fn container(job: &Job) -> &Container {
        &job.spec.as_ref().unwrap().template.spec.as_ref().unwrap().containers[0]
    }

    fn mutation() -> JobMutation {
        let template = generic_job(&check_op(), &OperatorConfig::default()).unwrap();
        JobMutation {
            env: vec![EnvVar {
                name: "HOSTNAME".to_string(),
                value: Some("apps".to_string()),
                ..Default::default()
            }],
            args: vec!["-check".to_string()],
            exclusive: true,
            ..JobMutation::new(template)
        }
    }

    #[test]
    fn test_generic_job_shape() {
        let config = OperatorConfig::default();
        let job = generic_job(&check_op(), &config).unwrap();

        assert_eq!(job.metadata.name.as_deref(), Some("check-nightly"));
        assert_eq!(job.metadata.namespace.as_deref(), Some("apps"));
        let labels = job.metadata.labels.as_ref().unwrap();
        assert_eq!(labels[LABEL_TYPE], "check");
        assert_eq!(labels[LABEL_OWNED_BY], "nightly");
        assert_eq!(job.metadata.owner_references.as_ref().unwrap().len(), 1);

        let pod = job.spec.as_ref().unwrap().template.spec.as_ref().unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("OnFailure"));
        let c = container(&job);
        assert_eq!(c.name, "check");
        assert_eq!(c.image.as_deref(), Some(config.executor_image.as_str()));
        assert_eq!(
            c.resources.as_ref().unwrap().requests.as_ref().unwrap()["cpu"],
            Quantity("100m".to_string())
        );
        assert!(c.resources.as_ref().unwrap().limits.is_none());
    }

    #[test]
    fn test_mutation_sets_owned_fields_and_exclusive_label() {
        let job = mutation().render().unwrap();

        assert_eq!(job.metadata.labels.as_ref().unwrap()[LABEL_EXCLUSIVE], "true");
        let c = container(&job);
        assert_eq!(c.args.as_deref(), Some(&["-check".to_string()][..]));
        assert_eq!(c.env.as_ref().unwrap()[0].name, "HOSTNAME");
        assert!(c.env_from.is_none());
    }

    #[test]
    fn test_mutation_is_idempotent() {
        let m = mutation();
        let once = m.render().unwrap();
        let mut twice = once.clone();
        m.mutate(&mut twice).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_mutation_fills_empty_job_from_template() {
        let m = mutation();
        let mut job = Job {
            metadata: ObjectMeta {
                name: Some("check-nightly".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        m.mutate(&mut job).unwrap();
        assert_eq!(container(&job).name, "check");
        assert!(job.metadata.owner_references.is_some());
    }

    #[test]
    fn test_mutation_without_template_container_fails() {
        let m = JobMutation::new(Job::default());
        let err = m.render().unwrap_err();
        assert!(matches!(err, Error::Internal { ref context, .. } if context == "job template"));
    }
}
