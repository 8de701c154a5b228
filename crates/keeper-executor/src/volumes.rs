//! Volume and mount assembly for job pods
//!
//! Every pod gets exactly one scratch volume mounted at the configured
//! working directory. Backend mounts come first in the mount list; declared
//! volumes are filtered to the sources the job may use. Volume names are
//! unique within a plan: the scratch volume wins, then claims, then declared
//! volumes in order.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, EmptyDirVolumeSource, PersistentVolumeClaimVolumeSource,
    SecretVolumeSource, Volume, VolumeMount,
};
use tracing::warn;

use keeper_common::crd::{BackendMount, RunnableVolume};

/// Name of the scratch volume shared by every job
pub const SCRATCH_VOLUME: &str = "keeper-dir";

/// Volumes and matching container mounts for one job
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VolumePlan {
    pub volumes: Vec<Volume>,
    pub mounts: Vec<VolumeMount>,
}

pub fn scratch_volume() -> Volume {
    Volume {
        name: SCRATCH_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

pub fn scratch_mount(var_dir: &str) -> VolumeMount {
    VolumeMount {
        name: SCRATCH_VOLUME.to_string(),
        mount_path: var_dir.to_string(),
        ..Default::default()
    }
}

/// Volume for a declared source, or `None` when no usable source is set
///
/// Sources are considered in order: claim, secret, config map.
pub fn declared_volume(declared: &RunnableVolume) -> Option<Volume> {
    let mut volume = Volume {
        name: declared.name.clone(),
        ..Default::default()
    };

    if let Some(claim) = declared
        .persistent_volume_claim
        .as_ref()
        .filter(|c| !c.claim_name.is_empty())
    {
        volume.persistent_volume_claim = Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim.claim_name.clone(),
            read_only: claim.read_only,
        });
    } else if let Some(secret) = declared
        .secret
        .as_ref()
        .filter(|s| !s.secret_name.is_empty())
    {
        volume.secret = Some(SecretVolumeSource {
            secret_name: Some(secret.secret_name.clone()),
            default_mode: secret.default_mode,
            ..Default::default()
        });
    } else if let Some(config_map) = declared.config_map.as_ref().filter(|c| !c.name.is_empty()) {
        volume.config_map = Some(ConfigMapVolumeSource {
            name: config_map.name.clone(),
            default_mode: config_map.default_mode,
            ..Default::default()
        });
    } else {
        return None;
    }

    Some(volume)
}

/// Read-only claim volume used by backups
pub fn claim_volume(claim_name: &str) -> Volume {
    Volume {
        name: claim_name.to_string(),
        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
            claim_name: claim_name.to_string(),
            read_only: Some(true),
        }),
        ..Default::default()
    }
}

fn backend_mount(mount: &BackendMount) -> VolumeMount {
    VolumeMount {
        name: mount.name.clone(),
        mount_path: mount.mount_path.clone(),
        read_only: mount.read_only,
        sub_path: mount.sub_path.clone(),
        ..Default::default()
    }
}

/// Builder for a job's [`VolumePlan`]
#[derive(Clone, Debug)]
pub struct VolumeAssembler<'a> {
    var_dir: &'a str,
    backend_mounts: &'a [BackendMount],
    declared: &'a [RunnableVolume],
    claims: &'a [String],
    claim_root: &'a str,
}

impl<'a> VolumeAssembler<'a> {
    pub fn new(var_dir: &'a str) -> Self {
        Self {
            var_dir,
            backend_mounts: &[],
            declared: &[],
            claims: &[],
            claim_root: "",
        }
    }

    pub fn backend_mounts(mut self, mounts: Option<&'a [BackendMount]>) -> Self {
        self.backend_mounts = mounts.unwrap_or_default();
        self
    }

    pub fn declared(mut self, volumes: Option<&'a [RunnableVolume]>) -> Self {
        self.declared = volumes.unwrap_or_default();
        self
    }

    /// Claims mounted read-only at `<root>/<claim>`
    pub fn claims(mut self, claims: &'a [String], root: &'a str) -> Self {
        self.claims = claims;
        self.claim_root = root;
        self
    }

    pub fn build(self) -> VolumePlan {
        let mut plan = VolumePlan {
            volumes: vec![scratch_volume()],
            mounts: self.backend_mounts.iter().map(backend_mount).collect(),
        };
        let mut seen = BTreeSet::from([SCRATCH_VOLUME.to_string()]);

        for claim in self.claims {
            if !seen.insert(claim.clone()) {
                warn!(claim = %claim, "claim name already used by another volume, skipping");
                continue;
            }
            plan.volumes.push(claim_volume(claim));
            plan.mounts.push(VolumeMount {
                name: claim.clone(),
                mount_path: format!("{}/{}", self.claim_root.trim_end_matches('/'), claim),
                read_only: Some(true),
                ..Default::default()
            });
        }

        for declared in self.declared {
            let Some(volume) = declared_volume(declared) else {
                continue;
            };
            if !seen.insert(volume.name.clone()) {
                warn!(volume = %volume.name, "volume name already used by another volume, skipping");
                continue;
            }
            plan.volumes.push(volume);
        }

        plan.mounts.push(scratch_mount(self.var_dir));
        plan
    }
}
