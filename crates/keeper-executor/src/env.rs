//! Environment assembly for job containers
//!
//! Entries keep insertion order and each key appears once. Callers set
//! backend credentials first, then scalar settings, then merge defaults.
//! Empty literals never enter the set, so an unset default cannot shadow
//! anything and an empty explicit value leaves room for a default.

use k8s_openapi::api::core::v1::{
    ConfigMapEnvSource, EnvFromSource, EnvVar, EnvVarSource, SecretEnvSource, SecretKeySelector,
};
use tracing::warn;

use keeper_common::crd::{Backend, EnvFromRef, SecretKeyRef, PASSWORD_ENV, REPOSITORY_ENV};
use keeper_common::{EnvMergePolicy, OperatorConfig};

/// Value of a single environment entry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EnvValue {
    Literal(String),
    Secret(SecretKeyRef),
}

/// Defaults that collided with explicitly set keys during a merge
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("default environment entries conflict with explicit ones: {}", .keys.join(", "))]
pub struct EnvMergeConflict {
    pub keys: Vec<String>,
    pub policy: EnvMergePolicy,
}

/// Ordered, duplicate-free set of environment entries
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvSet {
    entries: Vec<(String, EnvValue)>,
}

impl EnvSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a literal value; empty values are ignored
    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let value = value.into();
        if value.is_empty() {
            return;
        }
        self.set(key.into(), EnvValue::Literal(value));
    }

    /// Set a value read from a secret key
    pub fn set_secret(&mut self, key: impl Into<String>, secret: SecretKeyRef) {
        self.set(key.into(), EnvValue::Secret(secret));
    }

    fn set(&mut self, key: String, value: EnvValue) {
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&EnvValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge default entries into this set
    ///
    /// Missing keys are always appended. Keys already present are resolved
    /// by `policy` and reported in the returned conflict; every non-conflicting
    /// default is applied either way.
    pub fn merge(
        &mut self,
        defaults: EnvSet,
        policy: EnvMergePolicy,
    ) -> Result<(), EnvMergeConflict> {
        let mut conflicts = Vec::new();
        for (key, value) in defaults.entries {
            match self.get(&key) {
                None => self.entries.push((key, value)),
                Some(existing) if *existing == value => {}
                Some(_) => {
                    if policy == EnvMergePolicy::PreferDefaults {
                        self.set(key.clone(), value);
                    }
                    conflicts.push(key);
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(EnvMergeConflict {
                keys: conflicts,
                policy,
            })
        }
    }

    /// Render as container environment variables
    pub fn into_env_vars(self) -> Vec<EnvVar> {
        self.entries
            .into_iter()
            .map(|(name, value)| match value {
                EnvValue::Literal(value) => EnvVar {
                    name,
                    value: Some(value),
                    ..Default::default()
                },
                EnvValue::Secret(secret) => EnvVar {
                    name,
                    value_from: Some(EnvVarSource {
                        secret_key_ref: Some(SecretKeySelector {
                            name: secret.name,
                            key: secret.key,
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            })
            .collect()
    }
}

/// Defaults applied to every job, sourced from operator configuration
pub fn default_env(namespace: &str, config: &OperatorConfig) -> EnvSet {
    let mut defaults = EnvSet::new();
    defaults.set_string("STATS_URL", &config.global_stats_url);
    if !config.global_s3_endpoint.is_empty() && !config.global_s3_bucket.is_empty() {
        defaults.set_string(
            REPOSITORY_ENV,
            format!(
                "s3:{}/{}",
                config.global_s3_endpoint.trim_end_matches('/'),
                config.global_s3_bucket
            ),
        );
    }
    defaults.set_string(PASSWORD_ENV, &config.global_repo_password);
    defaults.set_string("AWS_ACCESS_KEY_ID", &config.global_access_key_id);
    defaults.set_string("AWS_SECRET_ACCESS_KEY", &config.global_secret_access_key);
    defaults.set_string("HOSTNAME", namespace);
    defaults
}

/// Explicit backend entries: credentials first, then the repository string
pub fn backend_env(backend: Option<&Backend>) -> EnvSet {
    let mut vars = EnvSet::new();
    if let Some(backend) = backend {
        for (key, secret) in backend.credential_env() {
            vars.set_secret(key, secret);
        }
        vars.set_string(REPOSITORY_ENV, backend.repository());
    }
    vars
}

/// Merge `defaults` into `explicit`, logging any conflict
pub fn merge_logged(
    explicit: &mut EnvSet,
    defaults: EnvSet,
    policy: EnvMergePolicy,
    operation: &str,
    namespace: &str,
) {
    if let Err(conflict) = explicit.merge(defaults, policy) {
        warn!(
            name = %operation,
            namespace = %namespace,
            keys = ?conflict.keys,
            policy = ?conflict.policy,
            "error while merging the environment variables"
        );
    }
}

/// Bulk environment sources for the container
pub fn env_from_sources(refs: &[EnvFromRef]) -> Vec<EnvFromSource> {
    refs.iter()
        .filter(|r| r.config_map_ref.is_some() || r.secret_ref.is_some())
        .map(|r| EnvFromSource {
            config_map_ref: r.config_map_ref.as_ref().map(|name| ConfigMapEnvSource {
                name: name.clone(),
                ..Default::default()
            }),
            secret_ref: r.secret_ref.as_ref().map(|name| SecretEnvSource {
                name: name.clone(),
                ..Default::default()
            }),
            prefix: r.prefix.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeper_common::crd::S3Backend;

    fn secret(name: &str, key: &str) -> SecretKeyRef {
        SecretKeyRef {
            name: name.to_string(),
            key: key.to_string(),
        }
    }

    fn names(vars: &[EnvVar]) -> Vec<&str> {
        vars.iter().map(|v| v.name.as_str()).collect()
    }

    #[test]
    fn test_insertion_order_is_kept_and_keys_are_unique() {
        let mut vars = EnvSet::new();
        vars.set_string("B", "1");
        vars.set_string("A", "2");
        vars.set_string("B", "3");

        let rendered = vars.into_env_vars();
        assert_eq!(names(&rendered), vec!["B", "A"]);
        assert_eq!(rendered[0].value.as_deref(), Some("3"));
    }

    #[test]
    fn test_empty_literals_are_skipped() {
        let mut vars = EnvSet::new();
        vars.set_string("PROM_URL", "");
        assert!(vars.is_empty());
    }

    #[test]
    fn story_defaults_fill_gaps_but_never_override_explicit() {
        let mut explicit = EnvSet::new();
        explicit.set_secret(PASSWORD_ENV, secret("repo", "password"));
        explicit.set_string(REPOSITORY_ENV, "s3:http://minio:9000/backups");

        let mut defaults = EnvSet::new();
        defaults.set_string(PASSWORD_ENV, "global-password");
        defaults.set_string("HOSTNAME", "apps");

        let conflict = explicit
            .merge(defaults, EnvMergePolicy::KeepExplicit)
            .unwrap_err();
        assert_eq!(conflict.keys, vec![PASSWORD_ENV.to_string()]);

        assert_eq!(
            explicit.get(PASSWORD_ENV),
            Some(&EnvValue::Secret(secret("repo", "password")))
        );
        assert_eq!(
            explicit.get("HOSTNAME"),
            Some(&EnvValue::Literal("apps".to_string()))
        );
        assert_eq!(explicit.len(), 3);
    }

    #[test]
    fn test_prefer_defaults_policy_replaces_in_place() {
        let mut explicit = EnvSet::new();
        explicit.set_string("A", "explicit");
        explicit.set_string("B", "b");

        let mut defaults = EnvSet::new();
        defaults.set_string("A", "default");

        let conflict = explicit
            .merge(defaults, EnvMergePolicy::PreferDefaults)
            .unwrap_err();
        assert_eq!(conflict.policy, EnvMergePolicy::PreferDefaults);

        let rendered = explicit.into_env_vars();
        assert_eq!(names(&rendered), vec!["A", "B"]);
        assert_eq!(rendered[0].value.as_deref(), Some("default"));
    }

    #[test]
    fn test_identical_default_is_not_a_conflict() {
        let mut explicit = EnvSet::new();
        explicit.set_string("HOSTNAME", "apps");
        let mut defaults = EnvSet::new();
        defaults.set_string("HOSTNAME", "apps");
        assert!(explicit.merge(defaults, EnvMergePolicy::KeepExplicit).is_ok());
    }

    #[test]
    fn test_default_env_skips_unset_globals() {
        let defaults = default_env("apps", &OperatorConfig::default());
        assert_eq!(defaults.len(), 1);
        assert!(defaults.contains("HOSTNAME"));

        let config = OperatorConfig {
            global_s3_endpoint: "http://minio:9000/".to_string(),
            global_s3_bucket: "shared".to_string(),
            global_repo_password: "pw".to_string(),
            ..Default::default()
        };
        let defaults = default_env("apps", &config);
        assert_eq!(
            defaults.get(REPOSITORY_ENV),
            Some(&EnvValue::Literal("s3:http://minio:9000/shared".to_string()))
        );
        assert!(defaults.contains(PASSWORD_ENV));
    }

    #[test]
    fn test_backend_env_renders_secret_refs() {
        let backend = Backend {
            repo_password_secret_ref: Some(secret("repo", "password")),
            s3: Some(S3Backend {
                endpoint: "http://minio:9000".to_string(),
                bucket: "backups".to_string(),
                access_key_id_secret_ref: Some(secret("minio", "id")),
                secret_access_key_secret_ref: None,
            }),
            ..Default::default()
        };

        let rendered = backend_env(Some(&backend)).into_env_vars();
        assert_eq!(
            names(&rendered),
            vec![PASSWORD_ENV, "AWS_ACCESS_KEY_ID", REPOSITORY_ENV]
        );
        let selector = rendered[1]
            .value_from
            .as_ref()
            .and_then(|s| s.secret_key_ref.as_ref())
            .unwrap();
        assert_eq!(selector.name, "minio");
        assert_eq!(selector.key, "id");

        assert!(backend_env(None).is_empty());
    }

    #[test]
    fn test_env_from_skips_empty_refs() {
        let refs = vec![
            EnvFromRef {
                secret_ref: Some("extra".to_string()),
                prefix: Some("X_".to_string()),
                ..Default::default()
            },
            EnvFromRef::default(),
        ];
        let sources = env_from_sources(&refs);
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].secret_ref.as_ref().unwrap().name, "extra");
        assert_eq!(sources[0].prefix.as_deref(), Some("X_"));
    }
}
