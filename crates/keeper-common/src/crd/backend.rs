//! Repository backend descriptor
//!
//! A backend names where the repository lives and which secrets hold its
//! credentials. Exactly one storage variant is expected; an empty backend
//! renders an empty repository string and only the password credential.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::runnable::{BackendMount, SecretKeyRef};

/// Environment variable holding the repository location
pub const REPOSITORY_ENV: &str = "RESTIC_REPOSITORY";
/// Environment variable holding the repository password
pub const PASSWORD_ENV: &str = "RESTIC_PASSWORD";

/// S3-compatible object storage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct S3Backend {
    /// Endpoint URL (e.g., `https://s3.eu-central-1.amazonaws.com`)
    pub endpoint: String,
    /// Bucket name
    pub bucket: String,
    /// Secret key holding `AWS_ACCESS_KEY_ID`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id_secret_ref: Option<SecretKeyRef>,
    /// Secret key holding `AWS_SECRET_ACCESS_KEY`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key_secret_ref: Option<SecretKeyRef>,
}

/// Backblaze B2
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct B2Backend {
    /// Bucket name
    pub bucket: String,
    /// Path inside the bucket
    #[serde(default)]
    pub path: String,
    /// Secret key holding `B2_ACCOUNT_ID`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id_secret_ref: Option<SecretKeyRef>,
    /// Secret key holding the account key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_key_secret_ref: Option<SecretKeyRef>,
}

/// Azure blob storage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AzureBackend {
    /// Blob container
    pub container: String,
    /// Secret key holding `AZURE_ACCOUNT_NAME`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name_secret_ref: Option<SecretKeyRef>,
    /// Secret key holding the account key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_key_secret_ref: Option<SecretKeyRef>,
}

/// Google Cloud Storage
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GcsBackend {
    /// Bucket name
    pub bucket: String,
    /// Secret key holding `GOOGLE_PROJECT_ID`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id_secret_ref: Option<SecretKeyRef>,
    /// Secret key holding `GOOGLE_ACCESS_TOKEN`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_secret_ref: Option<SecretKeyRef>,
}

/// Restic REST server
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestBackend {
    /// Server URL including scheme
    pub url: String,
    /// Secret key holding the REST server user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_secret_ref: Option<SecretKeyRef>,
    /// Secret key holding the REST server password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_secret_ref: Option<SecretKeyRef>,
}

/// Repository on a path mounted into the job pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocalBackend {
    /// Path of the repository inside the pod
    pub mount_path: String,
}

/// TLS material passed to the backup tool
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BackendOptions {
    /// Path to a CA certificate inside the pod
    #[serde(default)]
    pub ca_cert: String,
    /// Path to a client certificate inside the pod
    #[serde(default)]
    pub client_cert: String,
    /// Path to the client certificate's key inside the pod
    #[serde(default)]
    pub client_key: String,
}

/// Repository backend
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Backend {
    /// Secret key holding the repository password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_password_secret_ref: Option<SecretKeyRef>,

    /// S3-compatible storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3: Option<S3Backend>,
    /// Backblaze B2
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b2: Option<B2Backend>,
    /// Azure blob storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure: Option<AzureBackend>,
    /// Google Cloud Storage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcs: Option<GcsBackend>,
    /// REST server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rest: Option<RestBackend>,
    /// Repository on a mounted path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local: Option<LocalBackend>,

    /// TLS material
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BackendOptions>,

    /// Extra mounts for the job container (certificates, local repositories)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_mounts: Option<Vec<BackendMount>>,
}

impl Backend {
    /// Repository location in the backup tool's URL syntax
    ///
    /// Variants are checked in a fixed order; the first one present wins.
    pub fn repository(&self) -> String {
        if let Some(s3) = &self.s3 {
            return format!("s3:{}/{}", s3.endpoint.trim_end_matches('/'), s3.bucket);
        }
        if let Some(b2) = &self.b2 {
            return format!("b2:{}:{}", b2.bucket, b2.path);
        }
        if let Some(azure) = &self.azure {
            return format!("azure:{}:/", azure.container);
        }
        if let Some(gcs) = &self.gcs {
            return format!("gs:{}:/", gcs.bucket);
        }
        if let Some(rest) = &self.rest {
            return format!("rest:{}", rest.url);
        }
        if let Some(local) = &self.local {
            return local.mount_path.clone();
        }
        String::new()
    }

    /// Credential environment entries, in a stable order
    pub fn credential_env(&self) -> Vec<(&'static str, SecretKeyRef)> {
        let mut refs: Vec<(&'static str, Option<&SecretKeyRef>)> =
            vec![(PASSWORD_ENV, self.repo_password_secret_ref.as_ref())];

        if let Some(s3) = &self.s3 {
            refs.push(("AWS_ACCESS_KEY_ID", s3.access_key_id_secret_ref.as_ref()));
            refs.push((
                "AWS_SECRET_ACCESS_KEY",
                s3.secret_access_key_secret_ref.as_ref(),
            ));
        } else if let Some(b2) = &self.b2 {
            refs.push(("B2_ACCOUNT_ID", b2.account_id_secret_ref.as_ref()));
            refs.push(("B2_ACCOUNT_KEY", b2.account_key_secret_ref.as_ref()));
        } else if let Some(azure) = &self.azure {
            refs.push(("AZURE_ACCOUNT_NAME", azure.account_name_secret_ref.as_ref()));
            refs.push(("AZURE_ACCOUNT_KEY", azure.account_key_secret_ref.as_ref()));
        } else if let Some(gcs) = &self.gcs {
            refs.push(("GOOGLE_PROJECT_ID", gcs.project_id_secret_ref.as_ref()));
            refs.push(("GOOGLE_ACCESS_TOKEN", gcs.access_token_secret_ref.as_ref()));
        } else if let Some(rest) = &self.rest {
            refs.push(("USER", rest.user_secret_ref.as_ref()));
            refs.push(("PASSWORD", rest.password_secret_ref.as_ref()));
        }

        refs.into_iter()
            .filter_map(|(env, r)| r.map(|r| (env, r.clone())))
            .collect()
    }

    /// TLS options, if any were set
    pub fn tls_options(&self) -> Option<&BackendOptions> {
        self.options.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(name: &str, key: &str) -> SecretKeyRef {
        SecretKeyRef {
            name: name.to_string(),
            key: key.to_string(),
        }
    }

    fn s3_backend() -> Backend {
        Backend {
            repo_password_secret_ref: Some(secret("repo", "password")),
            s3: Some(S3Backend {
                endpoint: "http://minio:9000/".to_string(),
                bucket: "backups".to_string(),
                access_key_id_secret_ref: Some(secret("minio", "username")),
                secret_access_key_secret_ref: Some(secret("minio", "password")),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_s3_repository_string() {
        assert_eq!(s3_backend().repository(), "s3:http://minio:9000/backups");
    }

    #[test]
    fn test_other_repository_strings() {
        let b2 = Backend {
            b2: Some(B2Backend {
                bucket: "bkt".to_string(),
                path: "/app".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(b2.repository(), "b2:bkt:/app");

        let gcs = Backend {
            gcs: Some(GcsBackend {
                bucket: "bkt".to_string(),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(gcs.repository(), "gs:bkt:/");

        let local = Backend {
            local: Some(LocalBackend {
                mount_path: "/repo".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(local.repository(), "/repo");

        assert_eq!(Backend::default().repository(), "");
    }

    #[test]
    fn story_s3_credentials_include_password_first() {
        let env = s3_backend().credential_env();
        let names: Vec<&str> = env.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![PASSWORD_ENV, "AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY"]
        );
        assert_eq!(env[1].1, secret("minio", "username"));
    }

    #[test]
    fn test_missing_refs_are_skipped() {
        let backend = Backend {
            rest: Some(RestBackend {
                url: "https://rest:8000/".to_string(),
                user_secret_ref: Some(secret("rest", "user")),
                password_secret_ref: None,
            }),
            ..Default::default()
        };
        let env = backend.credential_env();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].0, "USER");
    }

    #[test]
    fn test_backend_parses_from_yaml() {
        let backend: Backend = serde_yaml::from_str(
            r#"
repoPasswordSecretRef:
  name: repo
  key: password
s3:
  endpoint: http://minio:9000
  bucket: backups
options:
  caCert: /certs/ca.crt
volumeMounts:
  - name: certs
    mountPath: /certs
"#,
        )
        .unwrap();
        assert_eq!(backend.tls_options().unwrap().ca_cert, "/certs/ca.crt");
        assert!(backend.tls_options().unwrap().client_cert.is_empty());
        assert_eq!(backend.volume_mounts.as_ref().unwrap()[0].mount_path, "/certs");
    }
}
