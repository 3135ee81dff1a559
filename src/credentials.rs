//! Resolves registry credentials from the cluster pull secret

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::Api;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use tracing::debug;

use crate::error::{RegistryError, Result};

/// The namespace holding the cluster-wide pull secret.
pub const PULL_SECRET_NAMESPACE: &str = "openshift-config";
/// The name of the cluster-wide pull secret.
pub const PULL_SECRET_NAME: &str = "pull-secret";
/// The data key of the docker config document inside the pull secret.
pub const PULL_SECRET_KEY: &str = ".dockerconfigjson";

/// A store capable of returning the raw pull-secret document.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use layer_probe::credentials::CredentialStore;
///
/// struct StaticStore(Vec<u8>);
///
/// #[async_trait]
/// impl CredentialStore for StaticStore {
///     async fn pull_secret(&self, _namespace: &str, _name: &str) -> anyhow::Result<Vec<u8>> {
///         Ok(self.0.clone())
///     }
/// }
/// ```
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Returns the docker config document stored in secret `namespace/name`.
    async fn pull_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Vec<u8>>;
}

/// Reads pull secrets from the Kubernetes API.
#[derive(Clone)]
pub struct KubeCredentialStore {
    client: kube::Client,
    data_key: String,
}

impl KubeCredentialStore {
    /// Creates a store reading the [`PULL_SECRET_KEY`] entry of secrets.
    pub fn new(client: kube::Client) -> Self {
        Self::with_data_key(client, PULL_SECRET_KEY)
    }

    /// Creates a store reading the `data_key` entry of secrets.
    pub fn with_data_key(client: kube::Client, data_key: &str) -> Self {
        KubeCredentialStore {
            client,
            data_key: data_key.to_owned(),
        }
    }
}

#[async_trait]
impl CredentialStore for KubeCredentialStore {
    async fn pull_secret(&self, namespace: &str, name: &str) -> anyhow::Result<Vec<u8>> {
        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets.get(name).await?;
        secret
            .data
            .unwrap_or_default()
            .remove(&self.data_key)
            .map(|ByteString(data)| data)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "secret {}/{} has no {} data",
                    namespace,
                    name,
                    self.data_key
                )
            })
    }
}

/// One registry entry of a docker config document.
///
/// Field names are matched the way cluster pull secrets spell them,
/// capitalized or not.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
pub struct DockerAuth {
    /// Opaque token, usually base64 of `user:password`. Empty means anonymous.
    #[serde(rename = "Auth", alias = "auth", default)]
    pub auth: String,
    /// The email registered with the registry
    #[serde(rename = "Email", alias = "email", default)]
    pub email: String,
}

impl DockerAuth {
    /// Converts the entry into the credential sent to the registry.
    ///
    /// An empty token means anonymous access. Anything else is sent as the
    /// HTTP basic credential exactly as stored in the secret.
    pub fn registry_auth(&self) -> RegistryAuth {
        if self.auth.is_empty() {
            RegistryAuth::Anonymous
        } else {
            RegistryAuth::BasicToken(self.auth.clone())
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct DockerConfig {
    #[serde(rename = "Auths", alias = "auths", default)]
    auths: HashMap<String, DockerAuth>,
}

/// Looks up registry credentials in a single pull secret.
///
/// Nothing is cached: every lookup reads the secret again, so rotated
/// credentials are picked up on the next call.
pub struct CredentialResolver<S> {
    store: S,
    namespace: String,
    name: String,
}

impl<S: CredentialStore> CredentialResolver<S> {
    /// Creates a resolver reading secret `namespace/name` from `store`.
    pub fn new(store: S, namespace: &str, name: &str) -> Self {
        CredentialResolver {
            store,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        }
    }

    /// Returns the pull-secret entry for `host`.
    ///
    /// A host missing from the secret is an error, never anonymous access.
    pub async fn docker_auth(&self, host: &str) -> Result<DockerAuth> {
        let document = self
            .store
            .pull_secret(&self.namespace, &self.name)
            .await
            .map_err(|source| RegistryError::CredentialStoreUnavailable {
                namespace: self.namespace.clone(),
                name: self.name.clone(),
                source,
            })?;

        let mut config: DockerConfig = serde_json::from_slice(&document).map_err(|e| {
            RegistryError::MalformedCredentials {
                reason: format!("failed to unmarshal auths: {}", e),
            }
        })?;
        debug!(%host, registries = config.auths.len(), "Read pull secret");

        config
            .auths
            .remove(host)
            .ok_or_else(|| RegistryError::NoCredentialForHost {
                host: host.to_owned(),
            })
    }

    /// Returns the credential to present to `host`.
    pub async fn resolve(&self, host: &str) -> Result<RegistryAuth> {
        Ok(self.docker_auth(host).await?.registry_auth())
    }
}
