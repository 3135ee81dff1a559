//! The registry transport: fetches manifests and layers for fully qualified
//! references.

use std::convert::TryFrom;

use async_trait::async_trait;
use oci_distribution::client::ClientConfig;
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use tracing::debug;

use crate::layer::Layer;

/// A transport capable of fetching manifests and blobs from a registry.
///
/// Failures are final for the current call; implementations should not
/// retry on their own behalf either.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use layer_probe::layer::Layer;
/// use layer_probe::transport::RegistryTransport;
/// use oci_distribution::secrets::RegistryAuth;
///
/// struct InMemoryTransport(std::collections::HashMap<String, Vec<u8>>);
///
/// #[async_trait]
/// impl RegistryTransport for InMemoryTransport {
///     async fn fetch_manifest(&self, reference: &str, _auth: &RegistryAuth) -> anyhow::Result<Vec<u8>> {
///         self.0
///             .get(reference)
///             .cloned()
///             .ok_or_else(|| anyhow::anyhow!("manifest unknown: {}", reference))
///     }
///
///     async fn fetch_layer(&self, reference: &str, _auth: &RegistryAuth) -> anyhow::Result<Layer> {
///         let data = self
///             .0
///             .get(reference)
///             .cloned()
///             .ok_or_else(|| anyhow::anyhow!("blob unknown: {}", reference))?;
///         Ok(Layer::from_bytes(reference, data))
///     }
/// }
/// ```
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Fetch the raw manifest bytes `reference` points at.
    async fn fetch_manifest(&self, reference: &str, auth: &RegistryAuth)
        -> anyhow::Result<Vec<u8>>;

    /// Fetch the compressed layer blob `reference` (`repository@digest`)
    /// points at. The returned layer may still be streaming from the
    /// registry.
    async fn fetch_layer(&self, reference: &str, auth: &RegistryAuth) -> anyhow::Result<Layer>;
}

/// A [`RegistryTransport`] speaking the OCI distribution protocol.
///
/// Every call builds a fresh [`Client`], so no bearer token outlives the
/// request it was granted for.
#[derive(Clone, Debug, Default)]
pub struct OciTransport {
    config: ClientConfig,
}

impl OciTransport {
    /// Creates a transport whose clients use `config`.
    pub fn new(config: ClientConfig) -> Self {
        OciTransport { config }
    }

    fn client(&self) -> Client {
        Client::new(self.config.clone())
    }
}

fn parse_reference(reference: &str) -> anyhow::Result<Reference> {
    Reference::try_from(reference)
        .map_err(|e| anyhow::anyhow!("cannot parse reference {}: {}", reference, e))
}

#[async_trait]
impl RegistryTransport for OciTransport {
    async fn fetch_manifest(
        &self,
        reference: &str,
        auth: &RegistryAuth,
    ) -> anyhow::Result<Vec<u8>> {
        let image = parse_reference(reference)?;
        let (manifest, digest) = self.client().pull_manifest_raw(&image, auth).await?;
        debug!(%image, %digest, "Fetched manifest");
        Ok(manifest)
    }

    async fn fetch_layer(&self, reference: &str, auth: &RegistryAuth) -> anyhow::Result<Layer> {
        let image = parse_reference(reference)?;
        let digest = image
            .digest()
            .ok_or_else(|| anyhow::anyhow!("layer reference {} has no digest", reference))?;
        let chunks = self
            .client()
            .pull_blob_stream(&image, auth, digest)
            .await?;
        debug!(%image, "Streaming layer");
        Ok(Layer::streamed(digest, chunks))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// A transport serving fixed manifests and layers, recording every
    /// reference it was asked for.
    #[derive(Default)]
    pub(crate) struct FakeTransport {
        manifests: HashMap<String, Vec<u8>>,
        layers: HashMap<String, Vec<u8>>,
        pub(crate) requests: Mutex<Vec<(String, RegistryAuth)>>,
    }

    impl FakeTransport {
        pub(crate) fn with_manifest(mut self, reference: &str, manifest: &str) -> Self {
            self.manifests
                .insert(reference.to_owned(), manifest.as_bytes().to_vec());
            self
        }

        pub(crate) fn with_layer(mut self, reference: &str, data: Vec<u8>) -> Self {
            self.layers.insert(reference.to_owned(), data);
            self
        }

        pub(crate) fn requested(&self) -> Vec<String> {
            self.requests
                .lock()
                .expect("requests lock poisoned")
                .iter()
                .map(|(reference, _)| reference.clone())
                .collect()
        }

        fn record(&self, reference: &str, auth: &RegistryAuth) {
            self.requests
                .lock()
                .expect("requests lock poisoned")
                .push((reference.to_owned(), auth.clone()));
        }
    }

    #[async_trait]
    impl RegistryTransport for FakeTransport {
        async fn fetch_manifest(
            &self,
            reference: &str,
            auth: &RegistryAuth,
        ) -> anyhow::Result<Vec<u8>> {
            self.record(reference, auth);
            self.manifests
                .get(reference)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("MANIFEST_UNKNOWN: {}", reference))
        }

        async fn fetch_layer(
            &self,
            reference: &str,
            auth: &RegistryAuth,
        ) -> anyhow::Result<Layer> {
            self.record(reference, auth);
            let digest = reference.rsplit('@').next().unwrap_or(reference);
            self.layers
                .get(reference)
                .cloned()
                .map(|data| Layer::from_bytes(digest, data))
                .ok_or_else(|| anyhow::anyhow!("BLOB_UNKNOWN: {}", reference))
        }
    }

    #[tokio::test]
    async fn oci_transport_rejects_layer_without_digest() {
        let err = OciTransport::default()
            .fetch_layer("quay.io/openshift/release:4.12", &RegistryAuth::Anonymous)
            .await
            .expect_err("a tag cannot address a layer");
        assert!(err.to_string().contains("has no digest"));
    }

    #[tokio::test]
    async fn oci_transport_rejects_unparseable_reference() {
        let err = OciTransport::default()
            .fetch_manifest("release", &RegistryAuth::Anonymous)
            .await
            .expect_err("no registry in reference");
        assert!(err.to_string().contains("cannot parse reference"));
    }
}
