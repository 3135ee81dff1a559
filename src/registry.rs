//! The resolution engine: turns an image reference into layer digests and
//! layers, and reads release metadata out of those layers.

use oci_distribution::secrets::RegistryAuth;
use tracing::{debug, info, instrument};

use crate::credentials::{CredentialResolver, CredentialStore};
use crate::error::{RegistryError, Result};
use crate::layer::{extract_json, Layer};
use crate::manifest::{layer_digests, select_architecture, Manifest};
use crate::reference::{registry_from_image, repository_from_image};
use crate::release::{
    toolkit_release, DriverToolkitEntry, ReleaseTags, BUILD_VERSIONS_ANNOTATION,
    DRIVER_TOOLKIT_TAG, IMAGE_REFERENCES_PATH, MACHINE_OS_TAG, TOOLKIT_RELEASE_PATH,
};
use crate::transport::RegistryTransport;

/// Resolves images and extracts metadata from their layers.
///
/// A `Registry` holds no state between calls besides its collaborators and
/// the target architecture: every call reads credentials again and fetches
/// manifests and layers anew.
pub struct Registry<S, T> {
    credentials: CredentialResolver<S>,
    transport: T,
    architecture: String,
}

impl<S: CredentialStore, T: RegistryTransport> Registry<S, T> {
    /// Creates an engine resolving manifest indexes for `architecture`.
    pub fn new(credentials: CredentialResolver<S>, transport: T, architecture: &str) -> Self {
        Registry {
            credentials,
            transport,
            architecture: architecture.to_owned(),
        }
    }

    /// The architecture manifest indexes are resolved for.
    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// Resolves `image` to its repository, its layer digests (base layer
    /// first) and the credential used to fetch them.
    #[instrument(level = "info", skip(self), fields(architecture = %self.architecture))]
    pub async fn layers_digests(&self, image: &str) -> Result<(String, Vec<String>, RegistryAuth)> {
        let host = registry_from_image(image)?;
        let auth = self.credentials.resolve(&host).await?;
        let repository = repository_from_image(image)?;
        debug!(%host, %repository, anonymous = auth.is_anonymous(), "Resolved image reference");

        let manifest = match self.fetch_manifest(image, &auth).await? {
            Manifest::Index(index) => {
                let digest = select_architecture(image, &index, &self.architecture)?;
                let reference = format!("{}@{}", repository, digest);
                debug!(%digest, "Selected manifest from index");
                match self.fetch_manifest(&reference, &auth).await? {
                    Manifest::Image(manifest) => manifest,
                    Manifest::Index(_) => {
                        return Err(RegistryError::ManifestDecodeError {
                            reference,
                            reason: "nested manifest index".to_owned(),
                        })
                    }
                }
            }
            Manifest::Image(manifest) => manifest,
        };

        let digests = layer_digests(image, &manifest)?;
        info!(layers = digests.len(), "Resolved layer digests");
        Ok((repository, digests, auth))
    }

    /// Fetches the layer `repository@digest`.
    #[instrument(level = "info", skip(self, auth))]
    pub async fn layer_by_digest(
        &self,
        repository: &str,
        digest: &str,
        auth: &RegistryAuth,
    ) -> Result<Layer> {
        let reference = format!("{}@{}", repository, digest);
        let layer = self
            .transport
            .fetch_layer(&reference, auth)
            .await
            .map_err(|source| RegistryError::Transport {
                reference: reference.clone(),
                source,
            })?;
        debug!("Fetched layer");
        Ok(layer)
    }

    /// Fetches the most recent layer of `image`.
    pub async fn last_layer(&self, image: &str) -> Result<Layer> {
        let (repository, digests, auth) = self.layers_digests(image).await?;
        let digest = digests.last().ok_or_else(|| RegistryError::NoLayers {
            reference: image.to_owned(),
        })?;
        self.layer_by_digest(&repository, digest, &auth).await
    }

    /// Reads the kernel and OS versions out of a driver-toolkit layer.
    ///
    /// The returned entry has no image URL.
    pub async fn extract_toolkit_release(&self, layer: Layer) -> Result<DriverToolkitEntry> {
        toolkit_release(read_file(layer, TOOLKIT_RELEASE_PATH).await?)
    }

    /// Returns the driver-toolkit image named by a release payload layer.
    pub async fn release_manifests(&self, layer: Layer) -> Result<String> {
        ReleaseTags::decode(read_file(layer, IMAGE_REFERENCES_PATH).await?)?
            .image(DRIVER_TOOLKIT_TAG)
    }

    /// Returns the build versions of the machine-os-content image named by a
    /// release payload layer.
    pub async fn release_image_machine_os_config(&self, layer: Layer) -> Result<String> {
        ReleaseTags::decode(read_file(layer, IMAGE_REFERENCES_PATH).await?)?
            .annotation(MACHINE_OS_TAG, BUILD_VERSIONS_ANNOTATION)
    }

    /// Resolves the driver-toolkit image of `release_image` and reads its
    /// versions.
    #[instrument(level = "info", skip(self))]
    pub async fn driver_toolkit_entry(&self, release_image: &str) -> Result<DriverToolkitEntry> {
        let release_layer = self.last_layer(release_image).await?;
        let image_url = self.release_manifests(release_layer).await?;
        debug!(%image_url, "Found driver-toolkit image in release");

        let toolkit_layer = self.last_layer(&image_url).await?;
        let entry = self.extract_toolkit_release(toolkit_layer).await?;
        Ok(DriverToolkitEntry { image_url, ..entry })
    }

    async fn fetch_manifest(&self, reference: &str, auth: &RegistryAuth) -> Result<Manifest> {
        let bytes = self
            .transport
            .fetch_manifest(reference, auth)
            .await
            .map_err(|source| RegistryError::Transport {
                reference: reference.to_owned(),
                source,
            })?;
        let manifest = Manifest::decode(reference, &bytes)?;
        debug!(%reference, media_type = manifest.media_type(), "Fetched manifest");
        Ok(manifest)
    }
}

// Layer reads block on the network, so they run off the async workers.
async fn read_file(layer: Layer, path: &'static str) -> Result<serde_json::Value> {
    tokio::task::spawn_blocking(move || extract_json(layer, path))
        .await
        .map_err(|e| RegistryError::LayerReadError {
            path: path.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?
}
