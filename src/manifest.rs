//! Decoding of fetched manifests into either a single image manifest or a
//! multi-architecture index.

use oci_distribution::manifest::{is_index_media_type, OciImageIndex, OciManifest};
use serde::Deserialize;

use crate::error::{RegistryError, Result};

/// A decoded manifest, discriminated by its `mediaType`.
#[derive(Debug, Clone)]
pub enum Manifest {
    /// A single-platform image manifest
    Image(OciManifest),
    /// A manifest list or image index with one entry per platform
    Index(OciImageIndex),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaTypeOnly {
    media_type: Option<String>,
}

impl Manifest {
    /// Decodes the manifest bytes served for `reference`.
    ///
    /// The `mediaType` field is required: it is the only thing telling an
    /// index apart from an image manifest.
    pub fn decode(reference: &str, bytes: &[u8]) -> Result<Self> {
        let decode_error = |reason: String| RegistryError::ManifestDecodeError {
            reference: reference.to_owned(),
            reason,
        };

        let media_type = serde_json::from_slice::<MediaTypeOnly>(bytes)
            .map_err(|e| decode_error(e.to_string()))?
            .media_type
            .ok_or_else(|| decode_error("mediaType is missing".to_owned()))?;

        if is_index_media_type(&media_type) {
            serde_json::from_slice(bytes)
                .map(Manifest::Index)
                .map_err(|e| decode_error(format!("invalid {}: {}", media_type, e)))
        } else {
            serde_json::from_slice(bytes)
                .map(Manifest::Image)
                .map_err(|e| decode_error(format!("invalid {}: {}", media_type, e)))
        }
    }

    /// The media type the manifest was decoded as.
    pub fn media_type(&self) -> &str {
        let media_type = match self {
            Manifest::Image(manifest) => &manifest.media_type,
            Manifest::Index(index) => &index.media_type,
        };
        media_type.as_deref().unwrap_or_default()
    }
}

/// Returns the digest of the index entry built for `architecture`.
pub fn select_architecture(
    reference: &str,
    index: &OciImageIndex,
    architecture: &str,
) -> Result<String> {
    let entry = index
        .manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map(|platform| platform.architecture == architecture)
                .unwrap_or(false)
        })
        .ok_or_else(|| RegistryError::ArchitectureNotFound {
            architecture: architecture.to_owned(),
            reference: reference.to_owned(),
        })?;
    normalize_digest(reference, &entry.digest)
}

/// Returns the layer digests of `manifest`, base layer first.
pub fn layer_digests(reference: &str, manifest: &OciManifest) -> Result<Vec<String>> {
    manifest
        .layers
        .iter()
        .map(|layer| normalize_digest(reference, &layer.digest))
        .collect()
}

/// Checks that `digest` is of the form `algorithm:hex` and returns it.
fn normalize_digest(reference: &str, digest: &str) -> Result<String> {
    match digest.split_once(':') {
        Some((algorithm, hex))
            if !algorithm.is_empty()
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(format!("{}:{}", algorithm, hex))
        }
        _ => Err(RegistryError::ManifestDecodeError {
            reference: reference.to_owned(),
            reason: format!("invalid digest {:?}", digest),
        }),
    }
}

/// Maps the platform this process runs on to the architecture names used
/// in manifest indexes.
pub fn default_architecture() -> String {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "x86" => "386",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
        "powerpc64" => "ppc64",
        "s390x" => "s390x",
        "riscv64" => "riscv64",
        other => other,
    }
    .to_owned()
}
