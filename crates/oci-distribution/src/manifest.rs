//! OCI Manifest and Image Index
use std::collections::HashMap;

/// The mediatype for a Docker v2 schema 2 manifest.
pub const IMAGE_MANIFEST_MEDIA_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// The mediatype for a Docker v2 schema 2 manifest list.
pub const IMAGE_MANIFEST_LIST_MEDIA_TYPE: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// The mediatype for an OCI image manifest.
pub const OCI_IMAGE_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";
/// The mediatype for an OCI image index.
pub const OCI_IMAGE_INDEX_MEDIA_TYPE: &str = "application/vnd.oci.image.index.v1+json";
/// The mediatype for an image config (manifest).
pub const IMAGE_CONFIG_MEDIA_TYPE: &str = "application/vnd.oci.image.config.v1+json";
/// The mediatype for a layer that is gzipped.
pub const IMAGE_LAYER_GZIP_MEDIA_TYPE: &str = "application/vnd.oci.image.layer.v1.tar+gzip";
/// The mediatype that Docker uses for a layer that is gzipped.
pub const IMAGE_DOCKER_LAYER_GZIP_MEDIA_TYPE: &str =
    "application/vnd.docker.image.rootfs.diff.tar.gzip";

/// Every manifest shape this client asks a registry for.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    IMAGE_MANIFEST_MEDIA_TYPE,
    IMAGE_MANIFEST_LIST_MEDIA_TYPE,
    OCI_IMAGE_MEDIA_TYPE,
    OCI_IMAGE_INDEX_MEDIA_TYPE,
];

/// Returns true if `media_type` names a multi-platform manifest list or
/// image index rather than a single image manifest.
pub fn is_index_media_type(media_type: &str) -> bool {
    media_type.contains("manifest.list") || media_type == OCI_IMAGE_INDEX_MEDIA_TYPE
}

/// The OCI manifest describes an OCI image.
///
/// It is part of the OCI specification, and is defined here:
/// https://github.com/opencontainers/image-spec/blob/master/manifest.md
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciManifest {
    /// This is a schema version.
    ///
    /// The only version allowed by the specification is `2`.
    pub schema_version: u8,

    /// This is an optional media type describing this manifest.
    pub media_type: Option<String>,

    /// The image configuration.
    pub config: OciDescriptor,

    /// The OCI image layers, base layer first.
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,

    /// The annotations for this manifest
    pub annotations: Option<HashMap<String, String>>,
}

/// The OCI image index (or Docker manifest list) points at one manifest per
/// platform.
///
/// https://github.com/opencontainers/image-spec/blob/master/image-index.md
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciImageIndex {
    /// This is a schema version.
    pub schema_version: u8,

    /// The media type of this index.
    pub media_type: Option<String>,

    /// The per-platform manifests.
    #[serde(default)]
    pub manifests: Vec<ImageIndexEntry>,

    /// The annotations for this index
    pub annotations: Option<HashMap<String, String>>,
}

/// A single manifest referenced from an [`OciImageIndex`].
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageIndexEntry {
    /// The media type of the referenced manifest.
    pub media_type: String,
    /// The digest of the referenced manifest.
    pub digest: String,
    /// The size, in bytes, of the referenced manifest.
    pub size: i64,
    /// The platform the referenced manifest is built for.
    pub platform: Option<Platform>,
}

/// The platform an image manifest targets.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct Platform {
    /// CPU architecture, using Go's `GOARCH` names (`amd64`, `arm64`, ...).
    pub architecture: String,
    /// Operating system, using Go's `GOOS` names.
    pub os: String,
    /// CPU variant, such as `v8` for arm64.
    pub variant: Option<String>,
}

/// The OCI descriptor is a generic object used to describe other objects.
///
/// It is defined in the OCI Image Specification:
/// https://github.com/opencontainers/image-spec/blob/master/descriptor.md#properties
#[derive(Clone, Debug, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OciDescriptor {
    /// The media type of the referenced content.
    pub media_type: String,
    /// The digest of the targeted content, as `algorithm:hex`.
    pub digest: String,
    /// The size, in bytes, of the raw content.
    pub size: i64,
    /// Optional list of URIs from which this object may be downloaded.
    pub urls: Option<Vec<String>>,
    /// Arbitrary metadata for this descriptor.
    pub annotations: Option<HashMap<String, String>>,
}

impl Default for OciDescriptor {
    fn default() -> Self {
        OciDescriptor {
            media_type: IMAGE_CONFIG_MEDIA_TYPE.to_owned(),
            digest: "".to_owned(),
            size: 0,
            urls: None,
            annotations: None,
        }
    }
}
