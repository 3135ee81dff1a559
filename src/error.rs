//! Errors produced while resolving images and reading layers.

use thiserror::Error;

/// A specialized `Result` for registry resolution and layer extraction.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Every way resolving an image or reading metadata out of a layer can fail.
///
/// None of these are retried: they are either data/format problems, or
/// auth/availability problems owned by the credential store or the registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The image string has no registry host, or no tag or digest
    #[error("image reference {image} is not valid: {reason}")]
    InvalidReference {
        /// The offending image reference
        image: String,
        /// What is wrong with it
        reason: String,
    },

    /// The pull secret could not be read from the credential store
    #[error("could not retrieve pull secret {namespace}/{name}")]
    CredentialStoreUnavailable {
        /// Namespace of the pull secret
        namespace: String,
        /// Name of the pull secret
        name: String,
        /// The underlying store failure
        #[source]
        source: anyhow::Error,
    },

    /// The pull secret document could not be decoded
    #[error("pull secret is malformed: {reason}")]
    MalformedCredentials {
        /// What could not be decoded
        reason: String,
    },

    /// The pull secret has no entry for the registry host
    #[error("cluster pull secret does not contain auth for registry {host}")]
    NoCredentialForHost {
        /// The registry host that was looked up
        host: String,
    },

    /// The registry could not be reached or refused the request
    #[error("registry request for {reference} failed")]
    Transport {
        /// The reference that was being fetched
        reference: String,
        /// The underlying transport failure
        #[source]
        source: anyhow::Error,
    },

    /// The manifest served for a reference could not be understood
    #[error("manifest for {reference} could not be decoded: {reason}")]
    ManifestDecodeError {
        /// The reference whose manifest was fetched
        reference: String,
        /// What is wrong with the manifest
        reason: String,
    },

    /// A manifest index has no entry for the target architecture
    #[error("failed to find manifest for architecture {architecture} in {reference}")]
    ArchitectureNotFound {
        /// The architecture that was looked for
        architecture: String,
        /// The reference of the manifest index
        reference: String,
    },

    /// The resolved manifest lists no layers
    #[error("image {reference} has no layers")]
    NoLayers {
        /// The image that was resolved
        reference: String,
    },

    /// The layer could not be decompressed, unpacked or decoded
    #[error("failed to read {path} from layer")]
    LayerReadError {
        /// The file that was being looked for
        path: String,
        /// The underlying read or decode failure
        #[source]
        source: std::io::Error,
    },

    /// No archive entry matches the requested path
    #[error("file {path} not found in the layer")]
    FileNotFoundInLayer {
        /// The file that was looked for
        path: String,
    },

    /// The file was found but does not have the expected shape
    #[error("{path} has an unexpected format")]
    MalformedFile {
        /// The file that was decoded
        path: String,
        /// The decode failure
        #[source]
        source: serde_json::Error,
    },

    /// A required string field is absent from a metadata file
    #[error("failed to get {field} from {path}")]
    MissingField {
        /// The file that was decoded
        path: String,
        /// The absent field
        field: String,
    },

    /// No tag with the requested name exists in the image references
    #[error("failed to find {tag} in {path}")]
    EntryNotFound {
        /// The file that was decoded
        path: String,
        /// The tag that was looked for
        tag: String,
    },

    /// The tag exists but lacks a required field
    #[error("invalid image reference format for {tag} entry, missing `{field}`")]
    MalformedTagEntry {
        /// The tag that was found
        tag: String,
        /// The absent field
        field: String,
    },
}
