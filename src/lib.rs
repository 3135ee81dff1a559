//! A crate for reading release metadata out of container image layers.
//!
//! The [`Registry`] engine resolves an image reference to its layer digests
//! (following multi-architecture indexes), fetches a layer and scans its tar
//! archive for a known JSON file. Registry credentials come from a cluster
//! pull secret through a [`CredentialStore`]; registry traffic goes through a
//! [`RegistryTransport`].
//!
//! # Example
//! ```rust,no_run
//! use layer_probe::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = kube::Client::try_default().await?;
//!     let registry = Config::default().registry(client);
//!
//!     let entry = registry
//!         .driver_toolkit_entry("quay.io/openshift-release-dev/ocp-release:4.12.0-x86_64")
//!         .await?;
//!     println!("{} runs kernel {}", entry.image_url, entry.kernel_full_version);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod credentials;
pub mod error;
pub mod layer;
pub mod manifest;
pub mod reference;
mod registry;
pub mod release;
pub mod transport;

#[doc(inline)]
pub use credentials::CredentialStore;
#[doc(inline)]
pub use error::{RegistryError, Result};
pub use registry::Registry;
#[doc(inline)]
pub use release::DriverToolkitEntry;
#[doc(inline)]
pub use transport::RegistryTransport;
