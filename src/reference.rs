//! Parsing of raw image strings into the pieces credentials and manifests are
//! keyed by.

use url::Url;

use crate::error::{RegistryError, Result};

// Any non-special scheme works: it keeps explicit ports, including 443.
const NETWORK_PATH_SCHEME: &str = "oci";

/// Returns the registry host of `image`, with its port if one is given.
///
/// Both `https://reg.io/org/repo:tag` and the schemeless `reg.io/org/repo:tag`
/// yield `reg.io`. Any scheme is dropped first and the rest is parsed under
/// one non-special scheme, so an explicit port is always kept:
/// `https://reg.io:443/org/repo:tag` yields `reg.io:443`.
pub fn registry_from_image(image: &str) -> Result<String> {
    let rest = match image.split_once("://") {
        Some((scheme, rest)) if is_scheme(scheme) => rest,
        _ => image,
    };
    Url::parse(&format!("{}://{}", NETWORK_PATH_SCHEME, rest))
        .ok()
        .and_then(|url| host_of(&url))
        .ok_or_else(|| RegistryError::InvalidReference {
            image: image.to_owned(),
            reason: "failed to parse registry host".to_owned(),
        })
}

fn is_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn host_of(url: &Url) -> Option<String> {
    let host = url.host_str().filter(|h| !h.is_empty())?;
    Some(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_owned(),
    })
}

/// Returns `image` without its digest or tag.
///
/// A digest (`@algorithm:hex`) takes precedence; otherwise the tag is the
/// part after the last colon of the final path component, so a registry
/// port is never mistaken for a tag.
pub fn repository_from_image(image: &str) -> Result<String> {
    if let Some((repository, _)) = image.split_once('@') {
        return non_empty(image, repository);
    }

    let last_component = image.rfind('/').map(|slash| slash + 1).unwrap_or(0);
    match image[last_component..].rfind(':') {
        Some(colon) => non_empty(image, &image[..last_component + colon]),
        None => Err(RegistryError::InvalidReference {
            image: image.to_owned(),
            reason: "does not contain hash or tag".to_owned(),
        }),
    }
}

fn non_empty(image: &str, repository: &str) -> Result<String> {
    if repository.is_empty() {
        return Err(RegistryError::InvalidReference {
            image: image.to_owned(),
            reason: "repository name is empty".to_owned(),
        });
    }
    Ok(repository.to_owned())
}
