//! Typed views over the metadata files shipped inside driver-toolkit and
//! release payload layers.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{RegistryError, Result};

/// Where driver-toolkit images record their kernel and OS versions.
pub const TOOLKIT_RELEASE_PATH: &str = "etc/driver-toolkit-release.json";
/// Where release payload images list the images they are made of.
pub const IMAGE_REFERENCES_PATH: &str = "release-manifests/image-references";
/// The image-references tag naming the driver-toolkit image.
pub const DRIVER_TOOLKIT_TAG: &str = "driver-toolkit";
/// The image-references tag naming the machine-os-content image.
pub const MACHINE_OS_TAG: &str = "machine-os-content";
/// The machine-os-content annotation carrying the build versions.
pub const BUILD_VERSIONS_ANNOTATION: &str = "io.openshift.build.versions";

/// Kernel and OS versions of a driver-toolkit image.
///
/// `image_url` is empty when the entry was read from a layer directly and
/// not resolved through a release payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DriverToolkitEntry {
    /// The driver-toolkit image the versions were read from
    #[serde(rename = "imageURL")]
    pub image_url: String,
    /// The full kernel version, as in `uname -r`
    #[serde(rename = "kernelFullVersion")]
    pub kernel_full_version: String,
    /// The full real-time kernel version
    #[serde(rename = "RTKernelFullVersion")]
    pub rt_kernel_full_version: String,
    /// The RHEL version the image is built on
    #[serde(rename = "OSVersion")]
    pub os_version: String,
}

// Anything that is not a string counts as absent.
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Some(s),
        _ => None,
    })
}

#[derive(Debug, Deserialize)]
struct ToolkitRelease {
    #[serde(rename = "KERNEL_VERSION", default, deserialize_with = "lenient_string")]
    kernel_version: Option<String>,
    #[serde(rename = "RT_KERNEL_VERSION", default, deserialize_with = "lenient_string")]
    rt_kernel_version: Option<String>,
    #[serde(rename = "RHEL_VERSION", default, deserialize_with = "lenient_string")]
    rhel_version: Option<String>,
}

fn decode<T: serde::de::DeserializeOwned>(path: &str, value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value).map_err(|source| RegistryError::MalformedFile {
        path: path.to_owned(),
        source,
    })
}

fn required(path: &str, field: &str, value: Option<String>) -> Result<String> {
    value.ok_or_else(|| RegistryError::MissingField {
        path: path.to_owned(),
        field: field.to_owned(),
    })
}

/// Projects the content of [`TOOLKIT_RELEASE_PATH`] into a
/// [`DriverToolkitEntry`] without an image URL.
pub fn toolkit_release(file: serde_json::Value) -> Result<DriverToolkitEntry> {
    let path = TOOLKIT_RELEASE_PATH;
    let release: ToolkitRelease = decode(path, file)?;
    Ok(DriverToolkitEntry {
        image_url: String::new(),
        kernel_full_version: required(path, "KERNEL_VERSION", release.kernel_version)?,
        rt_kernel_full_version: required(path, "RT_KERNEL_VERSION", release.rt_kernel_version)?,
        os_version: required(path, "RHEL_VERSION", release.rhel_version)?,
    })
}

#[derive(Debug, Default, Deserialize)]
struct ImageReferences {
    #[serde(default)]
    spec: ImageReferencesSpec,
}

#[derive(Debug, Default, Deserialize)]
struct ImageReferencesSpec {
    #[serde(default)]
    tags: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct TagReference {
    #[serde(default)]
    from: Option<TagSource>,
    #[serde(default)]
    annotations: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct TagSource {
    #[serde(default, deserialize_with = "lenient_string")]
    name: Option<String>,
}

/// The tags of a release payload's image-references file.
///
/// Entries stay untyped until looked up, so a malformed entry only fails the
/// lookups that reach it.
#[derive(Debug)]
pub struct ReleaseTags(Vec<serde_json::Value>);

impl ReleaseTags {
    /// Decodes the content of [`IMAGE_REFERENCES_PATH`].
    pub fn decode(file: serde_json::Value) -> Result<Self> {
        let references: ImageReferences = decode(IMAGE_REFERENCES_PATH, file)?;
        references
            .spec
            .tags
            .map(ReleaseTags)
            .ok_or_else(|| RegistryError::MissingField {
                path: IMAGE_REFERENCES_PATH.to_owned(),
                field: "spec.tags".to_owned(),
            })
    }

    fn find(&self, tag: &str) -> Result<TagReference> {
        let entry = self
            .0
            .iter()
            .find(|entry| entry.get("name").and_then(|name| name.as_str()) == Some(tag))
            .ok_or_else(|| RegistryError::EntryNotFound {
                path: IMAGE_REFERENCES_PATH.to_owned(),
                tag: tag.to_owned(),
            })?;
        decode(IMAGE_REFERENCES_PATH, entry.clone())
    }

    /// Returns the image the `tag` entry points at (`from.name`).
    pub fn image(&self, tag: &str) -> Result<String> {
        let malformed = |field: &str| RegistryError::MalformedTagEntry {
            tag: tag.to_owned(),
            field: field.to_owned(),
        };
        self.find(tag)?
            .from
            .ok_or_else(|| malformed("from"))?
            .name
            .ok_or_else(|| malformed("from.name"))
    }

    /// Returns the string annotation `key` of the `tag` entry.
    pub fn annotation(&self, tag: &str, key: &str) -> Result<String> {
        let malformed = |field: &str| RegistryError::MalformedTagEntry {
            tag: tag.to_owned(),
            field: field.to_owned(),
        };
        let mut annotations = self
            .find(tag)?
            .annotations
            .ok_or_else(|| malformed("annotations"))?;
        match annotations.remove(key) {
            Some(serde_json::Value::String(value)) => Ok(value),
            _ => Err(malformed(key)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn assert_missing(result: Result<DriverToolkitEntry>, expected: &str) {
        match result {
            Err(RegistryError::MissingField { path, field }) => {
                assert_eq!(path, TOOLKIT_RELEASE_PATH);
                assert_eq!(field, expected);
            }
            other => panic!("expected MissingField {}, got {:?}", expected, other),
        }
    }

    #[test]
    fn projects_toolkit_release() {
        let entry = toolkit_release(json!({
            "KERNEL_VERSION": "4.18.0-305.el8.x86_64",
            "RT_KERNEL_VERSION": "4.18.0-305.rt7.72.el8.x86_64",
            "RHEL_VERSION": "8.4",
            "OTHER": 1,
        }))
        .unwrap();
        assert_eq!(
            entry,
            DriverToolkitEntry {
                image_url: String::new(),
                kernel_full_version: "4.18.0-305.el8.x86_64".to_owned(),
                rt_kernel_full_version: "4.18.0-305.rt7.72.el8.x86_64".to_owned(),
                os_version: "8.4".to_owned(),
            }
        );
    }

    #[test]
    fn toolkit_release_names_missing_field() {
        assert_missing(
            toolkit_release(json!({"KERNEL_VERSION": "5.14", "RHEL_VERSION": "9.0"})),
            "RT_KERNEL_VERSION",
        );
        assert_missing(
            toolkit_release(json!({"RT_KERNEL_VERSION": "5.14", "RHEL_VERSION": "9.0"})),
            "KERNEL_VERSION",
        );
        assert_missing(
            toolkit_release(json!({
                "KERNEL_VERSION": "5.14",
                "RT_KERNEL_VERSION": "5.14",
                "RHEL_VERSION": 9,
            })),
            "RHEL_VERSION",
        );
        assert!(matches!(
            toolkit_release(json!(["KERNEL_VERSION"])),
            Err(RegistryError::MalformedFile { .. })
        ));
    }

    #[test]
    fn serializes_with_cluster_field_names() {
        let entry = DriverToolkitEntry {
            image_url: "reg.io/dtk:v1".to_owned(),
            kernel_full_version: "k".to_owned(),
            rt_kernel_full_version: "rt".to_owned(),
            os_version: "8.4".to_owned(),
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            json!({
                "imageURL": "reg.io/dtk:v1",
                "kernelFullVersion": "k",
                "RTKernelFullVersion": "rt",
                "OSVersion": "8.4",
            })
        );
    }

    #[test]
    fn finds_driver_toolkit_image() {
        let tags = ReleaseTags::decode(json!({
            "spec": {"tags": [
                {"name": "foo"},
                {"name": "driver-toolkit", "from": {"kind": "DockerImage", "name": "reg.io/dtk:v1"}},
            ]}
        }))
        .unwrap();
        assert_eq!(tags.image(DRIVER_TOOLKIT_TAG).unwrap(), "reg.io/dtk:v1");
        match tags.image("bar") {
            Err(RegistryError::EntryNotFound { path, tag }) => {
                assert_eq!(path, IMAGE_REFERENCES_PATH);
                assert_eq!(tag, "bar");
            }
            other => panic!("expected EntryNotFound, got {:?}", other),
        }
    }

    #[test]
    fn malformed_tag_entries_name_the_field() {
        let tags = ReleaseTags::decode(json!({
            "spec": {"tags": [
                {"name": "no-from"},
                {"name": "no-from-name", "from": {"kind": "DockerImage"}},
                {"name": "no-annotations"},
                {"name": "other-annotations", "annotations": {"a": "b"}},
            ]}
        }))
        .unwrap();
        for (result, expected) in vec![
            (tags.image("no-from"), "from"),
            (tags.image("no-from-name"), "from.name"),
            (
                tags.annotation("no-annotations", BUILD_VERSIONS_ANNOTATION),
                "annotations",
            ),
            (
                tags.annotation("other-annotations", BUILD_VERSIONS_ANNOTATION),
                BUILD_VERSIONS_ANNOTATION,
            ),
        ] {
            match result {
                Err(RegistryError::MalformedTagEntry { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected MalformedTagEntry {}, got {:?}", expected, other),
            }
        }
    }

    #[test]
    fn finds_machine_os_versions() {
        let tags = ReleaseTags::decode(json!({
            "spec": {"tags": [{
                "name": "machine-os-content",
                "annotations": {"io.openshift.build.versions": "machine-os=49.84.202110081407-0"},
                "from": {"name": "reg.io/mosc@sha256:abcd"},
            }]}
        }))
        .unwrap();
        assert_eq!(
            tags.annotation(MACHINE_OS_TAG, BUILD_VERSIONS_ANNOTATION)
                .unwrap(),
            "machine-os=49.84.202110081407-0"
        );
    }

    #[test]
    fn malformed_unrelated_entries_are_ignored() {
        let tags = ReleaseTags::decode(json!({
            "spec": {"tags": [
                {"name": "broken", "from": "oops", "annotations": 5},
                42,
                {"name": "driver-toolkit", "from": {"name": "reg.io/dtk:v1"}},
            ]}
        }))
        .unwrap();
        assert_eq!(tags.image(DRIVER_TOOLKIT_TAG).unwrap(), "reg.io/dtk:v1");
        assert!(matches!(
            tags.image("broken"),
            Err(RegistryError::MalformedFile { .. })
        ));
    }

    #[test]
    fn missing_tags_is_a_missing_field() {
        for file in vec![json!({}), json!({"spec": {}})] {
            match ReleaseTags::decode(file) {
                Err(RegistryError::MissingField { field, .. }) => assert_eq!(field, "spec.tags"),
                other => panic!("expected MissingField spec.tags, got {:?}", other),
            }
        }
        assert!(matches!(
            ReleaseTags::decode(json!({"spec": {"tags": "driver-toolkit"}})),
            Err(RegistryError::MalformedFile { .. })
        ));
    }
}
