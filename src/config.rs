//! Configuration for layer-probe
//!
//! Library users build a [`Config`] by hand, usually starting from
//! [`Config::default`]. The binary uses [`Opts`] to read it from flags and the
//! environment.

use oci_distribution::client::{ClientConfig, ClientProtocol};
use structopt::StructOpt;

use crate::credentials::{
    CredentialResolver, KubeCredentialStore, PULL_SECRET_KEY, PULL_SECRET_NAME,
    PULL_SECRET_NAMESPACE,
};
use crate::manifest::default_architecture;
use crate::registry::Registry;
use crate::transport::OciTransport;

/// Everything needed to build a [`Registry`] talking to a real cluster and
/// real registries.
#[derive(Clone, Debug)]
pub struct Config {
    /// Namespace of the pull secret holding registry credentials
    pub pull_secret_namespace: String,
    /// Name of the pull secret holding registry credentials
    pub pull_secret_name: String,
    /// Data key of the docker config document inside the pull secret
    pub pull_secret_key: String,
    /// Architecture to pick out of manifest indexes
    pub architecture: String,
    /// Registries to reach over plain HTTP
    pub insecure_registries: Vec<String>,
    /// Accept invalid TLS certificates from registries
    pub accept_invalid_certificates: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            pull_secret_namespace: PULL_SECRET_NAMESPACE.to_owned(),
            pull_secret_name: PULL_SECRET_NAME.to_owned(),
            pull_secret_key: PULL_SECRET_KEY.to_owned(),
            architecture: default_architecture(),
            insecure_registries: Vec::new(),
            accept_invalid_certificates: false,
        }
    }
}

impl Config {
    /// The registry client configuration these settings call for.
    pub fn client_config(&self) -> ClientConfig {
        let protocol = if self.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(self.insecure_registries.clone())
        };
        ClientConfig {
            protocol,
            accept_invalid_certificates: self.accept_invalid_certificates,
            ..Default::default()
        }
    }

    /// Builds an engine reading the pull secret through `client`.
    pub fn registry(&self, client: kube::Client) -> Registry<KubeCredentialStore, OciTransport> {
        let store = KubeCredentialStore::with_data_key(client, &self.pull_secret_key);
        Registry::new(
            CredentialResolver::new(store, &self.pull_secret_namespace, &self.pull_secret_name),
            OciTransport::new(self.client_config()),
            &self.architecture,
        )
    }
}

/// CLI options that can be configured for layer-probe
#[derive(StructOpt, Clone, Debug)]
#[structopt(
    name = "layer-probe",
    about = "Reads kernel and OS versions out of OpenShift release and driver-toolkit images"
)]
pub struct Opts {
    #[structopt(
        long = "pull-secret-namespace",
        default_value = PULL_SECRET_NAMESPACE,
        env = "PULL_SECRET_NAMESPACE",
        help = "The namespace of the pull secret holding registry credentials"
    )]
    pull_secret_namespace: String,
    #[structopt(
        long = "pull-secret-name",
        default_value = PULL_SECRET_NAME,
        env = "PULL_SECRET_NAME",
        help = "The name of the pull secret holding registry credentials"
    )]
    pull_secret_name: String,
    #[structopt(
        long = "arch",
        env = "LAYER_PROBE_ARCH",
        help = "The architecture to select from multi-architecture images. Defaults to the architecture of this machine"
    )]
    arch: Option<String>,
    #[structopt(
        long = "insecure-registry",
        env = "INSECURE_REGISTRIES",
        use_delimiter = true,
        help = "Registries to reach over plain HTTP. May be given more than once, or as a comma separated list"
    )]
    insecure_registries: Vec<String>,
    #[structopt(
        long = "accept-invalid-certificates",
        help = "Accept invalid TLS certificates from registries"
    )]
    accept_invalid_certificates: bool,
    /// The operation to run
    #[structopt(subcommand)]
    pub command: Command,
}

/// The operations the binary can run. Each prints its result as JSON.
#[derive(StructOpt, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print the repository and layer digests of an image
    Digests {
        /// The image to resolve
        image: String,
    },
    /// Print the kernel and OS versions recorded in a driver-toolkit image
    ToolkitRelease {
        /// The driver-toolkit image
        image: String,
    },
    /// Print the driver-toolkit image of a release payload
    DtkImage {
        /// The release payload image
        release_image: String,
    },
    /// Print the machine-os-content build versions of a release payload
    MachineOs {
        /// The release payload image
        release_image: String,
    },
    /// Print the full driver-toolkit entry of a release payload
    DtkEntry {
        /// The release payload image
        release_image: String,
    },
}

impl From<&Opts> for Config {
    fn from(opts: &Opts) -> Self {
        let defaults = Config::default();
        Config {
            pull_secret_namespace: opts.pull_secret_namespace.clone(),
            pull_secret_name: opts.pull_secret_name.clone(),
            architecture: opts.arch.clone().unwrap_or(defaults.architecture),
            insecure_registries: opts.insecure_registries.clone(),
            accept_invalid_certificates: opts.accept_invalid_certificates,
            ..defaults
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> Opts {
        Opts::from_iter_safe(std::iter::once("layer-probe").chain(args.iter().copied()))
            .expect("valid arguments")
    }

    #[test]
    fn defaults_read_cluster_pull_secret() {
        let config = Config::default();
        assert_eq!(config.pull_secret_namespace, "openshift-config");
        assert_eq!(config.pull_secret_name, "pull-secret");
        assert_eq!(config.pull_secret_key, ".dockerconfigjson");
        assert_eq!(config.architecture, default_architecture());
        assert!(matches!(
            config.client_config().protocol,
            ClientProtocol::Https
        ));
    }

    #[test]
    fn flags_override_defaults() {
        let opts = parse(&[
            "--pull-secret-namespace",
            "ns",
            "--pull-secret-name",
            "creds",
            "--arch",
            "arm64",
            "--insecure-registry",
            "localhost:5000",
            "--accept-invalid-certificates",
            "dtk-entry",
            "quay.io/openshift-release-dev/ocp-release:4.12.0-x86_64",
        ]);
        assert_eq!(
            opts.command,
            Command::DtkEntry {
                release_image: "quay.io/openshift-release-dev/ocp-release:4.12.0-x86_64"
                    .to_owned()
            }
        );

        let config = Config::from(&opts);
        assert_eq!(config.pull_secret_namespace, "ns");
        assert_eq!(config.pull_secret_name, "creds");
        assert_eq!(config.pull_secret_key, PULL_SECRET_KEY);
        assert_eq!(config.architecture, "arm64");

        let client_config = config.client_config();
        assert!(client_config.accept_invalid_certificates);
        match client_config.protocol {
            ClientProtocol::HttpsExcept(registries) => {
                assert_eq!(registries, vec!["localhost:5000".to_owned()])
            }
            other => panic!("expected HttpsExcept, got {:?}", other),
        }
    }

    #[test]
    fn subcommands_take_an_image() {
        assert_eq!(
            parse(&["digests", "reg.io/org/repo:tag"]).command,
            Command::Digests {
                image: "reg.io/org/repo:tag".to_owned()
            }
        );
        assert_eq!(
            parse(&["machine-os", "reg.io/release:4.12"]).command,
            Command::MachineOs {
                release_image: "reg.io/release:4.12".to_owned()
            }
        );
        assert!(Opts::from_iter_safe(vec!["layer-probe", "toolkit-release"]).is_err());
    }
}
