//! OCI distribution client
//!
//! *Note*: This client only pulls. It fetches raw manifests, so callers can
//! decide themselves how to treat image indexes, and streams blobs either
//! into any [`AsyncWrite`] or as a lazily polled stream of chunks.

use crate::errors::OciEnvelope;
use crate::manifest::MANIFEST_MEDIA_TYPES;
use crate::secrets::{Authenticable, RegistryAuth};
use crate::token_cache::{RegistryToken, RegistryTokenType, TokenCache};
use crate::Reference;

use anyhow::{anyhow, Context};
use futures_util::stream::{BoxStream, StreamExt};
use hyperx::header::Header;
use reqwest::header::HeaderMap;
use reqwest::RequestBuilder;
use sha2::Digest;
use std::convert::TryFrom;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace, warn};
use www_authenticate::{Challenge, ChallengeFields, RawChallenge, WwwAuthenticate};

/// The OCI client connects to an OCI registry and pulls manifests and blobs.
///
/// Most registries require at least an OAuth2 handshake even for public
/// content. The client performs it lazily, once per repository, the first
/// time a manifest or blob of that repository is requested, and keeps the
/// granted token for its own lifetime only.
#[derive(Default)]
pub struct Client {
    config: ClientConfig,
    tokens: TokenCache,
    client: reqwest::Client,
}

impl TryFrom<ClientConfig> for Client {
    type Error = anyhow::Error;

    fn try_from(config: ClientConfig) -> Result<Self, Self::Error> {
        let mut client_builder = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.accept_invalid_certificates);

        client_builder = match () {
            #[cfg(feature = "native-tls")]
            () => client_builder.danger_accept_invalid_hostnames(config.accept_invalid_hostnames),
            #[cfg(not(feature = "native-tls"))]
            () => {
                warn!("Cannot change value of `accept_invalid_hostnames`: missing 'native-tls' feature");
                client_builder
            }
        };

        for c in &config.extra_root_certificates {
            let cert = match c.encoding {
                CertificateEncoding::Der => reqwest::Certificate::from_der(c.data.as_slice())?,
                CertificateEncoding::Pem => reqwest::Certificate::from_pem(c.data.as_slice())?,
            };
            client_builder = client_builder.add_root_certificate(cert);
        }

        Ok(Self {
            config,
            tokens: TokenCache::new(),
            client: client_builder.build()?,
        })
    }
}

impl Client {
    /// Create a new client with the supplied config
    pub fn new(config: ClientConfig) -> Self {
        Client::try_from(config.clone()).unwrap_or_else(|err| {
            warn!("Cannot create OCI client from config: {:?}", err);
            warn!("Creating client with default configuration");
            Self {
                config,
                tokens: TokenCache::new(),
                client: reqwest::Client::new(),
            }
        })
    }

    /// Pull the raw bytes of the manifest `image` points at.
    ///
    /// Returns the body exactly as served, together with the manifest
    /// digest (from the `Docker-Content-Digest` header, or computed from the
    /// body when the registry does not send one).
    pub async fn pull_manifest_raw(
        &mut self,
        image: &Reference,
        auth: &RegistryAuth,
    ) -> anyhow::Result<(Vec<u8>, String)> {
        if !self.tokens.contains_key(image) {
            self.auth(image, auth).await?;
        }

        let url = self.to_v2_manifest_url(image);
        debug!("Pulling image manifest from {}", url);

        let res = RequestBuilderWrapper::from_client(self, |client| client.get(&url))
            .apply_accept(MANIFEST_MEDIA_TYPES)?
            .apply_auth(image)?
            .into_request_builder()
            .send()
            .await?;

        // The OCI spec technically does not allow any codes but 200, 500, 401, and 404.
        // Obviously, HTTP servers are going to send other codes. This tries to catch the
        // obvious ones (200, 4XX, 5XX). Anything else is just treated as an error.
        match res.status() {
            reqwest::StatusCode::OK => {
                let headers = res.headers().clone();
                let body = res.bytes().await?.to_vec();
                let digest = digest_header_value(&headers, &body)?;
                trace!(%digest, size = body.len(), "Received manifest");
                Ok((body, digest))
            }
            reqwest::StatusCode::UNAUTHORIZED => {
                Err(anyhow!("Not authorized to pull manifest {}", url))
            }
            s if s.is_client_error() => Err(OciEnvelope::into_error(&res.text().await?, &url)),
            s if s.is_server_error() => Err(anyhow!("Server error at {}", url)),
            s => Err(anyhow!(
                "An unexpected error occured: code={}, message='{}'",
                s,
                res.text().await?
            )),
        }
    }

    /// Pull a single blob from an OCI registry and write it to `out`.
    ///
    /// The image reference is used to find the repository and the registry.
    /// It is not used to verify that the digest belongs to the image.
    pub async fn pull_blob<T: AsyncWrite + Unpin>(
        &mut self,
        image: &Reference,
        auth: &RegistryAuth,
        digest: &str,
        mut out: T,
    ) -> anyhow::Result<()> {
        let mut stream = self.pull_blob_stream(image, auth, digest).await?;
        while let Some(bytes) = stream.next().await {
            out.write_all(&bytes?).await?;
        }
        out.flush().await?;

        Ok(())
    }

    /// Start pulling a single blob and return its body as a stream of chunks.
    ///
    /// Chunks are only downloaded as the stream is polled. Dropping the stream
    /// closes the connection, leaving the rest of the blob unread.
    pub async fn pull_blob_stream(
        &mut self,
        image: &Reference,
        auth: &RegistryAuth,
        digest: &str,
    ) -> anyhow::Result<BoxStream<'static, anyhow::Result<Vec<u8>>>> {
        if !self.tokens.contains_key(image) {
            self.auth(image, auth).await?;
        }

        let url = self.to_v2_blob_url(image.resolve_registry(), image.repository(), digest);
        debug!("Pulling blob from {}", url);
        let res = RequestBuilderWrapper::from_client(self, |client| client.get(&url))
            .apply_auth(image)?
            .into_request_builder()
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return match status {
                reqwest::StatusCode::UNAUTHORIZED => {
                    Err(anyhow!("Not authorized to pull blob {}", url))
                }
                s if s.is_client_error() => {
                    Err(OciEnvelope::into_error(&res.text().await?, &url))
                }
                s => Err(anyhow!("Unexpected status {} pulling blob {}", s, url)),
            };
        }

        Ok(res
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(anyhow::Error::new))
            .boxed())
    }

    /// Perform an OAuth v2 auth request if necessary.
    ///
    /// This performs authorization and then stores the token internally to be used
    /// on other requests.
    async fn auth(&mut self, image: &Reference, authentication: &RegistryAuth) -> anyhow::Result<()> {
        debug!("Authorizing for image: {:?}", image);
        // The version request will tell us where to go.
        let url = format!(
            "{}://{}/v2/",
            self.config.protocol.scheme_for(image.resolve_registry()),
            image.resolve_registry()
        );
        debug!(?url);
        let res = self.client.get(&url).send().await?;
        let dist_hdr = match res.headers().get(reqwest::header::WWW_AUTHENTICATE) {
            Some(h) => h,
            None => return Ok(()),
        };

        let auth = WwwAuthenticate::parse_header(&dist_hdr.as_bytes().into())?;
        // If challenge_opt is not set it means that no challenge was present, even though the header
        // was present.
        let challenge_opt = match auth.get::<BearerChallenge>() {
            Some(co) => co,
            None => {
                // Fall back to HTTP Basic Auth
                match authentication {
                    RegistryAuth::Basic(username, password) => self.tokens.insert(
                        image,
                        RegistryTokenType::Basic(username.to_string(), password.to_string()),
                    ),
                    RegistryAuth::BasicToken(token) => self
                        .tokens
                        .insert(image, RegistryTokenType::BasicToken(token.to_string())),
                    RegistryAuth::Anonymous => {}
                }
                return Ok(());
            }
        };

        let scope = format!("repository:{}:pull", image.repository());
        let challenge = &challenge_opt[0];
        let realm = challenge
            .realm
            .as_ref()
            .ok_or_else(|| anyhow!("bearer challenge from {} has no realm", url))?;
        let service = challenge.service.as_ref();
        let mut query = vec![("scope", &scope)];

        if let Some(s) = service {
            query.push(("service", s))
        }

        debug!(?realm, ?service, ?scope, "Making authentication call");

        let auth_res = self
            .client
            .get(realm)
            .query(&query)
            .apply_authentication(authentication)
            .send()
            .await?;

        match auth_res.status() {
            reqwest::StatusCode::OK => {
                let text = auth_res.text().await?;
                let token: RegistryToken = serde_json::from_str(&text)
                    .context("Failed to decode registry token from auth request")?;
                debug!("Succesfully authorized for image '{:?}'", image);
                self.tokens.insert(image, RegistryTokenType::Bearer(token));
                Ok(())
            }
            _ => {
                let reason = auth_res.text().await?;
                debug!("Failed to authenticate for image '{:?}': {}", image, reason);
                Err(anyhow!("failed to authenticate: {}", reason))
            }
        }
    }

    /// Convert a Reference to a v2 manifest URL.
    fn to_v2_manifest_url(&self, reference: &Reference) -> String {
        let target = reference
            .digest()
            .or_else(|| reference.tag())
            .unwrap_or("latest");
        format!(
            "{}://{}/v2/{}/manifests/{}",
            self.config
                .protocol
                .scheme_for(reference.resolve_registry()),
            reference.resolve_registry(),
            reference.repository(),
            target,
        )
    }

    /// Convert a registry, repository and digest to a v2 blob (layer) URL.
    fn to_v2_blob_url(&self, registry: &str, repository: &str, digest: &str) -> String {
        format!(
            "{}://{}/v2/{}/blobs/{}",
            self.config.protocol.scheme_for(registry),
            registry,
            repository,
            digest,
        )
    }
}

/// The request builder wrapper allows to be instantiated from a
/// `Client` and allows composable operations on the request builder,
/// to produce a `RequestBuilder` object that can be executed.
struct RequestBuilderWrapper<'a> {
    client: &'a Client,
    request_builder: RequestBuilder,
}

impl<'a> RequestBuilderWrapper<'a> {
    fn from_client(
        client: &'a Client,
        f: impl Fn(&reqwest::Client) -> RequestBuilder,
    ) -> RequestBuilderWrapper<'a> {
        let request_builder = f(&client.client);
        RequestBuilderWrapper {
            client,
            request_builder,
        }
    }

    fn into_request_builder(self) -> RequestBuilder {
        self.request_builder
    }

    fn apply_accept(self, accept: &[&str]) -> anyhow::Result<RequestBuilderWrapper<'a>> {
        Ok(RequestBuilderWrapper {
            client: self.client,
            request_builder: self
                .request_builder
                .header("Accept", Vec::from(accept).join(", ")),
        })
    }

    /// Inserts the bearer token in an Authorization header, or configures
    /// HTTP basic auth, depending on what the handshake granted.
    fn apply_auth(self, image: &Reference) -> anyhow::Result<RequestBuilderWrapper<'a>> {
        let request_builder = match self.client.tokens.get(image) {
            Some(RegistryTokenType::Bearer(token)) => {
                debug!("Using bearer token authentication.");
                let mut headers = HeaderMap::new();
                headers.insert("Authorization", token.bearer_token().parse()?);
                self.request_builder.headers(headers)
            }
            Some(RegistryTokenType::Basic(username, password)) => {
                debug!("Using HTTP basic authentication.");
                self.request_builder
                    .basic_auth(username.to_string(), Some(password.to_string()))
            }
            Some(RegistryTokenType::BasicToken(token)) => {
                debug!("Using HTTP basic authentication with a pre-encoded token.");
                self.request_builder
                    .header(reqwest::header::AUTHORIZATION, format!("Basic {}", token))
            }
            None => self.request_builder,
        };
        Ok(RequestBuilderWrapper {
            client: self.client,
            request_builder,
        })
    }
}

/// The encoding of the certificate
#[derive(Debug, Clone)]
pub enum CertificateEncoding {
    #[allow(missing_docs)]
    Der,
    #[allow(missing_docs)]
    Pem,
}

/// A x509 certificate
#[derive(Debug, Clone)]
pub struct Certificate {
    /// Which encoding is used by the certificate
    pub encoding: CertificateEncoding,

    /// Actual certificate
    pub data: Vec<u8>,
}

/// A client configuration
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Which protocol the client should use
    pub protocol: ClientProtocol,

    /// Accept invalid hostname. Defaults to false
    pub accept_invalid_hostnames: bool,

    /// Accept invalid certificates. Defaults to false
    pub accept_invalid_certificates: bool,

    /// A list of extra root certificate to trust. This can be used to connect
    /// to servers using self-signed certificates
    pub extra_root_certificates: Vec<Certificate>,
}

/// The protocol that the client should use to connect
#[derive(Debug, Clone, PartialEq)]
pub enum ClientProtocol {
    #[allow(missing_docs)]
    Http,
    #[allow(missing_docs)]
    Https,
    /// Use HTTPS for every registry except the listed ones
    HttpsExcept(Vec<String>),
}

impl Default for ClientProtocol {
    fn default() -> Self {
        ClientProtocol::Https
    }
}

impl ClientProtocol {
    fn scheme_for(&self, registry: &str) -> &str {
        match self {
            ClientProtocol::Https => "https",
            ClientProtocol::Http => "http",
            ClientProtocol::HttpsExcept(exceptions) => {
                if exceptions.iter().any(|e| e == registry) {
                    "http"
                } else {
                    "https"
                }
            }
        }
    }
}

#[derive(Clone)]
struct BearerChallenge {
    pub realm: Option<String>,
    pub service: Option<String>,
    pub scope: Option<String>,
}

impl Challenge for BearerChallenge {
    fn challenge_name() -> &'static str {
        "Bearer"
    }

    fn from_raw(raw: RawChallenge) -> Option<Self> {
        match raw {
            RawChallenge::Token68(_) => None,
            RawChallenge::Fields(mut map) => Some(BearerChallenge {
                realm: map.remove("realm"),
                scope: map.remove("scope"),
                service: map.remove("service"),
            }),
        }
    }

    fn into_raw(self) -> RawChallenge {
        let mut map = ChallengeFields::new();
        if let Some(realm) = self.realm {
            map.insert_static_quoting("realm", realm);
        }
        if let Some(scope) = self.scope {
            map.insert_static_quoting("scope", scope);
        }
        if let Some(service) = self.service {
            map.insert_static_quoting("service", service);
        }
        RawChallenge::Fields(map)
    }
}

/// Extract the `Docker-Content-Digest` header from a manifest response,
/// falling back to hashing the manifest body (needed for ECR).
fn digest_header_value(headers: &HeaderMap, body: &[u8]) -> anyhow::Result<String> {
    match headers.get("Docker-Content-Digest") {
        None => {
            let digest = sha256_digest(body);
            debug!(%digest, "Computed digest of manifest payload.");
            Ok(digest)
        }
        Some(hv) => hv
            .to_str()
            .map(|s| s.to_string())
            .map_err(anyhow::Error::new),
    }
}

/// Computes the SHA256 digest of a byte slice
fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{:x}", sha2::Sha256::digest(bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    const DTK_IMAGE_TAG: &str = "quay.io/openshift/driver-toolkit:v4.12";
    const DTK_IMAGE_DIGEST: &str = "quay.io/openshift/driver-toolkit@sha256:51d9b231d5129e3ffc267c9d455c49d789bf3167b611a07ab6e4b3304c96b0e7";
    const DTK_IMAGE_TAG_AND_DIGEST: &str = "quay.io/openshift/driver-toolkit:v4.12@sha256:51d9b231d5129e3ffc267c9d455c49d789bf3167b611a07ab6e4b3304c96b0e7";

    fn reference(image: &str) -> Reference {
        Reference::try_from(image).expect("failed to parse reference")
    }

    #[test]
    fn test_apply_accept() -> Result<(), anyhow::Error> {
        let client = Client::default();
        assert_eq!(
            RequestBuilderWrapper::from_client(&client, |client| client
                .get("https://quay.io/v2/openshift/release/manifests/4.12"))
            .apply_accept(MANIFEST_MEDIA_TYPES)?
            .into_request_builder()
            .build()?
            .headers()["Accept"],
            MANIFEST_MEDIA_TYPES.join(", ")
        );

        Ok(())
    }

    #[test]
    fn test_apply_auth_no_token() -> Result<(), anyhow::Error> {
        let client = Client::default();
        assert!(!RequestBuilderWrapper::from_client(&client, |client| client
            .get("https://quay.io/v2/openshift/driver-toolkit/manifests/v4.12"))
        .apply_auth(&reference(DTK_IMAGE_TAG))?
        .into_request_builder()
        .build()?
        .headers()
        .contains_key("Authorization"));

        Ok(())
    }

    #[test]
    fn test_apply_auth_bearer_token() -> Result<(), anyhow::Error> {
        let mut client = Client::default();
        client.tokens.insert(
            &reference(DTK_IMAGE_TAG),
            RegistryTokenType::Bearer(RegistryToken::Token {
                token: "some-token".to_owned(),
            }),
        );

        // Any reference into the same repository reuses the token
        assert_eq!(
            RequestBuilderWrapper::from_client(&client, |client| client
                .get("https://quay.io/v2/openshift/driver-toolkit/blobs/sha256:1234"))
            .apply_auth(&reference(DTK_IMAGE_DIGEST))?
            .into_request_builder()
            .build()?
            .headers()["Authorization"],
            "Bearer some-token"
        );

        Ok(())
    }

    #[test]
    fn test_apply_auth_basic() -> Result<(), anyhow::Error> {
        let mut client = Client::default();
        client.tokens.insert(
            &reference(DTK_IMAGE_TAG),
            RegistryTokenType::Basic("user".to_owned(), "pass".to_owned()),
        );

        assert_eq!(
            RequestBuilderWrapper::from_client(&client, |client| client
                .get("https://quay.io/v2/openshift/driver-toolkit/manifests/v4.12"))
            .apply_auth(&reference(DTK_IMAGE_TAG))?
            .into_request_builder()
            .build()?
            .headers()["Authorization"],
            "Basic dXNlcjpwYXNz"
        );

        Ok(())
    }

    #[test]
    fn test_apply_auth_basic_token() -> Result<(), anyhow::Error> {
        let mut client = Client::default();
        client.tokens.insert(
            &reference(DTK_IMAGE_TAG),
            RegistryTokenType::BasicToken("abc".to_owned()),
        );

        assert_eq!(
            RequestBuilderWrapper::from_client(&client, |client| client
                .get("https://quay.io/v2/openshift/driver-toolkit/manifests/v4.12"))
            .apply_auth(&reference(DTK_IMAGE_TAG))?
            .into_request_builder()
            .build()?
            .headers()["Authorization"],
            "Basic abc"
        );

        Ok(())
    }

    #[test]
    fn test_to_v2_blob_url() {
        let image = reference(DTK_IMAGE_TAG);
        let blob_url = Client::default().to_v2_blob_url(
            image.registry(),
            image.repository(),
            "sha256:deadbeef",
        );
        assert_eq!(
            blob_url,
            "https://quay.io/v2/openshift/driver-toolkit/blobs/sha256:deadbeef"
        )
    }

    #[rstest]
    #[case(DTK_IMAGE_TAG, "https://quay.io/v2/openshift/driver-toolkit/manifests/v4.12")]
    #[case(DTK_IMAGE_DIGEST, "https://quay.io/v2/openshift/driver-toolkit/manifests/sha256:51d9b231d5129e3ffc267c9d455c49d789bf3167b611a07ab6e4b3304c96b0e7")]
    #[case(DTK_IMAGE_TAG_AND_DIGEST, "https://quay.io/v2/openshift/driver-toolkit/manifests/sha256:51d9b231d5129e3ffc267c9d455c49d789bf3167b611a07ab6e4b3304c96b0e7")]
    #[case("quay.io/openshift/driver-toolkit", "https://quay.io/v2/openshift/driver-toolkit/manifests/latest")]
    #[case("docker.io/library/busybox:1.36", "https://index.docker.io/v2/library/busybox/manifests/1.36")]
    fn test_to_v2_manifest(#[case] image: &str, #[case] expected_uri: &str) {
        assert_eq!(
            Client::default().to_v2_manifest_url(&reference(image)),
            expected_uri
        );
    }

    #[rstest]
    #[case(ClientProtocol::Http, "http")]
    #[case(ClientProtocol::Https, "https")]
    #[case(ClientProtocol::HttpsExcept(vec!["localhost:5000".to_owned()]), "http")]
    #[case(ClientProtocol::HttpsExcept(vec!["quay.io".to_owned()]), "https")]
    fn manifest_url_respects_protocol(#[case] protocol: ClientProtocol, #[case] scheme: &str) {
        let c = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });
        assert_eq!(
            format!("{}://localhost:5000/v2/dtk/manifests/v1", scheme),
            c.to_v2_manifest_url(&reference("localhost:5000/dtk:v1"))
        );
    }

    #[test]
    fn digest_falls_back_to_hashing_body() -> Result<(), anyhow::Error> {
        let body = b"hellobytes";
        assert_eq!(
            digest_header_value(&HeaderMap::new(), body)?,
            "sha256:fdbd95aafcbc814a2600fcc54c1e1706f52d2f9bf45cf53254f25bcd7599ce99"
        );

        let mut headers = HeaderMap::new();
        headers.insert("Docker-Content-Digest", "sha256:1234".parse()?);
        assert_eq!(digest_header_value(&headers, body)?, "sha256:1234");

        Ok(())
    }

    #[tokio::test]
    #[ignore] // requires network access
    async fn pull_manifest_and_blob_anonymously() {
        let image = reference("quay.io/libpod/busybox:latest");
        let mut c = Client::default();
        let (manifest, digest) = c
            .pull_manifest_raw(&image, &RegistryAuth::Anonymous)
            .await
            .expect("pull manifest should not fail");
        assert!(digest.starts_with("sha256:"));

        let versioned: serde_json::Value =
            serde_json::from_slice(&manifest).expect("manifest is JSON");
        assert_eq!(versioned["schemaVersion"], 2);

        let config_digest = versioned["config"]["digest"]
            .as_str()
            .expect("manifest has a config");
        let mut out: Vec<u8> = Vec::new();
        c.pull_blob(&image, &RegistryAuth::Anonymous, config_digest, &mut out)
            .await
            .expect("pull blob should not fail");
        assert!(!out.is_empty());
    }
}
