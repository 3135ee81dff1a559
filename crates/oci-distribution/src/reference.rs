use std::convert::TryFrom;
use std::error::Error;
use std::fmt;
use std::str::FromStr;

/// NAME_TOTAL_LENGTH_MAX is the maximum total number of characters in a repository name.
const NAME_TOTAL_LENGTH_MAX: usize = 255;

const DOCKER_HUB_REGISTRY: &str = "docker.io";
const DOCKER_HUB_API_ENDPOINT: &str = "index.docker.io";

/// Errors produced while parsing a [`Reference`].
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The digest part is not of the form `algorithm:hex`
    DigestInvalidFormat,
    /// The repository part is empty
    NameEmpty,
    /// The repository part is longer than allowed
    NameTooLong,
    /// The reference does not contain a registry and a repository
    ReferenceInvalidFormat,
    /// The tag part is empty
    TagInvalidFormat,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::DigestInvalidFormat => write!(f, "invalid digest format"),
            ParseError::NameEmpty => write!(f, "repository name must have at least one component"),
            ParseError::NameTooLong => write!(
                f,
                "repository name must not be more than {} characters",
                NAME_TOTAL_LENGTH_MAX
            ),
            ParseError::ReferenceInvalidFormat => write!(f, "invalid reference format"),
            ParseError::TagInvalidFormat => write!(f, "invalid tag format"),
        }
    }
}

impl Error for ParseError {}

/// A fully qualified pointer to an image manifest or blob in an OCI registry.
///
/// # Examples
///
/// ```
/// use oci_distribution::Reference;
///
/// let reference: Reference = "quay.io/openshift/driver-toolkit:v4.12".parse().unwrap();
///
/// assert_eq!("quay.io", reference.registry());
/// assert_eq!("openshift/driver-toolkit", reference.repository());
/// assert_eq!(Some("v4.12"), reference.tag());
/// assert_eq!(None, reference.digest());
/// ```
#[derive(Clone, Hash, PartialEq, Eq)]
pub struct Reference {
    registry: String,
    repository: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl Reference {
    /// registry returns the name of the registry, including any port.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// resolve_registry returns the host that serves the registry API.
    ///
    /// Docker Hub is addressed as `docker.io` in references but served from
    /// `index.docker.io`.
    pub fn resolve_registry(&self) -> &str {
        match self.registry.as_str() {
            DOCKER_HUB_REGISTRY => DOCKER_HUB_API_ENDPOINT,
            registry => registry,
        }
    }

    /// repository returns the name of the repository.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// tag returns the object's tag, if present.
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// digest returns the object's digest, if present.
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// whole returns the whole reference.
    pub fn whole(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(t) = self.tag() {
            s.push(':');
            s.push_str(t);
        }
        if let Some(d) = self.digest() {
            s.push('@');
            s.push_str(d);
        }
        s
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.whole())
    }
}

impl FromStr for Reference {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Reference::try_from(s)
    }
}

impl TryFrom<&str> for Reference {
    type Error = ParseError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let (registry, rest) = s
            .split_once('/')
            .ok_or(ParseError::ReferenceInvalidFormat)?;
        if registry.is_empty() {
            return Err(ParseError::ReferenceInvalidFormat);
        }

        let (name, digest) = match rest.split_once('@') {
            Some((name, digest)) => {
                match digest.split_once(':') {
                    Some((algorithm, hex)) if !algorithm.is_empty() && !hex.is_empty() => {}
                    _ => return Err(ParseError::DigestInvalidFormat),
                }
                (name, Some(digest.to_owned()))
            }
            None => (rest, None),
        };

        // Only a colon in the last path component separates a tag
        let tag_start = name
            .rfind(':')
            .filter(|colon| name[*colon..].find('/').is_none());
        let (repository, tag) = match tag_start {
            Some(colon) => {
                let tag = &name[colon + 1..];
                if tag.is_empty() {
                    return Err(ParseError::TagInvalidFormat);
                }
                (&name[..colon], Some(tag.to_owned()))
            }
            None => (name, None),
        };

        if repository.is_empty() {
            return Err(ParseError::NameEmpty);
        }
        if repository.len() > NAME_TOTAL_LENGTH_MAX {
            return Err(ParseError::NameTooLong);
        }

        Ok(Reference {
            registry: registry.to_owned(),
            repository: repository.to_owned(),
            tag,
            digest,
        })
    }
}

impl TryFrom<String> for Reference {
    type Error = ParseError;

    fn try_from(string: String) -> Result<Self, Self::Error> {
        Reference::try_from(string.as_str())
    }
}

impl From<Reference> for String {
    fn from(reference: Reference) -> Self {
        reference.whole()
    }
}
