//! Types for working with registry access secrets
use std::fmt;

/// A method for authenticating to a registry
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryAuth {
    /// Access the registry anonymously
    Anonymous,
    /// Access the registry using HTTP Basic authentication
    Basic(String, String),
    /// Access the registry using HTTP Basic authentication with an already
    /// encoded token, sent as is
    BasicToken(String),
}

impl RegistryAuth {
    /// Returns true when no credentials will be sent to the registry.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, RegistryAuth::Anonymous)
    }
}

// Passwords must never end up in logs.
impl fmt::Debug for RegistryAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryAuth::Anonymous => write!(f, "Anonymous"),
            RegistryAuth::Basic(username, _) => write!(f, "Basic({}, <redacted>)", username),
            RegistryAuth::BasicToken(_) => write!(f, "BasicToken(<redacted>)"),
        }
    }
}

pub(crate) trait Authenticable {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self;
}

impl Authenticable for reqwest::RequestBuilder {
    fn apply_authentication(self, auth: &RegistryAuth) -> Self {
        match auth {
            RegistryAuth::Anonymous => self,
            RegistryAuth::Basic(username, password) => self.basic_auth(username, Some(password)),
            RegistryAuth::BasicToken(token) => {
                self.header(reqwest::header::AUTHORIZATION, format!("Basic {}", token))
            }
        }
    }
}
