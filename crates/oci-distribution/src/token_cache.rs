use crate::reference::Reference;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

/// A token granted during the OAuth2-like workflow for OCI registries.
#[derive(Deserialize, Clone)]
#[serde(untagged)]
#[serde(rename_all = "snake_case")]
pub(crate) enum RegistryToken {
    Token { token: String },
    AccessToken { access_token: String },
}

pub(crate) enum RegistryTokenType {
    Bearer(RegistryToken),
    Basic(String, String),
    BasicToken(String),
}

impl RegistryToken {
    pub fn bearer_token(&self) -> String {
        format!("Bearer {}", self.token())
    }

    pub fn token(&self) -> &str {
        match self {
            RegistryToken::Token { token } => token,
            RegistryToken::AccessToken { access_token } => access_token,
        }
    }
}

/// Tokens granted to a single [`Client`](crate::Client), keyed by registry
/// and repository. A client only ever pulls, so the scope is implied.
#[derive(Default)]
pub(crate) struct TokenCache {
    tokens: BTreeMap<(String, String), RegistryTokenType>,
}

impl TokenCache {
    pub(crate) fn new() -> Self {
        TokenCache {
            tokens: BTreeMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, reference: &Reference, token: RegistryTokenType) {
        let registry = reference.resolve_registry().to_string();
        let repository = reference.repository().to_string();
        debug!(%registry, %repository, "Inserting token");
        self.tokens.insert((registry, repository), token);
    }

    pub(crate) fn get(&self, reference: &Reference) -> Option<&RegistryTokenType> {
        let key = (
            reference.resolve_registry().to_string(),
            reference.repository().to_string(),
        );
        let token = self.tokens.get(&key);
        debug!(registry = %key.0, repository = %key.1, miss = token.is_none(), "Fetching token");
        token
    }

    pub(crate) fn contains_key(&self, reference: &Reference) -> bool {
        self.get(reference).is_some()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::convert::TryFrom;

    #[test]
    fn test_registry_token_deserialize() {
        let rt: RegistryToken = serde_json::from_str(r#"{"token": "abc"}"#).expect("token");
        assert_eq!(rt.token(), "abc");

        let rt: RegistryToken =
            serde_json::from_str(r#"{"access_token": "xyz"}"#).expect("access token");
        assert_eq!(rt.token(), "xyz");

        // 'token' takes precedence when both are present
        let rt: RegistryToken =
            serde_json::from_str(r#"{"access_token": "xyz", "token": "abc"}"#).expect("both");
        assert_eq!(rt.token(), "abc");

        let rt: RegistryToken =
            serde_json::from_str(r#"{"access_token": "xyz", "token": 300}"#).expect("mixed");
        assert_eq!(rt.token(), "xyz");

        assert!(serde_json::from_str::<RegistryToken>(r#"{"token": 300}"#).is_err());
        assert!(serde_json::from_str::<RegistryToken>(r#"{"some": "thing"}"#).is_err());
        assert!(serde_json::from_str::<RegistryToken>(r#"{"token": "abc""#).is_err());
    }

    #[test]
    fn tokens_are_scoped_to_repository() {
        let release = Reference::try_from("quay.io/openshift/release:4.12").expect("reference");
        let dtk = Reference::try_from("quay.io/openshift/driver-toolkit:4.12").expect("reference");
        let mut cache = TokenCache::new();
        cache.insert(
            &release,
            RegistryTokenType::Bearer(RegistryToken::Token {
                token: "abc".to_owned(),
            }),
        );

        assert!(cache.contains_key(&release));
        let pinned =
            Reference::try_from("quay.io/openshift/release@sha256:1234").expect("reference");
        assert!(cache.contains_key(&pinned));
        assert!(!cache.contains_key(&dtk));
    }
}
