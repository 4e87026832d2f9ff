//! Secrets and their matching against security schemes
//!
//! A [SecurityScheme] only describes how a Thing expects to be authenticated, the secret itself
//! is a [Credentials] value kept in a [CredentialStore]. The store is keyed by URI prefix (or by
//! Thing id) and [resolve_credentials] picks the entry that applies to a target href.

use std::{collections::HashMap, fmt};

use serde::{Deserialize, Serialize};

use crate::thing::{SecurityScheme, SecuritySchemeSubtype};

/// A secret satisfying a security scheme
#[derive(Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credentials {
    Basic { username: String, password: String },
    Bearer { token: String },
    ApiKey { key: String },
}

impl Credentials {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    pub fn api_key(key: impl Into<String>) -> Self {
        Self::ApiKey { key: key.into() }
    }

    pub const fn kind(&self) -> CredentialsKind {
        match self {
            Self::Basic { .. } => CredentialsKind::Basic,
            Self::Bearer { .. } => CredentialsKind::Bearer,
            Self::ApiKey { .. } => CredentialsKind::ApiKey,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Self::Bearer { .. } => f
                .debug_struct("Bearer")
                .field("token", &"<redacted>")
                .finish(),
            Self::ApiKey { .. } => f
                .debug_struct("ApiKey")
                .field("key", &"<redacted>")
                .finish(),
        }
    }
}

/// The kind of a [Credentials] value, without the secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialsKind {
    Basic,
    Bearer,
    ApiKey,
}

impl fmt::Display for CredentialsKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Basic => "Basic",
            Self::Bearer => "Bearer",
            Self::ApiKey => "APIKey",
        };

        f.write_str(s)
    }
}

/// Errors raised while looking for the credentials of an interaction
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialsError {
    #[error("No credentials found for \"{href}\"")]
    NoCredentialsFound { href: String },

    /// The stored credentials cannot satisfy the security scheme
    #[error("Security scheme {scheme} expects {expected} credentials, found {actual}")]
    KindMismatch {
        scheme: String,
        expected: CredentialsKind,
        actual: CredentialsKind,
    },
}

/// Credentials keyed by URI prefix or Thing id
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct CredentialStore(HashMap<String, Credentials>);

impl CredentialStore {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `credentials` under `key`, returning the previous ones
    pub fn insert(&mut self, key: impl Into<String>, credentials: Credentials) -> Option<Credentials> {
        self.0.insert(key.into(), credentials)
    }

    #[inline]
    pub fn get(&self, key: &str) -> Option<&Credentials> {
        self.0.get(key)
    }

    #[inline]
    pub fn remove(&mut self, key: &str) -> Option<Credentials> {
        self.0.remove(key)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The credentials whose key is contained in `href`
    ///
    /// When more than one key matches, the longest one wins; ties go to the lexicographically
    /// smallest key.
    pub fn find_for_href(&self, href: &str) -> Option<&Credentials> {
        self.0
            .iter()
            .filter(|(key, _)| !key.is_empty() && href.contains(key.as_str()))
            .min_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)))
            .map(|(_, credentials)| credentials)
    }
}

impl FromIterator<(String, Credentials)> for CredentialStore {
    fn from_iter<T: IntoIterator<Item = (String, Credentials)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The credentials kind a scheme can be satisfied with
///
/// `None` means that the scheme does not need any secret (NoSec) or that the scheme carries its
/// secret out of band (PSK, certificates, proof of possession, public keys): in that case the
/// stored credentials are handed over unchecked.
pub fn expected_kind(scheme: &SecuritySchemeSubtype) -> Option<CredentialsKind> {
    match scheme {
        SecuritySchemeSubtype::Basic(_) | SecuritySchemeSubtype::Digest(_) => {
            Some(CredentialsKind::Basic)
        }
        SecuritySchemeSubtype::Bearer(_) | SecuritySchemeSubtype::OAuth2(_) => {
            Some(CredentialsKind::Bearer)
        }
        SecuritySchemeSubtype::ApiKey(_) => Some(CredentialsKind::ApiKey),
        SecuritySchemeSubtype::NoSec
        | SecuritySchemeSubtype::Psk(_)
        | SecuritySchemeSubtype::Cert(_)
        | SecuritySchemeSubtype::Pop(_)
        | SecuritySchemeSubtype::Public(_) => None,
    }
}

/// Find the credentials to use for `href` given the applicable `schemes`
///
/// The first scheme is authoritative. No schemes, or a NoSec first scheme, resolve to `None`
/// without looking at the store. When no key matches `href`, the credentials stored under
/// `thing_id` are used.
pub fn resolve_credentials(
    schemes: &[SecurityScheme],
    store: &CredentialStore,
    href: &str,
    thing_id: Option<&str>,
) -> Result<Option<Credentials>, CredentialsError> {
    let scheme = match schemes.first() {
        None => return Ok(None),
        Some(scheme) if scheme.subtype == SecuritySchemeSubtype::NoSec => return Ok(None),
        Some(scheme) => &scheme.subtype,
    };

    let credentials = store
        .find_for_href(href)
        .or_else(|| thing_id.and_then(|id| store.get(id)))
        .ok_or_else(|| CredentialsError::NoCredentialsFound {
            href: href.to_owned(),
        })?;

    match expected_kind(scheme) {
        Some(expected) if expected != credentials.kind() => Err(CredentialsError::KindMismatch {
            scheme: scheme.to_string(),
            expected,
            actual: credentials.kind(),
        }),
        _ => Ok(Some(credentials.clone())),
    }
}
