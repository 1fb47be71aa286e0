use std::{collections::BTreeSet, sync::Arc};

use async_trait::async_trait;
use axum::http::{header, request::Parts};
use jsonwebtoken::{DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::config::{AppConfig, Env};

/// Claims
///
/// The payload expected inside a bearer token. `roles` is optional so tokens
/// issued for plain authentication still decode.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the user's identifier.
    pub sub: String,
    /// Expiration Time (exp): tokens past this timestamp are rejected.
    pub exp: usize,
    /// Issued At (iat).
    pub iat: usize,
    /// Roles held by the subject.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Identity
///
/// The resolved identity of an authenticated request. The router never
/// creates or mutates one; it only reads what the provider hands it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub id: String,
    pub roles: BTreeSet<String>,
}

impl Identity {
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    /// True when at least one of `required` is held by this identity.
    pub fn has_any_role(&self, required: &BTreeSet<String>) -> bool {
        !self.roles.is_disjoint(required)
    }
}

/// IdentityProvider
///
/// Answers "who is making this request". Injected into the router so the
/// authorization gate never reaches for global session state.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn identify(&self, parts: &Parts) -> Option<Identity>;
}

/// The shared handle the router keeps to its identity provider.
pub type IdentityState = Arc<dyn IdentityProvider>;

/// A provider that never recognizes anyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl IdentityProvider for Anonymous {
    async fn identify(&self, _parts: &Parts) -> Option<Identity> {
        None
    }
}

/// A provider that returns the same identity for every request.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(pub Option<Identity>);

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn identify(&self, _parts: &Parts) -> Option<Identity> {
        self.0.clone()
    }
}

/// JwtIdentityProvider
///
/// Resolves identities from `Authorization: Bearer <jwt>` headers signed with
/// the configured secret.
///
/// In `Env::Local`, an `x-user-id` header (with optional comma-separated
/// `x-user-roles`) is accepted instead of a token to speed up development.
/// Production ignores those headers entirely.
#[derive(Clone)]
pub struct JwtIdentityProvider {
    decoding_key: DecodingKey,
    env: Env,
}

impl JwtIdentityProvider {
    pub fn new(secret: &str, env: Env) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            env,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.env)
    }

    fn local_bypass(parts: &Parts) -> Option<Identity> {
        let id = parts.headers.get("x-user-id")?.to_str().ok()?.trim();
        if id.is_empty() {
            return None;
        }
        let roles = parts
            .headers
            .get("x-user-roles")
            .and_then(|value| value.to_str().ok())
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|role| !role.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Some(Identity {
            id: id.to_string(),
            roles,
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtIdentityProvider {
    async fn identify(&self, parts: &Parts) -> Option<Identity> {
        if self.env == Env::Local {
            if let Some(identity) = Self::local_bypass(parts) {
                return Some(identity);
            }
        }

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())?
            .strip_prefix("Bearer ")?;

        let mut validation = Validation::default();
        validation.validate_exp = true;

        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Some(Identity::new(data.claims.sub, data.claims.roles)),
            Err(e) => {
                match e.kind() {
                    ErrorKind::ExpiredSignature => tracing::debug!("rejected expired bearer token"),
                    kind => tracing::debug!(?kind, "rejected bearer token"),
                }
                None
            }
        }
    }
}
