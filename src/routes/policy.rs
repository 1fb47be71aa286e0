use std::collections::BTreeSet;

use crate::{
    auth::Identity,
    error::{ConfigError, DispatchError, UrlError},
};

/// AccessPolicy
///
/// Declarative access requirements attached to a route. The default policy is
/// unrestricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessPolicy {
    /// The request must carry an authenticated identity.
    pub require_auth: bool,
    /// The identity must hold at least one of these roles.
    pub required_roles: BTreeSet<String>,
}

impl AccessPolicy {
    /// A policy that only requires an authenticated identity.
    pub fn authenticated() -> Self {
        Self {
            require_auth: true,
            required_roles: BTreeSet::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_roles.extend(roles.into_iter().map(Into::into));
        self
    }

    pub fn is_unrestricted(&self) -> bool {
        !self.require_auth && self.required_roles.is_empty()
    }

    /// Rejects role names that could never match a real identity.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self
            .required_roles
            .iter()
            .find(|role| role.is_empty() || role.chars().any(char::is_whitespace))
        {
            Some(role) => Err(ConfigError::InvalidRole(role.clone())),
            None => Ok(()),
        }
    }
}

/// The gate's verdict when it does not fail the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Access {
    Granted,
    /// Stop processing and send the client to the login page.
    Redirect(String),
}

/// authorize
///
/// Checks `policy` against the current identity. Authentication is checked
/// before roles. When authentication is missing and `security_route` names a
/// login route, `login_url` builds the redirect target for it.
pub fn authorize<F>(
    policy: &AccessPolicy,
    identity: Option<&Identity>,
    security_route: Option<&str>,
    login_url: F,
) -> Result<Access, DispatchError>
where
    F: FnOnce(&str) -> Result<String, UrlError>,
{
    if policy.require_auth && identity.is_none() {
        return match security_route {
            Some(route) => Ok(Access::Redirect(login_url(route)?)),
            None => Err(DispatchError::unauthorized(
                "authentication required but no security route defined",
            )),
        };
    }

    if !policy.required_roles.is_empty() {
        let allowed = identity.is_some_and(|identity| identity.has_any_role(&policy.required_roles));
        if !allowed {
            return Err(DispatchError::forbidden("insufficient role for this route"));
        }
    }

    Ok(Access::Granted)
}
