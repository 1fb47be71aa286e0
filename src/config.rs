use std::{env, path::PathBuf};

use url::Url;

use crate::{error::ConfigError, upload::DEFAULT_MAX_UPLOAD_BYTES};

/// AppConfig
///
/// Holds the router's entire configuration state. It is immutable once loaded
/// and shared by the dispatcher, the view renderer and the identity provider.
/// Everything is sourced from the environment (optionally seeded from a `.env`
/// file by the binary); nothing is read from configuration files.
#[derive(Clone, Debug)]
pub struct AppConfig {
    // Runtime environment marker. Controls the local identity bypass and log format.
    pub env: Env,
    // Base application URL used for outbound links. When absent, the current
    // request's scheme and host are used instead.
    pub app_url: Option<Url>,
    // Base URL for static assets. Falls back to `app_url`.
    pub asset_url: Option<Url>,
    // Debug mode: error responses carry the raw message as plain text.
    pub display_errors: bool,
    // Name of the route unauthenticated users are redirected to.
    pub security_route: Option<String>,
    // Root directory every view is resolved under.
    pub views_dir: PathBuf,
    // Logical name of the shared layout view.
    pub layout_view: String,
    // Permissive URL generation: unknown routes fall back to the origin root.
    pub url_fallback_to_root: bool,
    // Size ceiling for uploaded files, in bytes.
    pub upload_max_bytes: u64,
    // Destination directory for persisted uploads.
    pub upload_dir: PathBuf,
    // Secret used to validate bearer tokens.
    pub jwt_secret: String,
    // Socket address the binary listens on.
    pub bind_addr: String,
}

/// Env
///
/// Defines the runtime context. `Local` enables development conveniences such
/// as header-based identities; `Production` requires explicit secrets.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Env {
    Local,
    Production,
}

const LOCAL_JWT_SECRET: &str = "routegate-local-secret";

impl Default for AppConfig {
    /// Safe, non-panicking values, primarily used for test setup.
    fn default() -> Self {
        Self {
            env: Env::Local,
            app_url: None,
            asset_url: None,
            display_errors: false,
            security_route: None,
            views_dir: PathBuf::from("views"),
            layout_view: "layout".to_string(),
            url_fallback_to_root: false,
            upload_max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            upload_dir: PathBuf::from("uploads"),
            jwt_secret: LOCAL_JWT_SECRET.to_string(),
            bind_addr: "0.0.0.0:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// load
    ///
    /// Reads every setting from the environment. Unset variables fall back to
    /// the defaults above, except `JWT_SECRET`, which production requires.
    ///
    /// # Errors
    /// Returns a [`ConfigError`] for malformed URLs, booleans or sizes, and for
    /// missing production secrets, so the binary can fail fast at startup.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let env = match var("APP_ENV").as_deref() {
            Some("production") => Env::Production,
            _ => Env::Local,
        };

        let jwt_secret = match (env, var("JWT_SECRET")) {
            (_, Some(secret)) => secret,
            (Env::Production, None) => return Err(ConfigError::MissingVar("JWT_SECRET")),
            (Env::Local, None) => defaults.jwt_secret,
        };

        let upload_max_bytes = match var("UPLOAD_MAX_BYTES") {
            Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidVar {
                name: "UPLOAD_MAX_BYTES",
                reason: format!("'{raw}' is not a byte count"),
            })?,
            None => defaults.upload_max_bytes,
        };

        Ok(Self {
            env,
            app_url: url_var("APP_URL")?,
            asset_url: url_var("ASSET_URL")?,
            display_errors: bool_var("DISPLAY_ERRORS")?.unwrap_or(defaults.display_errors),
            security_route: var("SECURITY_ROUTE"),
            views_dir: var("VIEWS_DIR").map(PathBuf::from).unwrap_or(defaults.views_dir),
            layout_view: var("LAYOUT_VIEW").unwrap_or(defaults.layout_view),
            url_fallback_to_root: bool_var("URL_FALLBACK_TO_ROOT")?
                .unwrap_or(defaults.url_fallback_to_root),
            upload_max_bytes,
            upload_dir: var("UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            jwt_secret,
            bind_addr: var("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }

    /// The base URL assets are served from.
    pub fn asset_base(&self) -> Option<&Url> {
        self.asset_url.as_ref().or(self.app_url.as_ref())
    }
}

/// Parses an absolute URL, as required for every configured base URL.
pub fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    match Url::parse(raw) {
        Ok(url) if url.has_host() && !url.cannot_be_a_base() => Ok(url),
        _ => Err(ConfigError::InvalidBaseUrl(raw.to_string())),
    }
}

fn var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn url_var(name: &'static str) -> Result<Option<Url>, ConfigError> {
    var(name).map(|raw| parse_base_url(&raw)).transpose()
}

fn bool_var(name: &'static str) -> Result<Option<bool>, ConfigError> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(ConfigError::InvalidVar {
            name,
            reason: format!("'{raw}' is not a boolean"),
        }),
    }
}
