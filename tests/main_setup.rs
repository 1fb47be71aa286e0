use routegate::{AppConfig, ConfigError, config::Env};
use serial_test::serial;
use std::{env, panic, path::PathBuf};

// Every variable AppConfig::load reads.
const CONFIG_VARS: [&str; 12] = [
    "APP_ENV",
    "APP_URL",
    "ASSET_URL",
    "DISPLAY_ERRORS",
    "SECURITY_ROUTE",
    "VIEWS_DIR",
    "LAYOUT_VIEW",
    "URL_FALLBACK_TO_ROOT",
    "UPLOAD_MAX_BYTES",
    "UPLOAD_DIR",
    "JWT_SECRET",
    "BIND_ADDR",
];

// --- Setup/Teardown Utilities ---

/// Runs `test` with exactly `vars` set (all other config variables cleared)
/// and restores the environment afterward.
fn run_with_env<T, R>(vars: &[(&'static str, &str)], test: T) -> R
where
    T: FnOnce() -> R + panic::UnwindSafe,
{
    // Save current environment variables
    let originals: Vec<(&str, Option<String>)> = CONFIG_VARS
        .iter()
        .map(|&var| (var, env::var(var).ok()))
        .collect();

    unsafe {
        for var in CONFIG_VARS {
            env::remove_var(var);
        }
        for (key, value) in vars {
            env::set_var(key, value);
        }
    }

    let result = panic::catch_unwind(test);

    // Restore original environment variables
    for (key, original_value) in originals.into_iter().rev() {
        unsafe {
            if let Some(val) = original_value {
                env::set_var(key, val);
            } else {
                env::remove_var(key);
            }
        }
    }

    // Re-panic if the test failed
    match result {
        Ok(value) => value,
        Err(e) => panic::resume_unwind(e),
    }
}

// --- Tests ---

#[test]
#[serial]
fn test_app_config_production_fail_fast() {
    let result = run_with_env(&[("APP_ENV", "production")], AppConfig::load);
    assert_eq!(result.unwrap_err(), ConfigError::MissingVar("JWT_SECRET"));
}

#[test]
#[serial]
fn test_app_config_production_with_secret() {
    let config = run_with_env(
        &[
            ("APP_ENV", "production"),
            ("JWT_SECRET", "prod-secret"),
            ("APP_URL", "https://example.com/app"),
        ],
        AppConfig::load,
    )
    .unwrap();

    assert_eq!(config.env, Env::Production);
    assert_eq!(config.jwt_secret, "prod-secret");
    assert_eq!(config.app_url.unwrap().as_str(), "https://example.com/app");
}

#[test]
#[serial]
fn test_app_config_local_env_defaults() {
    let config = run_with_env(&[("APP_ENV", "local")], AppConfig::load).unwrap();

    assert_eq!(config.env, Env::Local);
    assert!(config.app_url.is_none());
    assert!(config.asset_base().is_none());
    assert!(!config.display_errors);
    assert!(!config.url_fallback_to_root);
    assert!(config.security_route.is_none());
    assert_eq!(config.views_dir, PathBuf::from("views"));
    assert_eq!(config.layout_view, "layout");
    assert_eq!(config.upload_max_bytes, 2_000_000);
    assert_eq!(config.upload_dir, PathBuf::from("uploads"));
    assert_eq!(config.bind_addr, "0.0.0.0:3000");
    // Check local JWT secret fallback
    assert_eq!(config.jwt_secret, "routegate-local-secret");
}

#[test]
#[serial]
fn test_app_config_reads_overrides() {
    let config = run_with_env(
        &[
            ("APP_URL", "https://app.example"),
            ("ASSET_URL", "https://cdn.example/static"),
            ("DISPLAY_ERRORS", "yes"),
            ("URL_FALLBACK_TO_ROOT", "1"),
            ("SECURITY_ROUTE", "login"),
            ("LAYOUT_VIEW", "shell"),
            ("UPLOAD_MAX_BYTES", "1024"),
        ],
        AppConfig::load,
    )
    .unwrap();

    assert!(config.display_errors);
    assert!(config.url_fallback_to_root);
    assert_eq!(config.security_route.as_deref(), Some("login"));
    assert_eq!(config.layout_view, "shell");
    assert_eq!(config.upload_max_bytes, 1024);
    assert_eq!(config.asset_base().unwrap().as_str(), "https://cdn.example/static");
}

#[test]
#[serial]
fn test_app_config_rejects_invalid_values() {
    let result = run_with_env(&[("APP_URL", "not a url")], AppConfig::load);
    assert!(matches!(result, Err(ConfigError::InvalidBaseUrl(_))));

    let result = run_with_env(&[("DISPLAY_ERRORS", "maybe")], AppConfig::load);
    assert!(matches!(
        result,
        Err(ConfigError::InvalidVar { name: "DISPLAY_ERRORS", .. })
    ));

    let result = run_with_env(&[("UPLOAD_MAX_BYTES", "2MB")], AppConfig::load);
    assert!(matches!(
        result,
        Err(ConfigError::InvalidVar { name: "UPLOAD_MAX_BYTES", .. })
    ));
}
