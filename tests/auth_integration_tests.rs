use std::{collections::BTreeSet, time::SystemTime};

use axum::http::{Method, Request, StatusCode, Uri, header, request::Parts};
use jsonwebtoken::{EncodingKey, Header, encode};
use routegate::{
    AccessPolicy, DispatchError, Env, Identity, IdentityProvider, JwtIdentityProvider, UrlError,
    auth::Claims,
    routes::{Access, authorize},
};

// --- Helper Functions ---

const TEST_JWT_SECRET: &str = "test-secret-value-1234567890";
const TEST_USER_ID: &str = "user-0001";

fn now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Signs a token for `sub` expiring at `exp` (seconds since the epoch).
fn create_token(secret: &str, roles: &[&str], exp: u64) -> String {
    let claims = Claims {
        sub: TEST_USER_ID.to_string(),
        iat: now() as usize,
        exp: exp as usize,
        roles: roles.iter().map(|role| role.to_string()).collect(),
    };
    let key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), &claims, &key).unwrap()
}

/// Helper to get the Parts struct from a generated Request
fn get_request_parts(method: Method, uri: Uri) -> Parts {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    let (parts, _) = request.into_parts();
    parts
}

fn with_bearer(token: &str) -> Parts {
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert(
        header::AUTHORIZATION,
        header::HeaderValue::from_str(&format!("Bearer {}", token)).unwrap(),
    );
    parts
}

fn with_bypass_headers() -> Parts {
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts.headers.insert("x-user-id", "dev-user".parse().unwrap());
    parts.headers.insert("x-user-roles", "admin, editor,".parse().unwrap());
    parts
}

// --- Identity provider ---

#[tokio::test]
async fn test_valid_jwt_resolves_identity_with_roles() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Production);
    let token = create_token(TEST_JWT_SECRET, &["admin"], now() + 3600);

    let identity = provider.identify(&with_bearer(&token)).await.unwrap();
    assert_eq!(identity, Identity::new(TEST_USER_ID, ["admin"]));
}

#[tokio::test]
async fn test_missing_header_is_anonymous() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Production);
    let parts = get_request_parts(Method::GET, "/".parse().unwrap());
    assert!(provider.identify(&parts).await.is_none());
}

#[tokio::test]
async fn test_wrong_secret_is_anonymous() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Production);
    let token = create_token("some-other-secret", &[], now() + 3600);
    assert!(provider.identify(&with_bearer(&token)).await.is_none());
}

#[tokio::test]
async fn test_expired_jwt_is_anonymous() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Production);
    // Well past the validation leeway.
    let token = create_token(TEST_JWT_SECRET, &[], now() - 3600);
    assert!(provider.identify(&with_bearer(&token)).await.is_none());
}

#[tokio::test]
async fn test_malformed_authorization_is_anonymous() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Production);
    let mut parts = get_request_parts(Method::GET, "/".parse().unwrap());
    parts
        .headers
        .insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());
    assert!(provider.identify(&parts).await.is_none());
}

#[tokio::test]
async fn test_local_bypass_headers() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Local);
    let identity = provider.identify(&with_bypass_headers()).await.unwrap();
    assert_eq!(identity.id, "dev-user");
    assert_eq!(
        identity.roles,
        BTreeSet::from(["admin".to_string(), "editor".to_string()])
    );
}

#[tokio::test]
async fn test_bypass_headers_ignored_in_production() {
    let provider = JwtIdentityProvider::new(TEST_JWT_SECRET, Env::Production);
    assert!(provider.identify(&with_bypass_headers()).await.is_none());
}

// --- Authorization gate ---

fn login_url(route: &str) -> Result<String, UrlError> {
    Ok(format!("https://app.test/{route}"))
}

#[test]
fn test_unrestricted_policy_grants_anyone() {
    let access = authorize(&AccessPolicy::default(), None, None, login_url).unwrap();
    assert_eq!(access, Access::Granted);
    assert!(AccessPolicy::default().is_unrestricted());
}

#[test]
fn test_missing_identity_redirects_when_login_route_is_known() {
    let access = authorize(&AccessPolicy::authenticated(), None, Some("login"), login_url).unwrap();
    assert_eq!(access, Access::Redirect("https://app.test/login".to_string()));
}

#[test]
fn test_missing_identity_without_login_route_is_unauthorized() {
    let err = authorize(&AccessPolicy::authenticated(), None, None, login_url).unwrap_err();
    assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    assert!(matches!(err, DispatchError::Unauthorized(_)));
}

#[test]
fn test_login_url_failure_propagates() {
    let err = authorize(&AccessPolicy::authenticated(), None, Some("missing"), |route| {
        Err(UrlError::RouteNotFound(route.to_string()))
    })
    .unwrap_err();
    assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[test]
fn test_roles_require_any_match() {
    let policy = AccessPolicy::authenticated().with_roles(["admin", "owner"]);
    let editor = Identity::new("u-1", ["editor"]);
    let owner = Identity::new("u-2", ["editor", "owner"]);

    let err = authorize(&policy, Some(&editor), Some("login"), login_url).unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
    assert_eq!(err.to_string(), "insufficient role for this route");

    assert_eq!(
        authorize(&policy, Some(&owner), Some("login"), login_url).unwrap(),
        Access::Granted
    );
}

#[test]
fn test_roles_without_identity_is_forbidden() {
    let policy = AccessPolicy::default().with_roles(["admin"]);
    let err = authorize(&policy, None, Some("login"), login_url).unwrap_err();
    assert_eq!(err.status(), StatusCode::FORBIDDEN);
}
