#![allow(dead_code)]

use std::{fs, path::Path, sync::Arc};

use axum::{body::Body, http::Request};
use routegate::{
    Anonymous, AppConfig, HandlerOutput, HandlerResult, Identity, IdentityState, StaticIdentity,
};
use tempfile::TempDir;
use url::Url;

/// Writes `contents` to `root/relative`, creating parent directories.
pub fn write_view(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A views directory with a layout, a few pages and the 404/403 error views.
pub fn views_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    write_view(root, "layout.html", "<main>{{ content }}</main>");
    write_view(root, "home.html", "<h1>Home</h1>");
    write_view(root, "user.html", "User {{ params.id }}");
    write_view(root, "login.html", "Please sign in");
    write_view(root, "errors/404.html", "Missing: {{ message }}");
    write_view(root, "errors/403.html", "Denied ({{ status }})");
    dir
}

pub fn config(views: &Path) -> AppConfig {
    AppConfig {
        views_dir: views.to_path_buf(),
        app_url: Some(Url::parse("https://app.test").unwrap()),
        ..AppConfig::default()
    }
}

pub fn anonymous() -> IdentityState {
    Arc::new(Anonymous)
}

pub fn signed_in(roles: &[&str]) -> IdentityState {
    Arc::new(StaticIdentity(Some(Identity::new("u-1", roles.iter().copied()))))
}

pub fn request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("host", "app.test")
        .body(Body::empty())
        .unwrap()
}

pub fn text(body: &str) -> HandlerResult {
    Ok(HandlerOutput::from(body))
}
