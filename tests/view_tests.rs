mod common;

use axum::http::{HeaderMap, HeaderValue, header};
use common::{views_dir, write_view};
use minijinja::context;
use routegate::{
    ConfigError, ViewError,
    views::{ViewRenderer, ViewResolver, is_ajax},
};

// --- Resolver ---

#[test]
fn test_resolves_nested_view_inside_root() {
    let views = views_dir();
    let resolver = ViewResolver::new(views.path()).unwrap();

    let path = resolver.resolve("errors/404").unwrap();
    assert!(path.starts_with(resolver.root()));
    assert!(path.ends_with("errors/404.html"));
}

#[test]
fn test_resolution_is_idempotent() {
    let views = views_dir();
    let resolver = ViewResolver::new(views.path()).unwrap();
    assert_eq!(resolver.resolve("home").unwrap(), resolver.resolve("home").unwrap());
}

#[test]
fn test_traversal_is_rejected() {
    let views = views_dir();
    let resolver = ViewResolver::new(views.path()).unwrap();
    for name in ["../secret", "errors/../../secret", "..\\secret", "/etc/passwd", "\\windows"] {
        assert!(
            matches!(resolver.resolve(name), Err(ViewError::PathEscape(_))),
            "{name} should escape"
        );
    }
}

#[test]
fn test_null_byte_is_invalid_input() {
    let views = views_dir();
    let resolver = ViewResolver::new(views.path()).unwrap();
    assert!(matches!(resolver.resolve("home\0"), Err(ViewError::InvalidInput(_))));
}

#[test]
fn test_missing_or_non_file_views_are_not_readable() {
    let views = views_dir();
    std::fs::create_dir_all(views.path().join("folder.html")).unwrap();
    let resolver = ViewResolver::new(views.path()).unwrap();

    for name in ["nope", "folder", "", "   "] {
        assert!(
            matches!(resolver.resolve(name), Err(ViewError::NotReadable(_))),
            "{name:?} should be unreadable"
        );
    }
}

#[cfg(unix)]
#[test]
fn test_symlink_out_of_root_is_rejected() {
    let views = views_dir();
    let elsewhere = tempfile::tempdir().unwrap();
    let target = elsewhere.path().join("leak.html");
    std::fs::write(&target, "leaked").unwrap();
    std::os::unix::fs::symlink(&target, views.path().join("leak.html")).unwrap();

    let resolver = ViewResolver::new(views.path()).unwrap();
    assert!(matches!(resolver.resolve("leak"), Err(ViewError::PathEscape(_))));
}

#[cfg(unix)]
#[test]
fn test_dangling_symlink_is_classified_by_its_target() {
    let views = views_dir();
    let elsewhere = tempfile::tempdir().unwrap();
    std::os::unix::fs::symlink(
        elsewhere.path().join("gone.html"),
        views.path().join("outward.html"),
    )
    .unwrap();
    std::os::unix::fs::symlink(views.path().join("gone.html"), views.path().join("inward.html"))
        .unwrap();

    let resolver = ViewResolver::new(views.path()).unwrap();
    assert!(matches!(resolver.resolve("outward"), Err(ViewError::PathEscape(_))));
    assert!(matches!(resolver.resolve("inward"), Err(ViewError::NotReadable(_))));
}

#[test]
fn test_missing_root_is_config_error() {
    let views = views_dir();
    let missing = views.path().join("missing");
    assert!(matches!(
        ViewResolver::new(&missing),
        Err(ConfigError::InvalidViewsDir(_))
    ));

    // A file is not a views root either.
    let file = views.path().join("home.html");
    assert!(matches!(ViewResolver::new(&file), Err(ConfigError::InvalidViewsDir(_))));
}

// --- Renderer ---

fn renderer(root: &std::path::Path) -> ViewRenderer {
    ViewRenderer::new(ViewResolver::new(root).unwrap(), "layout")
}

#[test]
fn test_render_page_wraps_in_layout_unless_ajax() {
    let views = views_dir();
    let renderer = renderer(views.path());
    let env = renderer.environment();

    let full = renderer
        .render_page(&env, "user", context! { params => context! { id => 7 } }, false)
        .unwrap();
    assert_eq!(full, "<main>User 7</main>");

    let bare = renderer
        .render_page(&env, "user", context! { params => context! { id => 7 } }, true)
        .unwrap();
    assert_eq!(bare, "User 7");
}

#[test]
fn test_variables_are_escaped_but_layout_content_is_not() {
    let views = views_dir();
    write_view(views.path(), "greeting.html", "<p>{{ name }}</p>");
    let renderer = renderer(views.path());
    let env = renderer.environment();

    let page = renderer
        .render_page(&env, "greeting", context! { name => "<script>" }, false)
        .unwrap();
    assert_eq!(page, "<main><p>&lt;script&gt;</p></main>");
}

#[test]
fn test_includes_go_through_the_resolver() {
    let views = views_dir();
    write_view(views.path(), "partials/nav.html", "[nav]");
    write_view(views.path(), "with_nav.html", "{% include 'partials/nav.html' %} body");
    let renderer = renderer(views.path());
    let env = renderer.environment();

    assert_eq!(
        renderer.render(&env, "with_nav", context! {}).unwrap(),
        "[nav] body"
    );
}

#[test]
fn test_include_traversal_fails_to_render() {
    let views = views_dir();
    write_view(views.path(), "sneaky.html", "{% include '../outside.html' %}");
    let renderer = renderer(views.path());
    let env = renderer.environment();

    assert!(matches!(
        renderer.render(&env, "sneaky", context! {}),
        Err(ViewError::Render { .. })
    ));
}

#[test]
fn test_missing_layout_is_reported() {
    let views = tempfile::tempdir().unwrap();
    write_view(views.path(), "home.html", "Home");
    let renderer = renderer(views.path());
    let env = renderer.environment();

    let err = renderer.render_page(&env, "home", context! {}, false).unwrap_err();
    assert_eq!(err.to_string(), "layout view 'layout' not found");
}

// --- AJAX detection ---

#[test]
fn test_is_ajax_detection() {
    let mut headers = HeaderMap::new();
    assert!(!is_ajax(&headers));

    headers.insert("x-requested-with", HeaderValue::from_static("xmlhttprequest"));
    assert!(is_ajax(&headers));

    let mut headers = HeaderMap::new();
    headers.insert(header::ACCEPT, HeaderValue::from_static("text/html,application/xhtml+xml"));
    assert!(!is_ajax(&headers));

    for accept in ["application/json", "text/javascript, */*", "Application/JavaScript"] {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_str(accept).unwrap());
        assert!(is_ajax(&headers), "{accept} should count as ajax");
    }
}
