use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use axum::http::{HeaderMap, header};
use minijinja::{Environment, ErrorKind, Value, context};

use crate::error::{ConfigError, DispatchError, ViewError};

/// Extension appended to every logical view name.
pub const VIEW_EXTENSION: &str = "html";

/// Accept tokens that mark a request as a script/data request.
const AJAX_ACCEPT_TOKENS: [&str; 3] = ["application/json", "text/javascript", "application/javascript"];

/// ViewResolver
///
/// Maps logical view names (`"users/show"`) to files under a trusted root.
/// Containment is decided on canonical paths: the candidate file is resolved
/// (symlinks included) and must be a descendant of the canonical root.
#[derive(Debug, Clone)]
pub struct ViewResolver {
    root: PathBuf,
}

impl ViewResolver {
    /// # Errors
    /// [`ConfigError::InvalidViewsDir`] when `root` cannot be canonicalized or
    /// is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let root = root.as_ref();
        let invalid = || ConfigError::InvalidViewsDir(root.display().to_string());
        let canonical = root.canonicalize().map_err(|_| invalid())?;
        if !canonical.is_dir() {
            return Err(invalid());
        }
        Ok(Self { root: canonical })
    }

    /// The canonical views root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// resolve
    ///
    /// Returns the canonical path of a readable view file inside the root.
    /// Names with a null byte, a `..` segment (with either separator) or an
    /// absolute form are rejected before the filesystem is consulted.
    pub fn resolve(&self, name: &str) -> Result<PathBuf, ViewError> {
        if name.contains('\0') {
            return Err(ViewError::InvalidInput(name.to_string()));
        }
        if name.trim().is_empty() {
            return Err(ViewError::NotReadable(name.to_string()));
        }
        let escapes = name.starts_with(['/', '\\'])
            || Path::new(name).is_absolute()
            || name.split(['/', '\\']).any(|segment| segment == "..");
        if escapes {
            return Err(ViewError::PathEscape(name.to_string()));
        }

        let candidate = self.root.join(format!("{name}.{VIEW_EXTENSION}"));
        let canonical = match candidate.canonicalize() {
            Ok(path) => path,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if self.dangling_link_escapes(&candidate) {
                    return Err(ViewError::PathEscape(name.to_string()));
                }
                return Err(ViewError::NotReadable(name.to_string()));
            }
            Err(_) => return Err(ViewError::PathEscape(name.to_string())),
        };
        if !canonical.starts_with(&self.root) {
            return Err(ViewError::PathEscape(name.to_string()));
        }
        if !canonical.is_file() || File::open(&canonical).is_err() {
            return Err(ViewError::NotReadable(name.to_string()));
        }
        Ok(canonical)
    }

    /// For a candidate that does not resolve: whether the deepest existing
    /// entry on its path is a symlink leading out of the root.
    fn dangling_link_escapes(&self, candidate: &Path) -> bool {
        let deepest = candidate
            .ancestors()
            .take_while(|path| *path != self.root.as_path())
            .find_map(|path| fs::symlink_metadata(path).ok().map(|meta| (path, meta)));
        let Some((link, meta)) = deepest else {
            return false;
        };
        if !meta.file_type().is_symlink() {
            return false;
        }
        let Ok(target) = fs::read_link(link) else {
            return true;
        };
        let target = match link.parent() {
            Some(dir) => dir.join(target),
            None => target,
        };
        // The link target may be missing too; its nearest existing ancestor decides.
        target
            .ancestors()
            .find_map(|path| path.canonicalize().ok())
            .is_none_or(|existing| !existing.starts_with(&self.root))
    }
}

/// ViewRenderer
///
/// Renders resolved view files with `minijinja` and wraps them in the shared
/// layout. `{% include %}` and `{% extends %}` go through the same resolver, so
/// nested templates are held to the same containment rules.
#[derive(Debug, Clone)]
pub struct ViewRenderer {
    resolver: ViewResolver,
    layout: String,
}

impl ViewRenderer {
    pub fn new(resolver: ViewResolver, layout: impl Into<String>) -> Self {
        Self {
            resolver,
            layout: layout.into(),
        }
    }

    pub fn resolver(&self) -> &ViewResolver {
        &self.resolver
    }

    pub fn layout(&self) -> &str {
        &self.layout
    }

    /// A fresh template environment whose loader serves views from the root.
    pub fn environment(&self) -> Environment<'static> {
        let mut env = Environment::new();
        let resolver = self.resolver.clone();
        env.set_loader(move |name| {
            let logical = name
                .strip_suffix(&format!(".{VIEW_EXTENSION}"))
                .unwrap_or(name);
            match resolver.resolve(logical) {
                Ok(path) => fs::read_to_string(&path).map(Some).map_err(|e| {
                    minijinja::Error::new(ErrorKind::InvalidOperation, format!("cannot read {name}"))
                        .with_source(e)
                }),
                Err(ViewError::NotReadable(_)) => Ok(None),
                Err(e) => Err(minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string())),
            }
        });
        env
    }

    /// Renders one view into a string.
    pub fn render(&self, env: &Environment<'_>, name: &str, ctx: Value) -> Result<String, ViewError> {
        let path = self.resolver.resolve(name)?;
        let source = fs::read_to_string(&path).map_err(|_| ViewError::NotReadable(name.to_string()))?;
        env.render_named_str(&format!("{name}.{VIEW_EXTENSION}"), &source, ctx)
            .map_err(|source| ViewError::Render {
                name: name.to_string(),
                source,
            })
    }

    /// Renders the layout with `content` injected as a safe string. A missing
    /// layout is an internal error.
    pub fn wrap_in_layout(
        &self,
        env: &Environment<'_>,
        content: String,
        ctx: Value,
    ) -> Result<String, DispatchError> {
        let layout_ctx = context! { content => Value::from_safe_string(content), ..ctx };
        match self.render(env, &self.layout, layout_ctx) {
            Err(ViewError::NotReadable(_)) => Err(DispatchError::internal(format!(
                "layout view '{}' not found",
                self.layout
            ))),
            other => other.map_err(DispatchError::from),
        }
    }

    /// render_page
    ///
    /// The full view pipeline: render `name` into a buffer, then wrap it in the
    /// layout unless the request is an AJAX request.
    pub fn render_page(
        &self,
        env: &Environment<'_>,
        name: &str,
        ctx: Value,
        ajax: bool,
    ) -> Result<String, DispatchError> {
        let body = self.render(env, name, ctx.clone())?;
        if ajax {
            return Ok(body);
        }
        tracing::debug!(view = name, layout = %self.layout, "wrapping view in layout");
        self.wrap_in_layout(env, body, ctx)
    }
}

/// is_ajax
///
/// A request is an AJAX request when it carries
/// `X-Requested-With: XMLHttpRequest` or accepts a JSON/JavaScript type.
pub fn is_ajax(headers: &HeaderMap) -> bool {
    let requested_with = headers
        .get("x-requested-with")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("XMLHttpRequest"));
    if requested_with {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|accept| {
            let accept = accept.to_ascii_lowercase();
            AJAX_ACCEPT_TOKENS.iter().any(|token| accept.contains(token))
        })
}
