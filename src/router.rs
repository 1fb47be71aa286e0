use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use minijinja::{Environment, ErrorKind, HtmlEscape, Value, context};
use serde_json::json;
use url::Url;

use crate::{
    auth::{Identity, IdentityState},
    config::{AppConfig, parse_base_url},
    error::{ConfigError, DispatchError, HttpFailure, UrlError, ViewError},
    handlers::{Page, RouteContext},
    routes::{Access, AccessPolicy, RouteParams, RouteTable, Target, authorize},
    views::{ViewRenderer, ViewResolver, is_ajax},
};

/// RequestInfo
///
/// The request facts the pipeline needs after the request itself has been
/// handed to a handler.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
    /// Whether the response should skip the layout.
    pub ajax: bool,
    /// `scheme://host` of the current request, when a host is known.
    pub origin: Option<String>,
}

impl RequestInfo {
    pub fn from_parts(parts: &Parts) -> Self {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| parts.uri.authority().map(ToString::to_string));
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| parts.uri.scheme_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            ajax: is_ajax(&parts.headers),
            origin: host.map(|host| format!("{scheme}://{host}")),
        }
    }
}

/// DispatchOutcome
///
/// The terminal state of one request. Redirects are ordinary values, so the
/// "redirect and stop" path never needs a non-local exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Rendered(Page),
    Redirected(String),
    Failed(HttpFailure, Page),
}

impl DispatchOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Rendered(page) | Self::Failed(_, page) => page.status,
            Self::Redirected(_) => StatusCode::FOUND,
        }
    }

    /// The rendered body, empty for redirects.
    pub fn body(&self) -> &str {
        match self {
            Self::Rendered(page) | Self::Failed(_, page) => &page.body,
            Self::Redirected(_) => "",
        }
    }

    fn without_body(self) -> Self {
        match self {
            Self::Rendered(mut page) => {
                page.body.clear();
                Self::Rendered(page)
            }
            Self::Failed(failure, mut page) => {
                page.body.clear();
                Self::Failed(failure, page)
            }
            redirect => redirect,
        }
    }
}

impl IntoResponse for DispatchOutcome {
    fn into_response(self) -> Response {
        match self {
            Self::Rendered(page) | Self::Failed(_, page) => page.into_response(),
            Self::Redirected(url) => (StatusCode::FOUND, [(header::LOCATION, url)]).into_response(),
        }
    }
}

/// Router
///
/// Route registration, the match → authorize → invoke/render pipeline, the
/// error handler and reverse URL generation.
///
/// Registration consumes and returns the router so definitions chain with `?`.
/// Once serving, the router is cloned per request; clones share the route
/// table, the view renderer and the identity provider.
#[derive(Clone)]
pub struct Router {
    table: Arc<RouteTable>,
    views: Arc<ViewRenderer>,
    identity: IdentityState,
    config: Arc<AppConfig>,
}

impl Router {
    /// # Errors
    /// [`ConfigError::InvalidViewsDir`] when the configured views directory
    /// does not exist.
    pub fn new(config: AppConfig, identity: IdentityState) -> Result<Self, ConfigError> {
        let resolver = ViewResolver::new(&config.views_dir)?;
        let views = ViewRenderer::new(resolver, config.layout_view.clone());
        Ok(Self {
            table: Arc::new(RouteTable::new()),
            views: Arc::new(views),
            identity,
            config: Arc::new(config),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn views(&self) -> &ViewRenderer {
        &self.views
    }

    /// route
    ///
    /// Registers `target` for `pattern` under `method` (case-insensitive,
    /// `|`-separated for several methods).
    ///
    /// # Errors
    /// A [`ConfigError`] for an empty or invalid method, a malformed pattern,
    /// an invalid policy, a duplicate (method, pattern) or a duplicate name.
    pub fn route(
        mut self,
        pattern: &str,
        target: Target,
        method: &str,
        name: Option<&str>,
        policy: Option<AccessPolicy>,
    ) -> Result<Self, ConfigError> {
        Arc::make_mut(&mut self.table).insert(
            pattern,
            target,
            method,
            name,
            policy.unwrap_or_default(),
        )?;
        tracing::debug!(method, pattern, name, "registered route");
        Ok(self)
    }

    pub fn get(self, pattern: &str, target: Target) -> Result<Self, ConfigError> {
        self.route(pattern, target, "GET", None, None)
    }

    pub fn post(self, pattern: &str, target: Target) -> Result<Self, ConfigError> {
        self.route(pattern, target, "POST", None, None)
    }

    pub fn put(self, pattern: &str, target: Target) -> Result<Self, ConfigError> {
        self.route(pattern, target, "PUT", None, None)
    }

    pub fn patch(self, pattern: &str, target: Target) -> Result<Self, ConfigError> {
        self.route(pattern, target, "PATCH", None, None)
    }

    pub fn delete(self, pattern: &str, target: Target) -> Result<Self, ConfigError> {
        self.route(pattern, target, "DELETE", None, None)
    }

    /// A public `GET` route rendering `view`.
    pub fn view(self, pattern: &str, view: &str) -> Result<Self, ConfigError> {
        self.route(pattern, Target::view(view), "GET", None, None)
    }

    /// dispatch
    ///
    /// Runs the whole pipeline for one request. Every failure is converted by
    /// the error handler, so this always yields an outcome.
    pub async fn dispatch(&self, request: Request<Body>) -> DispatchOutcome {
        let (parts, body) = request.into_parts();
        let info = RequestInfo::from_parts(&parts);
        let identity = self.identity.identify(&parts).await;

        let outcome = match self.run(parts, body, &info, identity.clone()).await {
            Ok(outcome) => outcome,
            Err(err) => self.handle_error(err, &info, identity.as_ref()),
        };

        if info.method == Method::HEAD {
            outcome.without_body()
        } else {
            outcome
        }
    }

    async fn run(
        &self,
        parts: Parts,
        body: Body,
        info: &RequestInfo,
        identity: Option<Identity>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let matched = self
            .table
            .find(&parts.method, &info.path)
            .or_else(|| {
                if parts.method == Method::HEAD {
                    self.table.find(&Method::GET, &info.path)
                } else {
                    None
                }
            })
            .ok_or_else(|| {
                DispatchError::not_found(format!("no route matches {} {}", info.method, info.path))
            })?;
        let route = matched.route;
        let params = matched.params;

        tracing::debug!(
            pattern = route.pattern.as_str(),
            name = route.name.as_deref(),
            "matched route"
        );

        let access = authorize(
            &route.policy,
            identity.as_ref(),
            self.config.security_route.as_deref(),
            |login| self.build_url(login, &RouteParams::new(), info.origin.as_deref()),
        )?;
        if let Access::Redirect(url) = access {
            tracing::info!(%url, path = %info.path, "redirecting unauthenticated request to login");
            return Ok(DispatchOutcome::Redirected(url));
        }

        match &route.target {
            Target::Handler(handler) => {
                let handler = Arc::clone(handler);
                let ctx = RouteContext::new(self.clone(), parts, body, info.clone(), identity);
                let output = handler.call(ctx, params).await?;
                Ok(DispatchOutcome::Rendered(output.into_page()))
            }
            Target::View(view) => {
                let body = self.render_view(view, &params, serde_json::Value::Null, info, identity.as_ref())?;
                Ok(DispatchOutcome::Rendered(Page::html(StatusCode::OK, body)))
            }
        }
    }

    /// Renders `view` through the page pipeline with the route parameters,
    /// handler data and identity exposed to the template.
    pub(crate) fn render_view(
        &self,
        view: &str,
        params: &RouteParams,
        data: serde_json::Value,
        info: &RequestInfo,
        identity: Option<&Identity>,
    ) -> Result<String, DispatchError> {
        let data = match data {
            serde_json::Value::Object(_) => data,
            serde_json::Value::Null => json!({}),
            other => json!({ "data": other }),
        };
        let env = self.template_env(info.origin.clone());
        let ctx = context! {
            params => Value::from_serialize(params),
            identity => Value::from_serialize(identity),
            request_path => info.path.clone(),
            ..Value::from_serialize(&data)
        };
        self.views.render_page(&env, view, ctx, info.ajax)
    }

    /// The error handler: logs the failure and turns it into a response.
    fn handle_error(
        &self,
        err: DispatchError,
        info: &RequestInfo,
        identity: Option<&Identity>,
    ) -> DispatchOutcome {
        let status = err.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = ?err, method = %info.method, path = %info.path, "request failed");
        } else {
            tracing::warn!(status = status.as_u16(), error = %err, method = %info.method, path = %info.path, "request rejected");
        }

        let failure = HttpFailure::from(err);
        if self.config.display_errors {
            let page = Page::text(failure.status, failure.message.clone());
            return DispatchOutcome::Failed(failure, page);
        }

        let page = match self.render_error_view(&failure, info, identity) {
            Ok(body) => Page::html(failure.status, body),
            Err(e) => {
                if !matches!(e, DispatchError::View(ViewError::NotReadable(_))) {
                    tracing::warn!(error = %e, status = failure.status.as_u16(), "error view failed to render");
                }
                Page::html(failure.status, HtmlEscape(&failure.message).to_string())
            }
        };
        DispatchOutcome::Failed(failure, page)
    }

    fn render_error_view(
        &self,
        failure: &HttpFailure,
        info: &RequestInfo,
        identity: Option<&Identity>,
    ) -> Result<String, DispatchError> {
        let env = self.template_env(info.origin.clone());
        let view = format!("errors/{}", failure.status.as_u16());
        let ctx = context! {
            message => failure.message.clone(),
            status => failure.status.as_u16(),
            identity => Value::from_serialize(identity),
            request_path => info.path.clone(),
        };
        let body = self.views.render(&env, &view, ctx.clone())?;
        if info.ajax {
            return Ok(body);
        }
        match self.views.wrap_in_layout(&env, body.clone(), ctx) {
            // Without a layout the bare error view is still better than nothing.
            Err(DispatchError::Internal(_)) => Ok(body),
            other => other,
        }
    }

    /// A template environment with `url()` and `asset()` bound to this
    /// request's origin.
    fn template_env(&self, origin: Option<String>) -> Environment<'static> {
        let mut env = self.views.environment();

        let router = self.clone();
        let url_origin = origin.clone();
        env.add_function(
            "url",
            move |name: String, params: Option<Value>| -> Result<String, minijinja::Error> {
                let params = match params {
                    None => RouteParams::new(),
                    Some(value) => match serde_json::to_value(&value) {
                        Ok(serde_json::Value::Object(map)) => map,
                        Ok(serde_json::Value::Null) => RouteParams::new(),
                        _ => {
                            return Err(minijinja::Error::new(
                                ErrorKind::InvalidOperation,
                                "url() parameters must be a map",
                            ));
                        }
                    },
                };
                router
                    .build_url(&name, &params, url_origin.as_deref())
                    .map_err(|e| minijinja::Error::new(ErrorKind::InvalidOperation, e.to_string()))
            },
        );

        let router = self.clone();
        env.add_function("asset", move |path: String| router.build_asset(&path, origin.as_deref()));
        env
    }

    /// url
    ///
    /// Absolute URL of a named route, based on the configured `APP_URL`.
    pub fn url(&self, name: &str, params: &RouteParams) -> Result<String, UrlError> {
        self.build_url(name, params, None)
    }

    /// Like [`Router::url`], falling back to the request's scheme and host
    /// when no base URL is configured.
    pub fn url_for_request(
        &self,
        name: &str,
        params: &RouteParams,
        parts: &Parts,
    ) -> Result<String, UrlError> {
        let info = RequestInfo::from_parts(parts);
        self.build_url(name, params, info.origin.as_deref())
    }

    /// build_url
    ///
    /// Resolves the origin (configuration first, then `request_origin`) and
    /// substitutes `params` into the named route's pattern. Generation failures
    /// are logged and reported as [`UrlError::RouteNotFound`], or fall back to
    /// the origin root in permissive mode.
    pub fn build_url(
        &self,
        name: &str,
        params: &RouteParams,
        request_origin: Option<&str>,
    ) -> Result<String, UrlError> {
        let origin = self.origin(request_origin)?;
        match self.generate(&origin, name, params) {
            Ok(url) => Ok(url),
            Err(reason) => {
                tracing::warn!(route = name, %reason, "url generation failed");
                if self.config.url_fallback_to_root {
                    Ok(origin.to_string())
                } else {
                    Err(UrlError::RouteNotFound(name.to_string()))
                }
            }
        }
    }

    /// has_route
    ///
    /// Whether [`Router::url`] would succeed for `name` without parameters.
    /// Never fails, and ignores the permissive fallback.
    pub fn has_route(&self, name: &str) -> bool {
        self.has_route_from(name, None)
    }

    /// Like [`Router::has_route`], with `request_origin` as the fallback
    /// origin.
    pub fn has_route_from(&self, name: &str, request_origin: Option<&str>) -> bool {
        self.origin(request_origin)
            .is_ok_and(|origin| self.generate(&origin, name, &RouteParams::new()).is_ok())
    }

    /// Concatenates the configured asset base with `path`. No filesystem check.
    pub fn asset(&self, path: &str) -> String {
        self.build_asset(path, None)
    }

    pub fn build_asset(&self, path: &str, request_origin: Option<&str>) -> String {
        let base = self
            .config
            .asset_base()
            .map(|url| url.as_str())
            .or(request_origin)
            .unwrap_or_default();
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    fn origin(&self, request_origin: Option<&str>) -> Result<Url, ConfigError> {
        if let Some(url) = &self.config.app_url {
            return Ok(url.clone());
        }
        request_origin
            .ok_or(ConfigError::MissingBaseUrl)
            .and_then(parse_base_url)
    }

    fn generate(&self, origin: &Url, name: &str, params: &RouteParams) -> Result<String, String> {
        let route = self
            .table
            .by_name(name)
            .ok_or_else(|| format!("no route named '{name}'"))?;
        let (segments, trailing_slash) = route.pattern.generate(params)?;

        let mut url = origin.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|()| format!("base url '{origin}' cannot carry a path"))?;
            path.pop_if_empty();
            path.extend(segments.iter());
            if trailing_slash {
                path.push("");
            }
        }
        Ok(url.into())
    }
}
