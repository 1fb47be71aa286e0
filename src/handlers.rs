use std::future::Future;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{HeaderMap, Method, StatusCode, Uri, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;

use crate::{
    auth::Identity,
    error::{DispatchError, UrlError},
    router::{RequestInfo, Router},
    routes::RouteParams,
};

pub const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Page
///
/// A fully rendered response body with its status and content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub status: StatusCode,
    pub content_type: String,
    pub body: String,
}

impl Page {
    pub fn html(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: HTML_CONTENT_TYPE.to_string(),
            body: body.into(),
        }
    }

    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            content_type: TEXT_CONTENT_TYPE.to_string(),
            body: body.into(),
        }
    }

    /// A JSON body serialized from `value`.
    pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Self, DispatchError> {
        let body = serde_json::to_string(value)
            .map_err(|e| DispatchError::internal(format!("failed to serialize response: {e}")))?;
        Ok(Self {
            status,
            content_type: mime::APPLICATION_JSON.to_string(),
            body,
        })
    }

    pub fn empty() -> Self {
        Self::html(StatusCode::OK, String::new())
    }
}

impl IntoResponse for Page {
    fn into_response(self) -> Response {
        (self.status, [(header::CONTENT_TYPE, self.content_type)], self.body).into_response()
    }
}

/// HandlerOutput
///
/// What a handler hands back: a structured page, a plain string emitted
/// as-is with status 200, or nothing at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutput {
    Page(Page),
    Text(String),
    Empty,
}

impl HandlerOutput {
    pub fn into_page(self) -> Page {
        match self {
            Self::Page(page) => page,
            Self::Text(text) => Page::html(StatusCode::OK, text),
            Self::Empty => Page::empty(),
        }
    }
}

impl From<Page> for HandlerOutput {
    fn from(page: Page) -> Self {
        Self::Page(page)
    }
}

impl From<String> for HandlerOutput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for HandlerOutput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<()> for HandlerOutput {
    fn from(_: ()) -> Self {
        Self::Empty
    }
}

pub type HandlerResult = Result<HandlerOutput, DispatchError>;

/// Handler
///
/// An invocable route target. Any `Fn(RouteContext, RouteParams) -> impl
/// Future<Output = HandlerResult>` qualifies, so plain `async fn`s can be
/// registered directly.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, ctx: RouteContext, params: RouteParams) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(RouteContext, RouteParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn call(&self, ctx: RouteContext, params: RouteParams) -> HandlerResult {
        (self)(ctx, params).await
    }
}

/// RouteContext
///
/// The router handle passed to handlers: request metadata, the resolved
/// identity, the request body, and URL/view helpers bound to this request.
pub struct RouteContext {
    router: Router,
    parts: Parts,
    body: Body,
    info: RequestInfo,
    identity: Option<Identity>,
}

impl RouteContext {
    pub(crate) fn new(
        router: Router,
        parts: Parts,
        body: Body,
        info: RequestInfo,
        identity: Option<Identity>,
    ) -> Self {
        Self {
            router,
            parts,
            body,
            info,
            identity,
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn method(&self) -> &Method {
        &self.parts.method
    }

    pub fn uri(&self) -> &Uri {
        &self.parts.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.parts.headers
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn is_ajax(&self) -> bool {
        self.info.ajax
    }

    /// Takes the request body, leaving an empty one behind.
    pub fn take_body(&mut self) -> Body {
        std::mem::replace(&mut self.body, Body::empty())
    }

    /// Absolute URL of the named route, using this request's host when no
    /// base URL is configured.
    pub fn url(&self, name: &str, params: &RouteParams) -> Result<String, UrlError> {
        self.router.build_url(name, params, self.info.origin.as_deref())
    }

    pub fn has_route(&self, name: &str) -> bool {
        self.router.has_route_from(name, self.info.origin.as_deref())
    }

    pub fn asset(&self, path: &str) -> String {
        self.router.build_asset(path, self.info.origin.as_deref())
    }

    /// Renders a view (inside the layout unless this is an AJAX request) with
    /// `data` exposed to the template.
    pub fn render(&self, view: &str, data: Value) -> HandlerResult {
        let body = self
            .router
            .render_view(view, &RouteParams::new(), data, &self.info, self.identity.as_ref())?;
        Ok(HandlerOutput::Page(Page::html(StatusCode::OK, body)))
    }
}
