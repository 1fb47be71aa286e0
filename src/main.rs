use std::sync::Arc;

use routegate::{
    AccessPolicy, AppConfig, Env, HandlerResult, JwtIdentityProvider, RouteContext, RouteParams,
    Router, Target, create_app, upload::accept_upload,
};
use serde_json::json;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// Loads the configuration, initialises logging, registers the demo routes and
/// serves them.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    dotenv::dotenv().ok();
    let config = AppConfig::load().expect("FATAL: invalid configuration");

    // 2. Logging Filter Setup
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "routegate=debug,tower_http=info".into());

    // 3. Pretty output locally, JSON for log aggregation in production.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Identity and Routes
    let identity = Arc::new(JwtIdentityProvider::from_config(&config));
    let bind_addr = config.bind_addr.clone();
    let router = register_routes(Router::new(config, identity).expect("FATAL: views directory missing"))
        .expect("FATAL: invalid route table");

    tracing::info!(routes = router.table().len(), "routes registered");

    // 5. Server Startup
    let app = create_app(router);
    let listener = TcpListener::bind(&bind_addr).await.unwrap();
    tracing::info!("Listening on {}", bind_addr);
    axum::serve(listener, app).await.unwrap();
}

fn register_routes(router: Router) -> Result<Router, routegate::ConfigError> {
    router
        .route("/", Target::view("home"), "GET", Some("home"), None)?
        .route("/login", Target::view("login"), "GET", Some("login"), None)?
        .route(
            "/dashboard",
            Target::view("dashboard"),
            "GET",
            Some("dashboard"),
            Some(AccessPolicy::authenticated()),
        )?
        .route(
            "/user/{id}",
            Target::handler(show_user),
            "GET",
            Some("user.show"),
            Some(AccessPolicy::authenticated().with_roles(["admin"])),
        )?
        .route(
            "/uploads",
            Target::handler(accept_upload),
            "POST",
            Some("uploads.create"),
            Some(AccessPolicy::authenticated()),
        )
}

async fn show_user(ctx: RouteContext, params: RouteParams) -> HandlerResult {
    let profile_url = ctx.url("user.show", &params)?;
    ctx.render("user", json!({ "user_id": params.get("id"), "profile_url": profile_url }))
}
