//! api-server: HTTP front end of the link bridge.
//!
//! Serves the public resolve endpoints and the admin API:
//! - Resolve: `/:key[/*rest]` answers with a redirect, an app-handoff page or
//!   an "invalid link" page, depending on the device and the link's policy.
//! - Expand: `/api/links/:key[/*rest]` returns the substituted targets as JSON.
//! - Admin: register, list, edit and delete links under `/api/admin/links`.
//! - Auth: trusted proxy headers, or disabled (debug) mode via X-Debug-User.
//! - Storage: in-memory, SQLite (`sqlite` feature) or Redis (`redis` feature).
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! FALLBACK_URL=https://example.com cargo run -p api-server
//!
//! # with Redis storage
//! FALLBACK_URL=https://example.com STORAGE_PROVIDER=redis \
//! REDIS_URL=redis://127.0.0.1:6379 cargo run -p api-server
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.
//!

mod config;
mod render;

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::SystemTime;

use axum::http::HeaderValue;
use axum::{
    extract::{OriginalUri, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use domain::adapters::memory_repo::InMemoryRepo;
use domain::decision::{RedirectPlan, ResolvedTargets};
use domain::service::{LinkService, ResolveRequest};
use domain::template::{share_url, TemplateArgs};
use domain::{
    Actor, AppCall, BridgeType, CoreError, EditOutcome, LinkContent, LinkEdit, LinkKey,
    LinkRecord, LinkRepository, NewLink, SystemClock, UserEmail,
};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// Storage selected at startup; adapters beyond memory are feature-gated.
enum AnyRepo {
    Memory(InMemoryRepo),
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite_adapter::SqliteRepo),
    #[cfg(feature = "redis")]
    Redis(redis_adapter::RedisRepo),
}

impl LinkRepository for AnyRepo {
    fn get(&self, key: &LinkKey) -> Result<Option<LinkRecord>, CoreError> {
        match self {
            AnyRepo::Memory(r) => r.get(key),
            #[cfg(feature = "sqlite")]
            AnyRepo::Sqlite(r) => r.get(key),
            #[cfg(feature = "redis")]
            AnyRepo::Redis(r) => r.get(key),
        }
    }

    fn get_all(&self, keys: Option<&[LinkKey]>) -> Result<Vec<LinkRecord>, CoreError> {
        match self {
            AnyRepo::Memory(r) => r.get_all(keys),
            #[cfg(feature = "sqlite")]
            AnyRepo::Sqlite(r) => r.get_all(keys),
            #[cfg(feature = "redis")]
            AnyRepo::Redis(r) => r.get_all(keys),
        }
    }

    fn set(&self, record: LinkRecord) -> Result<(), CoreError> {
        match self {
            AnyRepo::Memory(r) => r.set(record),
            #[cfg(feature = "sqlite")]
            AnyRepo::Sqlite(r) => r.set(record),
            #[cfg(feature = "redis")]
            AnyRepo::Redis(r) => r.set(record),
        }
    }

    fn delete(&self, keys: &[LinkKey]) -> Result<usize, CoreError> {
        match self {
            AnyRepo::Memory(r) => r.delete(keys),
            #[cfg(feature = "sqlite")]
            AnyRepo::Sqlite(r) => r.delete(keys),
            #[cfg(feature = "redis")]
            AnyRepo::Redis(r) => r.delete(keys),
        }
    }
}

type Service = LinkService<AnyRepo, SystemClock>;

#[derive(Clone)]
struct AppState {
    service: Arc<Service>,
    config: Arc<config::Config>,
}

impl AppState {
    fn new(service: Service, config: config::Config) -> Self {
        Self {
            service: Arc::new(service),
            config: Arc::new(config),
        }
    }

    fn public_origin(&self) -> Option<&str> {
        self.config.public_origin.as_deref()
    }

    fn key_length(&self) -> usize {
        self.service.config().key_length()
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_insecure();

    let repo = match build_repo(&cfg) {
        Ok(r) => r,
        Err(e) => {
            error!(err = %e, storage = ?cfg.storage_provider, "failed to init storage");
            std::process::exit(1);
        }
    };
    let state = AppState::new(
        LinkService::new(repo, SystemClock, cfg.engine.clone()),
        cfg.clone(),
    );

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = routes(state)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::PATCH,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static("x-debug-user"),
                axum::http::HeaderName::from_static("x-debug-name"),
            ])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "api-server listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%addr, err = %e, "bind failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = %e, "server error");
        std::process::exit(1);
    }
}

fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/:key", get(resolve_key))
        .route("/:key/", get(resolve_key))
        .route("/:key/*rest", get(resolve_key_with_path))
        .route("/api/links/:key", get(expand_key))
        .route("/api/links/:key/", get(expand_key))
        .route("/api/links/:key/*rest", get(expand_key_with_path))
        .route("/api/admin/links", post(create_link).get(list_links))
        .route(
            "/api/admin/links/:key",
            get(get_link).patch(update_link).delete(delete_link),
        )
        .route("/api/admin/links/bulk/delete", post(bulk_delete_links))
        .route("/api/me", get(get_me))
        .with_state(state)
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// Construct the repository selected by config and feature flags.
fn build_repo(cfg: &config::Config) -> Result<AnyRepo, CoreError> {
    match cfg.storage_provider {
        config::StorageProvider::Memory => Ok(AnyRepo::Memory(InMemoryRepo::new())),
        #[cfg(feature = "sqlite")]
        config::StorageProvider::Sqlite => {
            let path = cfg.db_path.to_string_lossy();
            info!(path = %path, "using sqlite storage");
            Ok(AnyRepo::Sqlite(sqlite_adapter::SqliteRepo::open_creating_dirs(&path)?))
        }
        #[cfg(feature = "redis")]
        config::StorageProvider::Redis => {
            let url = cfg.redis_url.as_deref().unwrap_or_default();
            Ok(AnyRepo::Redis(redis_adapter::RedisRepo::connect(url)?))
        }
        #[allow(unreachable_patterns)]
        ref other => Err(CoreError::InvalidConfig(format!(
            "storage provider {other:?} not compiled in"
        ))),
    }
}

// ============================================================================
// Errors
// ============================================================================

fn error_response(status: StatusCode, code: &str, message: &str) -> Response {
    (
        status,
        Json(http_common::json_error_with_message(code, message)),
    )
        .into_response()
}

/// Map a domain error to its HTTP status and JSON body.
fn core_error_response(e: CoreError) -> Response {
    match e {
        CoreError::InvalidInput(msg) => error_response(StatusCode::BAD_REQUEST, "invalid_request", &msg),
        CoreError::MissingParameter(name) => error_response(
            StatusCode::BAD_REQUEST,
            "missing_parameter",
            &format!("missing parameter: {name}"),
        ),
        CoreError::InvalidKey(msg) => error_response(StatusCode::BAD_REQUEST, "invalid_key", &msg),
        CoreError::InvalidUserEmail => error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "invalid user email",
        ),
        CoreError::Duplicate(key) => {
            let mut body = http_common::json_err("duplicate");
            body["key"] = serde_json::Value::String(key.to_string());
            (StatusCode::CONFLICT, Json(body)).into_response()
        }
        CoreError::AlreadyExists => {
            error_response(StatusCode::CONFLICT, "conflict", "key already exists")
        }
        CoreError::NotFound => {
            (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response()
        }
        CoreError::PermissionDenied => error_response(
            StatusCode::FORBIDDEN,
            "forbidden",
            "only the registrant or an admin may change this link",
        ),
        CoreError::InvalidConfig(_) | CoreError::Repository(_) => {
            error!(err = ?e, "internal error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(http_common::json_err("internal")),
            )
                .into_response()
        }
    }
}

// ============================================================================
// Auth
// ============================================================================

enum AuthHttp {
    Unauthorized,
    Forbidden,
}

impl IntoResponse for AuthHttp {
    fn into_response(self) -> Response {
        match self {
            AuthHttp::Unauthorized => error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "missing or invalid identity",
            ),
            AuthHttp::Forbidden => {
                error_response(StatusCode::FORBIDDEN, "forbidden", "domain not allowed")
            }
        }
    }
}

struct VerifiedUser {
    email: String,
    name: Option<String>,
}

fn verify_request_user(headers: &HeaderMap, state: &AppState) -> Result<VerifiedUser, AuthHttp> {
    let (email_header, name_header) = match state.config.auth_provider {
        config::AuthProvider::None => ("X-Debug-User", "X-Debug-Name"),
        config::AuthProvider::Proxy => ("X-Forwarded-Email", "X-Forwarded-User"),
    };
    let header_str = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|s| !s.is_empty())
    };
    let email = header_str(email_header).ok_or(AuthHttp::Unauthorized)?;

    // Optional domain enforcement in every mode
    if let Some(dom) = &state.config.allowed_domain {
        if !email
            .rsplit_once('@')
            .map(|(_, d)| d.eq_ignore_ascii_case(dom))
            .unwrap_or(false)
        {
            warn!(email = %email, "auth failed: domain not allowed");
            return Err(AuthHttp::Forbidden);
        }
    }
    Ok(VerifiedUser {
        email: email.to_string(),
        name: header_str(name_header).map(str::to_string),
    })
}

/// Authenticate the request and build the acting user.
fn require_actor(headers: &HeaderMap, state: &AppState) -> Result<Actor, Response> {
    let verified = verify_request_user(headers, state).map_err(IntoResponse::into_response)?;
    let email = UserEmail::new(verified.email).map_err(core_error_response)?;
    let name = verified.name.unwrap_or_else(|| {
        email
            .as_str()
            .split('@')
            .next()
            .unwrap_or_default()
            .to_string()
    });
    Ok(Actor {
        is_admin: state.config.is_admin(email.as_str()),
        email,
        name,
    })
}

// ============================================================================
// Resolve
// ============================================================================

fn host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

/// Path segments after the first `skip` ones, taken from the raw request
/// path and decoded one by one so an encoded `/` stays inside its segment.
fn path_args(uri: &axum::http::Uri, skip: usize) -> Vec<String> {
    uri.path()
        .trim_start_matches('/')
        .split('/')
        .skip(skip)
        .map(|s| percent_decode_str(s).decode_utf8_lossy().into_owned())
        .collect()
}

/// 307 to `location`, or 400 when it cannot be sent as a header value.
fn temporary_redirect(location: &str) -> Response {
    match HeaderValue::try_from(location) {
        Ok(value) => (StatusCode::TEMPORARY_REDIRECT, [(header::LOCATION, value)]).into_response(),
        Err(_) => {
            warn!(location = %location.escape_debug(), "redirect target is not a valid header value");
            error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "redirect target is not a valid URL",
            )
        }
    }
}

async fn home(State(state): State<AppState>) -> Response {
    match &state.config.home_url {
        Some(url) => temporary_redirect(url),
        None => (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response(),
    }
}

async fn resolve_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    resolve_impl(&state, key, Vec::new(), query, &uri, &headers)
}

async fn resolve_key_with_path(
    State(state): State<AppState>,
    Path((key, _rest)): Path<(String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
) -> Response {
    let path = path_args(&uri, 1);
    resolve_impl(&state, key, path, query, &uri, &headers)
}

fn resolve_impl(
    state: &AppState,
    key: String,
    path: Vec<String>,
    query: BTreeMap<String, String>,
    uri: &axum::http::Uri,
    headers: &HeaderMap,
) -> Response {
    let path_and_query = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let request_url = http_common::build_public_url(
        state.public_origin(),
        host(headers),
        path_and_query.trim_start_matches('/'),
    );
    let req = ResolveRequest {
        key,
        args: TemplateArgs::new(path, query),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string(),
        request_url,
    };

    match state.service.resolve(&req) {
        Ok(RedirectPlan::Immediate { location }) => {
            info!(key = %req.key, redirect_to = %location, "resolve redirect");
            temporary_redirect(&location)
        }
        Ok(RedirectPlan::Interstitial {
            app_link,
            web_link,
            app_only,
            auto_call_app,
            bridge_template,
        }) => {
            info!(key = %req.key, app_only, auto_call_app, "resolve interstitial");
            let html = render::render_interstitial(&render::Interstitial {
                app_link: app_link.as_deref(),
                web_link: &web_link,
                app_only,
                auto_call_app,
                bridge_template: bridge_template.as_deref(),
            });
            ([(header::CACHE_CONTROL, "no-store")], Html(html)).into_response()
        }
        Ok(RedirectPlan::NotFound { fallback_url }) => {
            warn!(key = %req.key, "resolve 404");
            (StatusCode::NOT_FOUND, Html(render::render_not_found(&fallback_url))).into_response()
        }
        Err(e) => {
            warn!(key = %req.key, err = %e, "resolve failed");
            core_error_response(e)
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TargetsOut {
    web_url: String,
    ios_url: Option<String>,
    aos_url: Option<String>,
}

impl From<ResolvedTargets> for TargetsOut {
    fn from(t: ResolvedTargets) -> Self {
        Self {
            web_url: t.web_url,
            ios_url: t.ios_url,
            aos_url: t.aos_url,
        }
    }
}

async fn expand_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Response {
    expand_impl(&state, &key, Vec::new(), query)
}

async fn expand_key_with_path(
    State(state): State<AppState>,
    Path((key, _rest)): Path<(String, String)>,
    Query(query): Query<BTreeMap<String, String>>,
    OriginalUri(uri): OriginalUri,
) -> Response {
    // skip "api", "links" and the key
    expand_impl(&state, &key, path_args(&uri, 3), query)
}

fn expand_impl(state: &AppState, key: &str, path: Vec<String>, query: BTreeMap<String, String>) -> Response {
    match state.service.expand(key, &TemplateArgs::new(path, query)) {
        Ok(targets) => (StatusCode::OK, Json(TargetsOut::from(targets))).into_response(),
        Err(e) => core_error_response(e),
    }
}

// ============================================================================
// Admin
// ============================================================================

/// Expiry as epoch milliseconds or an RFC3339 timestamp.
#[derive(Deserialize)]
#[serde(untagged)]
enum DateInput {
    Millis(u64),
    Text(String),
}

impl DateInput {
    fn to_system_time(&self) -> Result<SystemTime, CoreError> {
        match self {
            DateInput::Millis(ms) => Ok(http_common::millis_to_system_time(*ms)),
            DateInput::Text(s) => http_common::parse_rfc3339(s).map_err(|_| {
                CoreError::InvalidInput("expireDate must be epoch millis or RFC3339".into())
            }),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LinkReq {
    web_url: String,
    #[serde(default)]
    ios_url: Option<String>,
    #[serde(default)]
    aos_url: Option<String>,
    #[serde(default)]
    bridge_type: Option<BridgeType>,
    #[serde(default)]
    bridge_template: Option<String>,
    #[serde(default)]
    app_call: Option<AppCall>,
    /// Older clients send this flag instead of `bridgeType`.
    #[serde(default)]
    app_only: bool,
    expire_date: DateInput,
    /// Custom key; only honored on create.
    #[serde(default)]
    key: Option<String>,
}

impl LinkReq {
    fn content(&self) -> LinkContent {
        let bridge_type = self.bridge_type.unwrap_or(if self.app_only {
            BridgeType::AppOnly
        } else {
            BridgeType::Normal
        });
        LinkContent {
            web_url: self.web_url.trim().to_string(),
            ios_url: self.ios_url.clone(),
            aos_url: self.aos_url.clone(),
            bridge_type,
            bridge_template: self.bridge_template.clone(),
            app_call: self.app_call.unwrap_or_default(),
        }
    }
}

#[derive(Deserialize)]
struct BulkKeysReq {
    keys: Vec<String>,
}

#[derive(Serialize)]
struct BulkResultOut {
    affected: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOut {
    key: String,
    short_url: String,
}

#[derive(Serialize)]
struct UpdatedOut {
    key: String,
    updated: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LinkOut {
    key: String,
    short_url: String,
    /// Public URL pattern with every placeholder the web template accepts.
    share_url: String,
    web_url: String,
    ios_url: Option<String>,
    aos_url: Option<String>,
    bridge_type: BridgeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    bridge_template: Option<String>,
    app_call: AppCall,
    expire_date: u64,
    register_date: u64,
    register_name: String,
    register_email: String,
}

#[derive(Serialize)]
struct ListOut {
    links: Vec<LinkOut>,
    total: usize,
    user: UserInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct UserInfo {
    email: String,
    name: String,
    is_admin: bool,
}

impl From<&Actor> for UserInfo {
    fn from(a: &Actor) -> Self {
        Self {
            email: a.email.as_str().to_string(),
            name: a.name.clone(),
            is_admin: a.is_admin,
        }
    }
}

fn link_to_out(record: LinkRecord, headers: &HeaderMap, state: &AppState) -> LinkOut {
    let public_origin = state.public_origin();
    let origin = http_common::public_origin(public_origin, host(headers));
    let c = record.content;
    LinkOut {
        key: record.key.to_string(),
        short_url: http_common::build_public_url(public_origin, host(headers), record.key.as_str()),
        share_url: share_url(&origin, &record.key, &c.web_url),
        web_url: c.web_url,
        ios_url: c.ios_url,
        aos_url: c.aos_url,
        bridge_type: c.bridge_type,
        bridge_template: c.bridge_template,
        app_call: c.app_call,
        expire_date: http_common::system_time_to_millis(record.expire_date),
        register_date: http_common::system_time_to_millis(record.register_date),
        register_name: record.register_name,
        register_email: record.register_email.as_str().to_string(),
    }
}

fn parse_key(state: &AppState, raw: &str) -> Result<LinkKey, Response> {
    if !http_common::is_valid_key(raw, state.key_length()) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_key",
            &format!("key must be {} characters of [A-Za-z0-9_-]", state.key_length()),
        ));
    }
    LinkKey::new(raw).map_err(core_error_response)
}

async fn create_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<LinkReq>,
) -> Response {
    let actor = match require_actor(&headers, &state) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let expire_date = match body.expire_date.to_system_time() {
        Ok(t) => t,
        Err(e) => return core_error_response(e),
    };
    let custom_key = match body.key.as_deref().filter(|k| !k.is_empty()) {
        Some(raw) => match parse_key(&state, raw) {
            Ok(k) => Some(k),
            Err(resp) => return resp,
        },
        None => None,
    };

    let input = NewLink {
        content: body.content(),
        expire_date,
        custom_key,
        register_name: actor.name.clone(),
        register_email: actor.email.clone(),
    };
    match state.service.register(input) {
        Ok(key) => {
            info!(
                key = %key,
                by = %actor.email.as_str(),
                expires = %http_common::system_time_to_rfc3339(expire_date),
                "register ok"
            );
            let out = CreatedOut {
                short_url: http_common::build_public_url(
                    state.public_origin(),
                    host(&headers),
                    key.as_str(),
                ),
                key: key.to_string(),
            };
            (StatusCode::CREATED, Json(out)).into_response()
        }
        Err(e) => {
            warn!(err = %e, "register rejected");
            core_error_response(e)
        }
    }
}

#[derive(Deserialize)]
struct ListQuery {
    /// Comma-separated keys to restrict the listing to.
    keys: Option<String>,
}

async fn list_links(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<ListQuery>,
) -> Response {
    let actor = match require_actor(&headers, &state) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let keys: Option<Vec<LinkKey>> = q.keys.map(|s| {
        s.split(',')
            .filter_map(|k| LinkKey::new(k.trim()).ok())
            .collect()
    });

    match state.service.list(keys.as_deref()) {
        Ok(records) => {
            let links: Vec<LinkOut> = records
                .into_iter()
                .map(|r| link_to_out(r, &headers, &state))
                .collect();
            let out = ListOut {
                total: links.len(),
                links,
                user: UserInfo::from(&actor),
            };
            (StatusCode::OK, Json(out)).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn get_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Response {
    if let Err(resp) = require_actor(&headers, &state) {
        return resp;
    }
    let key = match parse_key(&state, &raw) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.service.get(&key) {
        Ok(Some(record)) => (StatusCode::OK, Json(link_to_out(record, &headers, &state))).into_response(),
        Ok(None) => core_error_response(CoreError::NotFound),
        Err(e) => core_error_response(e),
    }
}

async fn update_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw): Path<String>,
    Json(body): Json<LinkReq>,
) -> Response {
    let actor = match require_actor(&headers, &state) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let key = match parse_key(&state, &raw) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    let expire_date = match body.expire_date.to_system_time() {
        Ok(t) => t,
        Err(e) => return core_error_response(e),
    };
    let edit = LinkEdit {
        content: body.content(),
        expire_date,
    };

    match state.service.edit(&key, edit, &actor) {
        Ok(outcome) => {
            let updated = outcome == EditOutcome::Updated;
            info!(key = %key, by = %actor.email.as_str(), updated, "edit ok");
            (
                StatusCode::OK,
                Json(UpdatedOut {
                    key: key.to_string(),
                    updated,
                }),
            )
                .into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn delete_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(raw): Path<String>,
) -> Response {
    let actor = match require_actor(&headers, &state) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let key = match parse_key(&state, &raw) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.service.delete(std::slice::from_ref(&key), &actor) {
        Ok(0) => core_error_response(CoreError::NotFound),
        Ok(_) => {
            info!(key = %key, by = %actor.email.as_str(), "delete ok");
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn bulk_delete_links(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<BulkKeysReq>,
) -> Response {
    let actor = match require_actor(&headers, &state) {
        Ok(a) => a,
        Err(resp) => return resp,
    };
    let mut keys = Vec::with_capacity(body.keys.len());
    for raw in &body.keys {
        match parse_key(&state, raw) {
            Ok(k) => keys.push(k),
            Err(resp) => return resp,
        }
    }
    if keys.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "no keys provided",
        );
    }

    match state.service.delete(&keys, &actor) {
        Ok(affected) => {
            info!(count = affected, by = %actor.email.as_str(), "bulk delete ok");
            (StatusCode::OK, Json(BulkResultOut { affected })).into_response()
        }
        Err(e) => core_error_response(e),
    }
}

async fn get_me(State(state): State<AppState>, headers: HeaderMap) -> Response {
    match require_actor(&headers, &state) {
        Ok(actor) => (StatusCode::OK, Json(UserInfo::from(&actor))).into_response(),
        Err(resp) => resp,
    }
}
