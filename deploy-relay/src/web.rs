//! HTTP front door.
//!
//! Form posts and OAuth callbacks are turned into deploy requests and queued;
//! the browser is then redirected to the status page of the single-page app,
//! which polls `/results/{deploy_id}`.
//!
//! Every failure, including an unmatched route, ends up as a redirect to
//! `/error?msg=...`. Handlers return [`RelayError`]; the `report_errors`
//! middleware logs each failure once and records it with analytics.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::extract::{FromRequest, Path, Query, Request, State};
use axum::handler::HandlerWithoutStateExt;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::middleware::{self, Next};
use axum::response::{Json, Redirect, Response};
use axum::routing::{get, get_service, post};
use axum::{Form, Router};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tower_http::services::{ServeDir, ServeFile};

use crate::analytics::Analytics;
use crate::config::RelayConfig;
use crate::error::{FailedRequest, RelayError};
use crate::message::{self, Cds, DeployInput, DeployRequest};
use crate::oauth::{self, OAuthClient};
use crate::queue::Queue;

/// Paths the single-page app routes on the client side.
const SPA_ROUTES: [&str; 7] = [
    "/",
    "/error",
    "/deploying/{format}/{deploy_id}",
    "/userinfo",
    "/byoo",
    "/testform",
    "/deleteConfirm",
];

/// First path segments of relay routes. A request whose first segment matches
/// one of these ignoring case is routed as if spelled this way.
const ROUTE_SEGMENTS: [&str; 15] = [
    "trial",
    "delete",
    "launch",
    "pools",
    "results",
    "authUrl",
    "token",
    "error",
    "deploying",
    "userinfo",
    "byoo",
    "testform",
    "deleteConfirm",
    "favicons",
    "service-worker.js",
];

pub struct AppState {
    pub config: RelayConfig,
    pub queue: Queue,
    pub analytics: Analytics,
}

/// Build the axum router.
pub fn router(state: Arc<AppState>) -> Router {
    let static_dir = state.config.static_dir.clone();
    let index = static_dir.join("index.html");

    let mut app = Router::new()
        .route("/trial", post(trial))
        .route("/delete", post(delete))
        .route("/launch", get(launch))
        .route("/pools", get(pools))
        .route("/results/{deploy_id}", get(results))
        .route("/authUrl", get(auth_url))
        .route("/token", get(token))
        .route(
            "/favicons/favicon.ico",
            get_service(ServeFile::new(
                static_dir.join("resources").join("favicons").join("favicon.ico"),
            )),
        )
        .route("/service-worker.js", get(|| async { StatusCode::OK }));

    for path in SPA_ROUTES {
        app = app.route(path, get_service(ServeFile::new(&index)));
    }

    // Anything else: a built asset if one exists, otherwise an error.
    let assets = ServeDir::new(&static_dir)
        .append_index_html_on_directories(false)
        .call_fallback_on_method_not_allowed(true)
        .fallback(route_not_found.into_service());

    app.fallback_service(assets)
        .method_not_allowed_fallback(route_not_found)
        .layer(middleware::from_fn_with_state(state.clone(), report_errors))
        .with_state(state)
}

/// Rewrite the first path segment of a relay route to its canonical case.
/// Runs before routing; trailing slashes are already trimmed by then.
pub fn canonical_route(mut request: Request) -> Request {
    let Some(path) = canonical_path(request.uri().path()) else {
        return request;
    };
    let path_and_query = match request.uri().query() {
        Some(query) => format!("{path}?{query}"),
        None => path,
    };
    let Ok(path_and_query) = path_and_query.parse::<PathAndQuery>() else {
        return request;
    };
    let mut parts = request.uri().clone().into_parts();
    parts.path_and_query = Some(path_and_query);
    if let Ok(uri) = Uri::from_parts(parts) {
        *request.uri_mut() = uri;
    }
    request
}

fn canonical_path(path: &str) -> Option<String> {
    let rest = path.strip_prefix('/')?;
    let (head, tail) = match rest.split_once('/') {
        Some((head, tail)) => (head, Some(tail)),
        None => (rest, None),
    };
    let known = ROUTE_SEGMENTS
        .iter()
        .find(|segment| segment.eq_ignore_ascii_case(head))?;
    if *known == head {
        return None;
    }
    Some(match tail {
        Some(tail) => format!("/{known}/{tail}"),
        None => format!("/{known}"),
    })
}

// ── Error path ─────────────────────────────────────────────────────────

async fn report_errors(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let uri = request.uri().clone();
    let method = request.method().clone();
    let response = next.run(request).await;

    if let Some(FailedRequest(error)) = response.extensions().get::<FailedRequest>() {
        tracing::error!(%method, %uri, error = %error, "request failed");
        if state.analytics.is_enabled() {
            let template = query_param(&uri, "template").unwrap_or_default();
            state.analytics.event(None, "Error", &template);
        }
    }
    response
}

async fn route_not_found(method: Method, uri: Uri) -> RelayError {
    // Fail on a later poll so this takes the same path as any async failure.
    tokio::task::yield_now().await;
    RelayError::RouteNotFound {
        uri: uri.to_string(),
        method: method.to_string(),
    }
}

fn query_param(uri: &Uri, name: &str) -> Option<String> {
    url::form_urlencoded::parse(uri.query()?.as_bytes())
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}

// ── Extractors ─────────────────────────────────────────────────────────

/// Request body sent either as a urlencoded form or as JSON.
pub struct FormOrJson<T>(pub T);

impl<T, S> FromRequest<S> for FormOrJson<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = RelayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| RelayError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| RelayError::BadRequest(e.body_text()))?;
            Ok(Self(value))
        }
    }
}

fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let cookies: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    (!cookies.is_empty()).then(|| cookies.join("; "))
}

// ── Deploy routes ──────────────────────────────────────────────────────

/// Build, record and queue a deploy request.
async fn enqueue(state: &AppState, input: DeployInput, page: &str) -> Result<DeployRequest, RelayError> {
    let request = message::build(&input)?;

    if let Some(visitor) = &request.visitor {
        state.analytics.pageview(visitor, page);
        state.analytics.event(Some(visitor), "Repo", &request.template);
    }

    state.queue.enqueue(&request).await?;
    tracing::info!(
        deploy_id = %request.deploy_id,
        template = %request.template,
        byoo = request.credentials.is_some(),
        via = page,
        "deploy request queued"
    );
    Ok(request)
}

async fn trial(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    FormOrJson(body): FormOrJson<Map<String, Value>>,
) -> Result<Redirect, RelayError> {
    let input = DeployInput {
        query,
        body: body.clone(),
        cookies: cookie_header(&headers),
        credentials: None,
    };
    let request = enqueue(&state, input, "/trial").await?;
    state.queue.put_lead(&request.deploy_id, &body).await?;
    Ok(Redirect::to(&format!("/deploying/trial/{}", request.deploy_id.trim())))
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    #[serde(rename = "deployId")]
    deploy_id: String,
}

async fn delete(
    State(state): State<Arc<AppState>>,
    FormOrJson(body): FormOrJson<DeleteRequest>,
) -> Result<Json<Value>, RelayError> {
    state.queue.delete(&body.deploy_id).await?;
    Ok(Json(serde_json::json!({ "redirectTo": "/deleteConfirm" })))
}

async fn launch(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Redirect, RelayError> {
    // Repos can require the visitor's email before deploying.
    if query.get("email").map(String::as_str) == Some("required") {
        let template = query.get("template").map(String::as_str).unwrap_or_default();
        return Ok(Redirect::to(&format!(
            "/userinfo?template={}",
            utf8_percent_encode(template, NON_ALPHANUMERIC)
        )));
    }

    let input = DeployInput {
        query,
        cookies: cookie_header(&headers),
        ..Default::default()
    };
    let request = enqueue(&state, input, "/launch").await?;
    Ok(Redirect::to(&format!("/deploying/deployer/{}", request.deploy_id.trim())))
}

async fn pools(State(state): State<Arc<AppState>>) -> Result<Json<Vec<String>>, RelayError> {
    Ok(Json(state.queue.keys().await?))
}

async fn results(
    State(state): State<Arc<AppState>>,
    Path(deploy_id): Path<String>,
) -> Result<Json<Option<Cds>>, RelayError> {
    Ok(Json(state.queue.retrieve(&deploy_id).await?))
}

// ── BYOO OAuth ─────────────────────────────────────────────────────────

async fn auth_url(
    State(state): State<Arc<AppState>>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<String, RelayError> {
    let client = OAuthClient::new(
        state.config.byoo(),
        query.get("base_url").map(String::as_str),
    )?;
    let oauth_state = oauth::encode_state(&query)?;
    client.authorization_url(&oauth_state)
}

async fn token(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Redirect, RelayError> {
    let raw_state = query.get("state").ok_or(RelayError::MissingField("state"))?;
    let login = oauth::decode_state(raw_state)?;
    let code = query.get("code").ok_or(RelayError::MissingField("code"))?;

    let client = OAuthClient::new(state.config.byoo(), login.base_url.as_deref())?;
    let credentials = client.authorize(code).await?;

    let input = DeployInput {
        query: login
            .template
            .into_iter()
            .map(|t| ("template".to_string(), t))
            .collect(),
        cookies: cookie_header(&headers),
        credentials: Some(credentials),
        ..Default::default()
    };
    let request = enqueue(&state, input, "byoo").await?;
    Ok(Redirect::to(&format!("/deploying/deployer/{}", request.deploy_id.trim())))
}
