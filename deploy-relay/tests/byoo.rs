//! BYOO OAuth acceptance tests against a stub Salesforce login host.

mod common;

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::{Form, Router};
use common::{client, error_message, location, spawn_stub, start_relay_with};
use deploy_relay::analytics::Analytics;

const CLIENT_ID: &str = "3MVG9test-consumer-key";
const CLIENT_SECRET: &str = "test-consumer-secret";
const CALLBACK: &str = "https://deployer.example.com/token";
const GOOD_CODE: &str = "aPrx-good-code";
const ACCESS_TOKEN: &str = "00Dxx0000001gPL!AQ0AQtoken";
const ORG_ID: &str = "00Dxx0000001gPL";
const USER_ID: &str = "005xx000001X8Uz";
const INSTANCE: &str = "https://acme-dev-ed.my.salesforce.com";

async fn token_endpoint(Form(form): Form<HashMap<String, String>>) -> Response {
    let field = |name: &str| form.get(name).map(String::as_str).unwrap_or_default();
    let valid = field("grant_type") == "authorization_code"
        && field("code") == GOOD_CODE
        && field("client_id") == CLIENT_ID
        && field("client_secret") == CLIENT_SECRET
        && field("redirect_uri") == CALLBACK;
    if !valid {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "authentication failure"
            })),
        )
            .into_response();
    }
    Json(serde_json::json!({
        "access_token": ACCESS_TOKEN,
        "instance_url": INSTANCE,
        "id": format!("https://login.salesforce.com/id/{ORG_ID}/{USER_ID}"),
        "token_type": "Bearer",
        "issued_at": "1700000000000",
        "signature": "c2lnbmF0dXJl"
    }))
    .into_response()
}

async fn start_login_host() -> SocketAddr {
    spawn_stub(Router::new().route("/services/oauth2/token", post(token_endpoint))).await
}

async fn start_byoo_relay() -> common::TestRelay {
    start_relay_with(
        |config| {
            config.byoo_consumer_key = CLIENT_ID.to_string();
            config.byoo_secret = CLIENT_SECRET.to_string();
            config.byoo_callback_uri = Some(CALLBACK.to_string());
        },
        Analytics::disabled(),
    )
    .await
}

fn state_param(auth_url: &str) -> String {
    url::Url::parse(auth_url)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("authorization url without state")
}

#[tokio::test]
async fn auth_url_points_at_requested_login_host() {
    let relay = start_byoo_relay().await;
    let auth_url = client()
        .get(relay.url("/authUrl"))
        .query(&[("base_url", "https://test.salesforce.com"), ("template", "foo")])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();

    let parsed = url::Url::parse(&auth_url).unwrap();
    assert_eq!(parsed.host_str(), Some("test.salesforce.com"));
    assert_eq!(parsed.path(), "/services/oauth2/authorize");

    let query: HashMap<String, String> = parsed.query_pairs().into_owned().collect();
    assert_eq!(query["client_id"], CLIENT_ID);
    assert_eq!(query["redirect_uri"], CALLBACK);
    assert_eq!(query["scope"], "api id web openid");

    let state: serde_json::Value = serde_json::from_str(&query["state"]).unwrap();
    assert_eq!(
        state,
        serde_json::json!({ "template": "foo", "base_url": "https://test.salesforce.com" })
    );
}

#[tokio::test]
async fn auth_url_defaults_to_production_login() {
    let relay = start_byoo_relay().await;
    let auth_url = client()
        .get(relay.url("/authUrl?template=foo"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(
        auth_url.starts_with("https://login.salesforce.com/services/oauth2/authorize?"),
        "{auth_url}"
    );
    let state: serde_json::Value = serde_json::from_str(&state_param(&auth_url)).unwrap();
    assert_eq!(state, serde_json::json!({ "template": "foo" }));
}

#[tokio::test]
async fn auth_url_route_ignores_case() {
    let relay = start_byoo_relay().await;
    let resp = client()
        .get(relay.url("/authURL?template=foo"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let auth_url = resp.text().await.unwrap();
    assert!(
        auth_url.starts_with("https://login.salesforce.com/services/oauth2/authorize?"),
        "{auth_url}"
    );
    let state: serde_json::Value = serde_json::from_str(&state_param(&auth_url)).unwrap();
    assert_eq!(state, serde_json::json!({ "template": "foo" }));
}

#[tokio::test]
async fn auth_url_rejects_non_http_login_host() {
    let relay = start_byoo_relay().await;
    let resp = client()
        .get(relay.url("/authUrl"))
        .query(&[("base_url", "javascript:alert(1)"), ("template", "foo")])
        .send()
        .await
        .unwrap();
    assert!(!error_message(&location(&resp)).is_empty());
}

#[tokio::test]
async fn login_round_trip_queues_request_with_org_credentials() {
    let login_host = start_login_host().await;
    let relay = start_byoo_relay().await;
    let http = client();
    let base_url = format!("http://{login_host}");

    let auth_url = http
        .get(relay.url("/authUrl"))
        .query(&[
            ("template", "https://github.com/acme/app"),
            ("base_url", base_url.as_str()),
        ])
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(auth_url.starts_with(&format!("http://{login_host}/services/oauth2/authorize?")));

    // The provider sends the browser back with the code and the untouched state.
    let state = state_param(&auth_url);
    let resp = http
        .get(relay.url("/token"))
        .query(&[("code", GOOD_CODE), ("state", state.as_str())])
        .send()
        .await
        .unwrap();

    let loc = location(&resp);
    let deploy_id = loc
        .strip_prefix("/deploying/deployer/")
        .unwrap_or_else(|| panic!("unexpected redirect {loc}"));

    let queued = relay.queue().take_next().await.unwrap().unwrap();
    assert_eq!(queued.deploy_id, deploy_id);
    assert_eq!(queued.template, "https://github.com/acme/app");
    let creds = queued.credentials.expect("byoo request without credentials");
    assert_eq!(creds.access_token, ACCESS_TOKEN);
    assert_eq!(creds.instance_url, INSTANCE);
    assert_eq!(creds.org_id, ORG_ID);
    assert_eq!(creds.username, USER_ID);
}

#[tokio::test]
async fn rejected_code_redirects_to_error() {
    let login_host = start_login_host().await;
    let relay = start_byoo_relay().await;
    let state = serde_json::json!({
        "template": "acme/app",
        "base_url": format!("http://{login_host}")
    })
    .to_string();

    let resp = client()
        .get(relay.url("/token"))
        .query(&[("code", "expired-code"), ("state", state.as_str())])
        .send()
        .await
        .unwrap();

    let msg = error_message(&location(&resp));
    assert!(msg.contains("invalid_grant"), "{msg}");
    assert!(relay.queue().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn unparsable_state_redirects_to_error() {
    let relay = start_byoo_relay().await;
    let resp = client()
        .get(relay.url("/token"))
        .query(&[("code", GOOD_CODE), ("state", "{template: foo")])
        .send()
        .await
        .unwrap();

    let msg = error_message(&location(&resp));
    assert!(!msg.is_empty());
    assert!(relay.queue().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn missing_code_redirects_to_error() {
    let relay = start_byoo_relay().await;
    let resp = client()
        .get(relay.url("/token"))
        .query(&[("state", "{\"template\":\"acme/app\"}")])
        .send()
        .await
        .unwrap();
    let msg = error_message(&location(&resp));
    assert!(msg.contains("code"), "{msg}");
}

#[tokio::test]
async fn unreachable_login_host_redirects_to_error() {
    let relay = start_byoo_relay().await;
    // Bind then drop a listener to get a port with nothing behind it.
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };
    let state = serde_json::json!({
        "template": "acme/app",
        "base_url": format!("http://{dead}")
    })
    .to_string();

    let resp = client()
        .get(relay.url("/token"))
        .query(&[("code", GOOD_CODE), ("state", state.as_str())])
        .send()
        .await
        .unwrap();
    let msg = error_message(&location(&resp));
    assert!(msg.starts_with("OAuth provider error"), "{msg}");
}
