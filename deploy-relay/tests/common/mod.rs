//! Shared helpers for the HTTP acceptance tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use deploy_relay::analytics::Analytics;
use deploy_relay::config::RelayConfig;
use deploy_relay::queue::Queue;
use deploy_relay::server;
use deploy_relay::web::AppState;

pub const SHELL: &str = "<!DOCTYPE html><html><body><div id=\"main\"></div></body></html>";

pub struct TestRelay {
    pub addr: SocketAddr,
    pub state: Arc<AppState>,
    static_dir: tempfile::TempDir,
}

impl TestRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn queue(&self) -> &Queue {
        &self.state.queue
    }

    pub fn static_dir(&self) -> &std::path::Path {
        self.static_dir.path()
    }
}

/// Start a relay on an ephemeral port with an in-memory queue and a temp
/// static dir holding the app shell.
pub async fn start_relay_with(
    configure: impl FnOnce(&mut RelayConfig),
    analytics: Analytics,
) -> TestRelay {
    let static_dir = tempfile::tempdir().unwrap();
    std::fs::write(static_dir.path().join("index.html"), SHELL).unwrap();

    let mut config = RelayConfig {
        bind: "127.0.0.1".to_string(),
        port: 0,
        static_dir: static_dir.path().to_path_buf(),
        ..Default::default()
    };
    configure(&mut config);

    let state = Arc::new(AppState {
        config,
        queue: Queue::open_memory().unwrap(),
        analytics,
    });
    let (addr, _handle) = server::start_with_state(state.clone()).await.unwrap();
    TestRelay {
        addr,
        state,
        static_dir,
    }
}

pub async fn start_relay() -> TestRelay {
    start_relay_with(|_| {}, Analytics::disabled()).await
}

/// HTTP client that reports redirects instead of following them.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap()
}

pub fn location(resp: &reqwest::Response) -> String {
    assert!(
        resp.status().is_redirection(),
        "expected a redirect, got {}",
        resp.status()
    );
    resp.headers()
        .get(reqwest::header::LOCATION)
        .expect("redirect without Location")
        .to_str()
        .unwrap()
        .to_string()
}

/// Decoded `msg` of an `/error?msg=...` location.
pub fn error_message(location: &str) -> String {
    assert!(location.starts_with("/error?"), "not an error redirect: {location}");
    let url = url::Url::parse(&format!("http://relay{location}")).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "msg")
        .map(|(_, v)| v.into_owned())
        .expect("error redirect without msg")
}

/// Serve `app` on an ephemeral local port.
pub async fn spawn_stub(app: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}
