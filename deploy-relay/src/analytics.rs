//! Google Analytics measurement-protocol hits.
//!
//! Disabled unless a tracking ID is configured. Hits are sent from a spawned
//! task; a failed hit is logged and never affects the request.

use crate::message::Visitor;

pub const COLLECT_URL: &str = "https://www.google-analytics.com/collect";

#[derive(Debug, Clone)]
pub struct Analytics {
    tracking_id: Option<String>,
    endpoint: String,
    http: reqwest::Client,
}

impl Analytics {
    pub fn new(tracking_id: Option<String>) -> Self {
        Self {
            tracking_id: tracking_id.filter(|id| !id.trim().is_empty()),
            endpoint: COLLECT_URL.to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Send hits somewhere other than Google (a local collector, tests).
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.tracking_id.is_some()
    }

    pub fn pageview(&self, visitor: &Visitor, path: &str) {
        self.send(
            &visitor.client_id,
            vec![("t", "pageview".to_string()), ("dp", path.to_string())],
        );
    }

    /// Record an event. Without a visitor the hit uses a throwaway client id.
    pub fn event(&self, visitor: Option<&Visitor>, category: &str, action: &str) {
        let anonymous;
        let client_id = match visitor {
            Some(v) => v.client_id.as_str(),
            None => {
                anonymous = crate::deploy_id::generate();
                anonymous.as_str()
            }
        };
        self.send(
            client_id,
            vec![
                ("t", "event".to_string()),
                ("ec", category.to_string()),
                ("ea", action.to_string()),
            ],
        );
    }

    fn send(&self, client_id: &str, hit: Vec<(&'static str, String)>) {
        let Some(tid) = &self.tracking_id else {
            return;
        };
        let mut params = vec![
            ("v", "1".to_string()),
            ("tid", tid.clone()),
            ("cid", client_id.to_string()),
        ];
        params.extend(hit);

        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        tokio::spawn(async move {
            match http.post(&endpoint).form(&params).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    tracing::warn!(status = %resp.status(), "analytics hit rejected");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "analytics hit failed"),
            }
        });
    }
}
