//! BYOO ("bring your own org") OAuth bridge.
//!
//! Salesforce web-server flow: the browser is sent to the login host's
//! authorize endpoint with the caller's query parameters JSON-encoded in
//! `state`; the provider calls back on `/token` with a code, which is
//! exchanged here for an access token and the org identity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::config::ByooSettings;
use crate::error::RelayError;
use crate::message::OrgCredentials;

pub const DEFAULT_LOGIN_URL: &str = "https://login.salesforce.com";
pub const SCOPE: &str = "api id web openid";

/// Query parameters carried through the provider in `state`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
}

/// Encode the caller's full query map as the OAuth `state`.
pub fn encode_state(query: &BTreeMap<String, String>) -> Result<String, RelayError> {
    serde_json::to_string(query).map_err(|e| RelayError::BadRequest(e.to_string()))
}

pub fn decode_state(raw: &str) -> Result<LoginState, RelayError> {
    serde_json::from_str(raw).map_err(RelayError::BadState)
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    instance_url: String,
    /// Identity URL: `https://<login host>/id/<org id>/<user id>`.
    id: String,
}

#[derive(Debug, Clone)]
pub struct OAuthClient {
    login_url: Url,
    settings: ByooSettings,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Client for the given login host; blank or missing means production.
    pub fn new(settings: ByooSettings, base_url: Option<&str>) -> Result<Self, RelayError> {
        let raw = base_url
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_LOGIN_URL);
        let login_url = Url::parse(raw)
            .map_err(|e| RelayError::BadRequest(format!("invalid base_url {raw}: {e}")))?;
        if !matches!(login_url.scheme(), "http" | "https") || login_url.host_str().is_none() {
            return Err(RelayError::BadRequest(format!("invalid base_url {raw}")));
        }
        Ok(Self {
            login_url,
            settings,
            http: reqwest::Client::new(),
        })
    }

    pub fn login_url(&self) -> &Url {
        &self.login_url
    }

    fn endpoint(&self, name: &str) -> Result<Url, RelayError> {
        let base = self.login_url.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/services/oauth2/{name}"))
            .map_err(|e| RelayError::BadRequest(format!("invalid login url: {e}")))
    }

    pub fn authorization_url(&self, state: &str) -> Result<String, RelayError> {
        let mut url = self.endpoint("authorize")?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("scope", SCOPE)
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange an authorization code for org credentials.
    pub async fn authorize(&self, code: &str) -> Result<OrgCredentials, RelayError> {
        let token_url = self.endpoint("token")?;
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
        ];

        let resp = self
            .http
            .post(token_url)
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Provider(format!(
                "token exchange failed ({status}): {text}"
            )));
        }
        let token: TokenResponse = resp.json().await?;
        let (org_id, user_id) = parse_identity_url(&token.id)?;

        tracing::info!(org_id = %org_id, instance = %token.instance_url, "BYOO login completed");
        Ok(OrgCredentials {
            access_token: token.access_token,
            instance_url: token.instance_url,
            org_id,
            username: user_id,
        })
    }
}

/// Split an identity URL into `(org id, user id)`.
pub fn parse_identity_url(identity: &str) -> Result<(String, String), RelayError> {
    let malformed = || RelayError::Provider(format!("malformed identity url: {identity}"));
    let url = Url::parse(identity).map_err(|_| malformed())?;
    let segments: Vec<&str> = url.path_segments().ok_or_else(malformed)?.collect();
    let pos = segments.iter().rposition(|s| *s == "id").ok_or_else(malformed)?;
    match segments.get(pos + 1..pos + 3) {
        Some([org, user]) if !org.is_empty() && !user.is_empty() => {
            Ok((org.to_string(), user.to_string()))
        }
        _ => Err(malformed()),
    }
}
