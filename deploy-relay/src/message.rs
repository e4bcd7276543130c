//! Deploy request records and the builder that produces them.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RelayError;

/// Access to a user's own org, obtained through the BYOO OAuth flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgCredentials {
    pub access_token: String,
    pub instance_url: String,
    pub org_id: String,
    pub username: String,
}

/// Analytics handle for the browser that made the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visitor {
    pub client_id: String,
}

/// One "deploy template X to org Y" unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub deploy_id: String,
    pub template: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<OrgCredentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor: Option<Visitor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Deploy status record. Published once the request is stored, then
/// updated by the worker as the deploy progresses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cds {
    pub deploy_id: String,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Cds {
    pub fn new(deploy_id: impl Into<String>) -> Self {
        Self {
            deploy_id: deploy_id.into(),
            complete: false,
            errors: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

/// Request data the builder reads from.
#[derive(Debug, Clone, Default)]
pub struct DeployInput {
    pub query: HashMap<String, String>,
    /// Posted body; only string values are read as fields.
    pub body: Map<String, Value>,
    /// Raw `Cookie` header, if any.
    pub cookies: Option<String>,
    pub credentials: Option<OrgCredentials>,
}

impl DeployInput {
    fn field(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .map(String::as_str)
            .or_else(|| self.body_field(name))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    fn body_field(&self, name: &str) -> Option<&str> {
        self.body.get(name).and_then(Value::as_str)
    }
}

/// Build a deploy request. The template is taken from the query string
/// first and the body second.
pub fn build(input: &DeployInput) -> Result<DeployRequest, RelayError> {
    let template = input.field("template").ok_or(RelayError::MissingTemplate)?;

    let email = input
        .body_field("email")
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let visitor = input
        .cookies
        .as_deref()
        .and_then(ga_client_id)
        .map(|client_id| Visitor { client_id });

    Ok(DeployRequest {
        deploy_id: crate::deploy_id::generate(),
        template: template.to_string(),
        created_at: Utc::now(),
        credentials: input.credentials.clone(),
        visitor,
        email,
    })
}

/// Client id from a Google Analytics `_ga` cookie (`GA1.2.<random>.<ts>`).
pub fn ga_client_id(cookie_header: &str) -> Option<String> {
    let value = cookie_header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == "_ga")
        .map(|(_, value)| value.trim())?;

    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() < 4 || parts[2..].iter().any(|p| p.is_empty()) {
        return None;
    }
    Some(parts[2..].join("."))
}
