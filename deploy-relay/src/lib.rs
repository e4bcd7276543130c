//! deploy-relay: accepts "deploy this template" requests from the browser,
//! queues them for the deploy worker and redirects to the status page.

pub mod analytics;
pub mod config;
pub mod db;
pub mod deploy_id;
pub mod error;
pub mod message;
pub mod oauth;
pub mod queue;
pub mod server;
pub mod web;

pub use error::RelayError;
pub use message::{Cds, DeployRequest, OrgCredentials};
pub use queue::Queue;
