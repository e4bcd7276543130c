//! Relay configuration, from flags or the environment.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "deploy-relay", about = "Queues template deploy requests for the deploy worker")]
pub struct RelayConfig {
    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8443)]
    pub port: u16,

    /// Interface to bind.
    #[arg(long, env = "RELAY_BIND", default_value = "0.0.0.0")]
    pub bind: String,

    /// OAuth redirect URI for the BYOO flow (default: http://localhost:<port>/token).
    #[arg(long, env = "BYOO_CALLBACK_URI")]
    pub byoo_callback_uri: Option<String>,

    /// Connected app consumer key.
    #[arg(long, env = "BYOO_CONSUMERKEY", default_value = "")]
    pub byoo_consumer_key: String,

    /// Connected app consumer secret.
    #[arg(long, env = "BYOO_SECRET", default_value = "", hide_env_values = true)]
    pub byoo_secret: String,

    /// Google Analytics tracking ID. Analytics is off when unset.
    #[arg(long, env = "UA_ID")]
    pub ua_id: Option<String>,

    /// SQLite file holding the deploy queue.
    #[arg(long, env = "RELAY_DB_PATH", default_value = "deploy-relay.db")]
    pub db_path: String,

    /// Directory with the built single-page app.
    #[arg(long, env = "RELAY_STATIC_DIR", default_value = "dist")]
    pub static_dir: PathBuf,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8443,
            bind: "0.0.0.0".to_string(),
            byoo_callback_uri: None,
            byoo_consumer_key: String::new(),
            byoo_secret: String::new(),
            ua_id: None,
            db_path: "deploy-relay.db".to_string(),
            static_dir: PathBuf::from("dist"),
        }
    }
}

/// Connected app settings shared by `/authUrl` and `/token`.
#[derive(Debug, Clone)]
pub struct ByooSettings {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

impl RelayConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn callback_uri(&self) -> String {
        self.byoo_callback_uri
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/token", self.port))
    }

    pub fn byoo(&self) -> ByooSettings {
        ByooSettings {
            client_id: self.byoo_consumer_key.clone(),
            client_secret: self.byoo_secret.clone(),
            redirect_uri: self.callback_uri(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_defaults_to_local_token_route() {
        let config = RelayConfig {
            port: 9000,
            ..Default::default()
        };
        assert_eq!(config.callback_uri(), "http://localhost:9000/token");
        assert_eq!(config.listen_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn explicit_callback_wins() {
        let config = RelayConfig {
            byoo_callback_uri: Some("https://deployer.example.com/token".into()),
            byoo_consumer_key: "key".into(),
            byoo_secret: "secret".into(),
            ..Default::default()
        };
        let byoo = config.byoo();
        assert_eq!(byoo.redirect_uri, "https://deployer.example.com/token");
        assert_eq!(byoo.client_id, "key");
        assert_eq!(byoo.client_secret, "secret");
    }

    #[test]
    fn flags_parse() {
        let config = RelayConfig::try_parse_from([
            "deploy-relay",
            "--port",
            "9100",
            "--static-dir",
            "/srv/app",
            "--ua-id",
            "UA-1234-1",
        ])
        .unwrap();
        assert_eq!(config.port, 9100);
        assert_eq!(config.static_dir, PathBuf::from("/srv/app"));
        assert_eq!(config.ua_id.as_deref(), Some("UA-1234-1"));
    }
}
