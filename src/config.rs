//! Configuration for the demo binary: a TOML file with CLI/env overrides.

use crate::client::ClientOptions;
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server address as `host:port`.
    pub uri: String,
    pub db: Option<String>,
    pub log_level: Option<String>,
    #[serde(default)]
    pub connect_timeout_ms: Option<u64>,
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    #[serde(default)]
    pub app_name: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Mongo's standard port locally
            uri: "127.0.0.1:27017".to_string(),
            db: None,
            log_level: None,
            connect_timeout_ms: Some(10_000),
            request_timeout_ms: None,
            app_name: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. If `path_opt` is None or the file is
    /// missing/unreadable, returns defaults. Parsing errors are returned.
    pub fn load_from_file(path_opt: Option<&str>) -> Result<Self> {
        let path = path_opt.unwrap_or("config.toml");
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(cfg) => Ok(cfg),
                Err(e) => Err(Error::Msg(format!("Failed to parse {}: {}", path, e))),
            },
            Err(_e) => Ok(Self::default()),
        }
    }

    /// Apply CLI/env overrides (highest precedence) to an existing config.
    pub fn with_overrides(
        mut self,
        uri: Option<String>,
        db: Option<String>,
        log_level: Option<String>,
        connect_timeout_ms: Option<u64>,
        request_timeout_ms: Option<u64>,
        app_name: Option<String>,
    ) -> Self {
        if let Some(uri) = uri {
            self.uri = uri;
        }
        if let Some(db) = db {
            self.db = Some(db);
        }
        if let Some(ll) = log_level {
            self.log_level = Some(ll);
        }
        if let Some(v) = connect_timeout_ms {
            self.connect_timeout_ms = Some(v);
        }
        if let Some(v) = request_timeout_ms {
            self.request_timeout_ms = Some(v);
        }
        if let Some(v) = app_name {
            self.app_name = Some(v);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.uri.is_empty() {
            return Err(Error::Msg("uri cannot be empty".to_string()));
        }
        let (host, port) = self
            .uri
            .rsplit_once(':')
            .ok_or_else(|| Error::Msg(format!("uri '{}' must be in host:port format", self.uri)))?;
        if host.is_empty() {
            return Err(Error::Msg(format!("uri '{}' has an empty host", self.uri)));
        }
        port.parse::<u16>()
            .map_err(|_| Error::Msg(format!("uri '{}' has an invalid port", self.uri)))?;
        if self.connect_timeout_ms == Some(0) {
            return Err(Error::Msg("connect_timeout_ms must be nonzero".to_string()));
        }
        Ok(())
    }

    pub fn host(&self) -> &str {
        self.uri.rsplit_once(':').map(|(h, _)| h).unwrap_or(&self.uri)
    }

    pub fn port(&self) -> u16 {
        self.uri
            .rsplit_once(':')
            .and_then(|(_, p)| p.parse().ok())
            .unwrap_or(27017)
    }

    /// Translate into the client's connection parameters.
    pub fn client_options(&self) -> ClientOptions {
        let mut options = ClientOptions::for_address(self.host(), self.port());
        if let Some(ms) = self.connect_timeout_ms {
            options.connect_timeout = Duration::from_millis(ms);
        }
        options.request_timeout = self.request_timeout_ms.map(Duration::from_millis);
        options.app_name = self.app_name.clone();
        options
    }
}
