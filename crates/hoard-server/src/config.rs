use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::auth::AuthMode;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub owner_name: String,
    /// Largest accepted upload body per blob.
    pub max_upload_size: u64,
    #[serde(skip)]
    pub auth: AuthMode,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3179".parse().unwrap(),
            owner_name: String::new(),
            max_upload_size: hoard_store::MAX_BLOB_SIZE,
            auth: AuthMode::None,
        }
    }
}

impl ServerConfig {
    /// Apply the `CAMLI_AUTH` environment convention, when set.
    pub fn with_auth_from_env(mut self) -> Self {
        if let Ok(s) = std::env::var("CAMLI_AUTH") {
            match AuthMode::parse(&s) {
                Ok(mode) => self.auth = mode,
                Err(e) => tracing::warn!("ignoring CAMLI_AUTH: {e}"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = ServerConfig::default();
        assert_eq!(c.bind_addr, "127.0.0.1:3179".parse::<SocketAddr>().unwrap());
        assert_eq!(c.max_upload_size, 16 << 20);
        assert!(matches!(c.auth, AuthMode::None));
    }
}
