//! Server Configuration
//!
//! All configuration comes from environment variables with defaults matching
//! the deployed client's expectations. Unparseable values fall back to the
//! default rather than aborting startup.

use std::net::SocketAddr;

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP port for the combined HTTP/WebSocket listener.
    pub port: u16,
    /// Maximum concurrent connections from a single IP.
    pub max_connections_per_ip: usize,
    /// Maximum new connections per IP per second.
    pub connection_rate_limit: usize,
    /// Shared secret guarding the admin snapshot endpoint.
    ///
    /// The default is a deployment-time placeholder; operators are expected
    /// to override it.
    pub admin_password: String,
    /// Log level passed to the tracing subscriber when RUST_LOG is unset.
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5002,
            max_connections_per_ip: 10,
            connection_rate_limit: 5,
            admin_password: "thaasbai2024".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            max_connections_per_ip: env_parse(
                "MAX_CONNECTIONS_PER_IP",
                defaults.max_connections_per_ip,
            ),
            connection_rate_limit: env_parse(
                "CONNECTION_RATE_LIMIT",
                defaults.connection_rate_limit,
            ),
            admin_password: std::env::var("ADMIN_PASSWORD")
                .unwrap_or(defaults.admin_password),
            log_level: std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
        }
    }

    /// Bind address for the listener.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from(([0, 0, 0, 0], self.port))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
