//! Server configuration from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// How the admin console is served next to the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMode {
    /// Forward unmatched requests to the console's dev server.
    Proxy { target: String },
    /// Serve a built console from disk.
    Static { dir: String },
    Disabled,
}

impl FrontendMode {
    /// `ADMINHUB_FRONTEND_MODE` picks the mode (`proxy`, `static`, anything else disables).
    /// `ADMINHUB_PROXY_TARGET` and `ADMINHUB_STATIC_DIR` override the dev-server URL and the
    /// build directory.
    pub fn from_env() -> Self {
        Self::from_parts(
            std::env::var("ADMINHUB_FRONTEND_MODE").ok().as_deref(),
            std::env::var("ADMINHUB_PROXY_TARGET").ok(),
            std::env::var("ADMINHUB_STATIC_DIR").ok(),
        )
    }

    fn from_parts(mode: Option<&str>, target: Option<String>, dir: Option<String>) -> Self {
        match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            Some("proxy") => FrontendMode::Proxy {
                target: target.unwrap_or_else(|| DEFAULT_CONSOLE_DEV_SERVER.to_string()),
            },
            Some("static") => FrontendMode::Static {
                dir: dir.unwrap_or_else(|| DEFAULT_CONSOLE_DIR.to_string()),
            },
            _ => FrontendMode::Disabled,
        }
    }
}

const DEFAULT_CONSOLE_DEV_SERVER: &str = "http://localhost:5173";
const DEFAULT_CONSOLE_DIR: &str = "./public";

/// Where connect/disconnect events are mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceBackend {
    Aurora,
    Memory,
    Disabled,
}

impl FromStr for PresenceBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "aurora" => Ok(PresenceBackend::Aurora),
            "memory" => Ok(PresenceBackend::Memory),
            "disabled" | "off" | "none" => Ok(PresenceBackend::Disabled),
            other => Err(format!("unknown presence backend: {other}")),
        }
    }
}

/// Timing and sizing limits applied to every hub connection.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Deadline for a single socket write.
    pub write_wait: Duration,
    /// Idle-read deadline, extended each time a pong arrives.
    pub pong_wait: Duration,
    /// Keepalive ping interval; always below `pong_wait`.
    pub ping_period: Duration,
    /// Largest inbound frame or message accepted, in bytes.
    pub max_frame_size: usize,
    /// Outbound buffer capacity per client, in frames.
    pub send_buffer: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_frame_size: 512 * 1024,
            send_buffer: 256,
        }
    }
}

impl HubConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            write_wait: Duration::from_secs(env_or(
                "ADMINHUB_WRITE_WAIT_SECS",
                defaults.write_wait.as_secs(),
            )),
            max_frame_size: env_or("ADMINHUB_MAX_FRAME_BYTES", defaults.max_frame_size),
            send_buffer: env_or("ADMINHUB_SEND_BUFFER", defaults.send_buffer).max(1),
            ..defaults
        }
        .with_pong_wait(Duration::from_secs(env_or(
            "ADMINHUB_PONG_WAIT_SECS",
            defaults.pong_wait.as_secs(),
        )))
    }

    /// Set the idle-read deadline and derive the keepalive interval (9/10 of it).
    pub fn with_pong_wait(mut self, pong_wait: Duration) -> Self {
        self.pong_wait = pong_wait;
        self.ping_period = pong_wait * 9 / 10;
        self
    }
}

/// Process-wide settings read once at start-up.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub db_path: String,
    /// HS256 secret for access tokens; a random one is generated when unset.
    pub jwt_secret: Option<String>,
    pub presence: PresenceBackend,
    pub presence_sweep: Duration,
    pub presence_ttl: Duration,
    pub frontend: FrontendMode,
    pub json_logs: bool,
    pub hub: HubConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env_or("ADMINHUB_BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080))),
            db_path: std::env::var("ADMINHUB_DB_PATH")
                .unwrap_or_else(|_| "adminhub_data".to_string()),
            jwt_secret: std::env::var("ADMINHUB_JWT_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),
            presence: env_or("ADMINHUB_PRESENCE", PresenceBackend::Aurora),
            presence_sweep: Duration::from_secs(env_or("ADMINHUB_PRESENCE_SWEEP_SECS", 300)),
            presence_ttl: Duration::from_secs(env_or("ADMINHUB_PRESENCE_TTL_SECS", 600)),
            frontend: FrontendMode::from_env(),
            json_logs: env_or("ADMINHUB_JSON_LOGS", false),
            hub: HubConfig::from_env(),
        }
    }
}

/// Read and parse `key`, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
