//! Command-line and environment configuration.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::rate_limit::RateLimitConfig;
use crate::session_actor::Timeouts;

#[derive(Debug, Clone, Parser)]
#[command(name = "wabridge", version)]
#[command(about = "WhatsApp session relay for CRM front ends", long_about = None)]
pub struct Config {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 5000)]
    pub port: u16,

    /// Address to bind
    #[arg(long, env = "WABRIDGE_BIND", default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Front-end origin allowed by CORS
    #[arg(long, env = "CLIENT_URL", default_value = "http://localhost:3000")]
    pub client_url: String,

    /// Directory holding the built single-page app
    #[arg(long, env = "WABRIDGE_STATIC_DIR", default_value = "client/build")]
    pub static_dir: PathBuf,

    /// WebSocket URL of the automation driver
    #[arg(long, env = "WABRIDGE_SIDECAR_URL", default_value = "ws://127.0.0.1:5100")]
    pub sidecar_url: String,

    /// Client id the driver stores the default session's credentials under
    #[arg(long, env = "WABRIDGE_CLIENT_ID", default_value = "main")]
    pub client_id: String,

    #[arg(long, env = "WABRIDGE_STARTUP_TIMEOUT_SECS", default_value_t = 60)]
    pub startup_timeout_secs: u64,

    #[arg(long, env = "WABRIDGE_OPERATION_TIMEOUT_SECS", default_value_t = 30)]
    pub operation_timeout_secs: u64,

    /// Requests allowed per IP per window on `/api`
    #[arg(long, env = "WABRIDGE_RATE_LIMIT_MAX", default_value_t = 100)]
    pub rate_limit_max: u32,

    #[arg(long, env = "WABRIDGE_RATE_LIMIT_WINDOW_SECS", default_value_t = 900)]
    pub rate_limit_window_secs: u64,

    /// Sessions allowed at once; idle ones are dropped to make room
    #[arg(long, env = "WABRIDGE_MAX_SESSIONS", default_value_t = 256)]
    pub max_sessions: usize,

    /// Require `Authorization: Bearer <token>` (or `?token=`) on `/ws` and `/api`
    #[arg(long, env = "WABRIDGE_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Data directory (default: ~/.wabridge)
    #[arg(long, env = "WABRIDGE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,
}

impl Config {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            startup: Duration::from_secs(self.startup_timeout_secs),
            operation: Duration::from_secs(self.operation_timeout_secs),
        }
    }

    pub fn rate_limit(&self) -> RateLimitConfig {
        RateLimitConfig {
            max_requests: self.rate_limit_max,
            window: Duration::from_secs(self.rate_limit_window_secs),
        }
    }
}
