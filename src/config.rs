use dotenvy::dotenv;
use std::env;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// ✅ Global Config stored in `OnceLock`
static CONFIG: OnceLock<Arc<Config>> = OnceLock::new();

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    /// Bounded wait between a committed assignment mutation and its
    /// post-validation pass, to let downstream booking linkage settle.
    pub settle_delay: Duration,
    /// Postgres NOTIFY channel carrying assignment row changes.
    pub change_feed_channel: String,
}

impl Config {
    /// ✅ Load environment variables and set defaults
    pub fn from_env() -> Self {
        dotenv().ok(); // Load .env only once

        let settle_ms = env::var("SETTLE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(1000);

        Self {
            database_url: env::var("DATABASE_URL").expect("DATABASE_URL must be set"),
            bind_addr: env::var("BIND_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:3000".to_string())
                .parse()
                .expect("BIND_ADDR must be a valid socket address"),
            settle_delay: Duration::from_millis(settle_ms),
            change_feed_channel: env::var("CHANGE_FEED_CHANNEL")
                .unwrap_or_else(|_| "staff_assignment_changes".to_string()),
        }
    }

    /// ✅ Initialize the global config
    pub fn init() {
        CONFIG
            .set(Arc::new(Self::from_env()))
            .expect("Config already initialized");
    }

    /// ✅ Safe access to Config
    pub fn get() -> Arc<Config> {
        CONFIG.get().expect("Config not initialized").clone()
    }
}
