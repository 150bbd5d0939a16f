use std::{env, time::Duration as StdDuration};

use chrono::Duration;
use jg_common::{helpers::parse_boolean_flag, Secret};
use journey_engine::dedup::DEFAULT_DEDUP_WINDOW_DAYS;
use log::*;

const DEFAULT_JG_HOST: &str = "127.0.0.1";
const DEFAULT_JG_PORT: u16 = 8460;
/// The header the provider uses to carry the HMAC-SHA256 signature of the raw body.
const DEFAULT_SIGNATURE_HEADER: &str = "X-Request-Signature-SHA-256";
const DEFAULT_BREAKER_ERROR_THRESHOLD: u32 = 5;
const DEFAULT_BREAKER_RESET_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_QUEUE_BUFFER: usize = 1024;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// The shared secret used to verify webhook signatures.
    pub webhook_secret: Secret<String>,
    /// The request header carrying the provider's HMAC signature.
    pub signature_header: String,
    /// If true, events with a missing or invalid signature are recorded as failed webhooks and never processed.
    /// The default trust model accepts them and records `signature_valid = false` for audit.
    pub enforce_signatures: bool,
    /// If true, the X-Forwarded-For header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_x_forwarded_for: bool,
    /// If true, the Forwarded header will be used to determine the client's IP address, rather than the
    /// connection's remote address.
    pub use_forwarded: bool,
    pub breaker_error_threshold: u32,
    pub breaker_reset_timeout: StdDuration,
    /// How long dedup cache entries are kept before the eviction sweep drops them.
    pub dedup_window: Duration,
    /// Cadence of the background abandonment sweep and dedup cache eviction.
    pub sweep_interval: StdDuration,
    /// Capacity of the receiver → pipeline handoff queue.
    pub queue_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_JG_HOST.to_string(),
            port: DEFAULT_JG_PORT,
            database_url: String::default(),
            webhook_secret: Secret::default(),
            signature_header: DEFAULT_SIGNATURE_HEADER.to_string(),
            enforce_signatures: false,
            use_x_forwarded_for: false,
            use_forwarded: false,
            breaker_error_threshold: DEFAULT_BREAKER_ERROR_THRESHOLD,
            breaker_reset_timeout: StdDuration::from_secs(DEFAULT_BREAKER_RESET_TIMEOUT_SECS),
            dedup_window: Duration::days(DEFAULT_DEDUP_WINDOW_DAYS),
            sweep_interval: StdDuration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            queue_buffer: DEFAULT_QUEUE_BUFFER,
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("JG_HOST").ok().unwrap_or_else(|| DEFAULT_JG_HOST.into());
        let port = env::var("JG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!("🪛️ {s} is not a valid port for JG_PORT. {e} Using the default, {DEFAULT_JG_PORT}, instead.");
                    DEFAULT_JG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_JG_PORT);
        let database_url = env::var("JG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ JG_DATABASE_URL is not set. Please set it to the URL for the journey gateway database.");
            String::default()
        });
        let webhook_secret = env::var("JG_WEBHOOK_SECRET").map(Secret::new).unwrap_or_else(|_| {
            warn!(
                "🚨️ JG_WEBHOOK_SECRET is not set. Signature checks will fail and every event will be recorded as \
                 unsigned. Set it to the shared secret configured with the provider."
            );
            Secret::default()
        });
        let signature_header =
            env::var("JG_SIGNATURE_HEADER").ok().unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string());
        let enforce_signatures = parse_boolean_flag(env::var("JG_ENFORCE_SIGNATURES").ok(), false);
        if enforce_signatures {
            info!("🪛️ Signature enforcement is enabled. Unsigned or badly signed events will not be processed.");
        }
        let use_x_forwarded_for = parse_boolean_flag(env::var("JG_USE_X_FORWARDED_FOR").ok(), false);
        let use_forwarded = parse_boolean_flag(env::var("JG_USE_FORWARDED").ok(), false);
        let breaker_error_threshold = parse_env_number("JG_BREAKER_ERROR_THRESHOLD", DEFAULT_BREAKER_ERROR_THRESHOLD);
        let breaker_reset_timeout = StdDuration::from_secs(parse_env_number(
            "JG_BREAKER_RESET_TIMEOUT_SECS",
            DEFAULT_BREAKER_RESET_TIMEOUT_SECS,
        ));
        let dedup_window = Duration::days(parse_env_number("JG_DEDUP_WINDOW_DAYS", DEFAULT_DEDUP_WINDOW_DAYS));
        let sweep_interval =
            StdDuration::from_secs(parse_env_number("JG_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS));
        let queue_buffer = parse_env_number("JG_QUEUE_BUFFER", DEFAULT_QUEUE_BUFFER);
        Self {
            host,
            port,
            database_url,
            webhook_secret,
            signature_header,
            enforce_signatures,
            use_x_forwarded_for,
            use_forwarded,
            breaker_error_threshold,
            breaker_reset_timeout,
            dedup_window,
            sweep_interval,
            queue_buffer,
        }
    }
}

fn parse_env_number<T: std::str::FromStr + Copy + std::fmt::Display>(var: &str, default: T) -> T {
    match env::var(var) {
        Ok(s) => s.parse::<T>().unwrap_or_else(|_| {
            warn!("🪛️ Invalid configuration value for {var} ({s}). Using the default, {default}.");
            default
        }),
        Err(_) => default,
    }
}

//-------------------------------------------------  ServerOptions  ----------------------------------------------------
/// A subset of the server configuration that handlers need per request. Kept as small as possible and free of
/// secrets so it can be passed around the app freely.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
    pub signature_header: String,
}

impl ServerOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            use_x_forwarded_for: config.use_x_forwarded_for,
            use_forwarded: config.use_forwarded,
            signature_header: config.signature_header.clone(),
        }
    }
}
