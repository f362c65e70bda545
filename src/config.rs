use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub slack_webhook_url: Option<String>,
    /// Comma-separated list of webhook URLs notified on terminal transitions.
    pub webhook_urls: Vec<String>,
    /// Shared secret for HMAC-signing webhook payloads.
    pub webhook_secret: Option<String>,
    /// Default approval timeout when a create request does not set one.
    /// Set via DEPLOYGATE_DEFAULT_TIMEOUT_SECS. Default: 1800.
    pub default_timeout_seconds: i64,
    /// Per-request decision lock TTL. Independent of the approval timeout.
    /// Set via DEPLOYGATE_LOCK_TIMEOUT_SECS. Default: 60.
    pub lock_timeout_seconds: u64,
    /// Interval of the overdue-approval sweep job.
    /// Set via DEPLOYGATE_SWEEP_INTERVAL_SECS. Default: 60.
    pub sweep_interval_seconds: u64,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    let default_timeout_seconds = std::env::var("DEPLOYGATE_DEFAULT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1800);
    if default_timeout_seconds <= 0 {
        anyhow::bail!(
            "DEPLOYGATE_DEFAULT_TIMEOUT_SECS must be positive, got {}",
            default_timeout_seconds
        );
    }

    Ok(Config {
        port: std::env::var("DEPLOYGATE_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/deploygate".into()),
        slack_webhook_url: std::env::var("DEPLOYGATE_SLACK_WEBHOOK_URL").ok(),
        webhook_urls: std::env::var("DEPLOYGATE_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: std::env::var("DEPLOYGATE_WEBHOOK_SECRET").ok(),
        default_timeout_seconds,
        lock_timeout_seconds: std::env::var("DEPLOYGATE_LOCK_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
        sweep_interval_seconds: std::env::var("DEPLOYGATE_SWEEP_INTERVAL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60),
    })
}
