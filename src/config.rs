
const PLACEHOLDER_SERVICE_KEY: &str = "CHANGE_ME_SERVICE_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Shared secret the fronting session provider presents on every call.
    pub service_key: String,
    /// Comma-separated list of webhook URLs notified on every decision.
    pub webhook_urls: Vec<String>,
    /// HMAC key for webhook signatures. Unsigned when absent.
    pub webhook_secret: Option<String>,
    /// Acting admin for CLI decisions when `--admin-id` is not given.
    pub admin_id: Option<i64>,
    pub log_json: bool,
    /// Window of the "recently decided" list, in days. Default: 30.
    pub recent_days: i64,
    /// Row cap of the "recently decided" list. Default: 50.
    pub recent_limit: i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            database_url: "postgres://localhost/qadesk".into(),
            service_key: PLACEHOLDER_SERVICE_KEY.into(),
            webhook_urls: Vec::new(),
            webhook_secret: None,
            admin_id: None,
            log_json: false,
            recent_days: 30,
            recent_limit: 50,
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    let defaults = Config::default();

    let service_key = std::env::var("QADESK_SERVICE_KEY")
        .unwrap_or_else(|_| PLACEHOLDER_SERVICE_KEY.into());

    if service_key == PLACEHOLDER_SERVICE_KEY {
        let env_mode = std::env::var("QADESK_ENV")
            .or_else(|_| std::env::var("RUST_ENV"))
            .unwrap_or_default();
        if env_mode == "production" {
            anyhow::bail!(
                "QADESK_SERVICE_KEY is still the insecure placeholder. \
                 Set a proper shared key before running in production."
            );
        }
        eprintln!("⚠️  QADESK_SERVICE_KEY is not set, using insecure placeholder.");
    }

    Ok(Config {
        port: std::env::var("QADESK_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.port),
        database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
        service_key,
        webhook_urls: std::env::var("QADESK_WEBHOOK_URLS")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
        webhook_secret: std::env::var("QADESK_WEBHOOK_SECRET")
            .ok()
            .filter(|s| !s.is_empty()),
        admin_id: std::env::var("QADESK_ADMIN_ID")
            .ok()
            .and_then(|v| v.parse().ok()),
        log_json: std::env::var("QADESK_LOG_JSON")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false),
        recent_days: std::env::var("QADESK_RECENT_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.recent_days),
        recent_limit: std::env::var("QADESK_RECENT_LIMIT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.recent_limit),
    })
}
