use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Placeholder JWT secrets that MUST NOT be used.
const PLACEHOLDER_SECRETS: &[&str] = &[
    "change-me-to-a-random-string",
    "dev-secret-change-me",
    "your_jwt_secret_here",
    "secret",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub jwt_secret: String,
    pub public_url: String,
    pub sweep_interval_secs: u64,
    pub max_upload_bytes: usize,
    pub allow_anonymous_delete: bool,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults; set but
    /// malformed values are an error rather than silently defaulted.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let jwt_secret = get("VANISH_JWT_SECRET").unwrap_or_default();
        if jwt_secret.is_empty() || PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) {
            bail!("VANISH_JWT_SECRET is unset or still a placeholder");
        }

        let port = match get("VANISH_PORT") {
            Some(v) => v.parse().with_context(|| format!("VANISH_PORT={:?}", v))?,
            None => 5000,
        };
        let sweep_interval_secs: u64 = match get("VANISH_SWEEP_INTERVAL_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("VANISH_SWEEP_INTERVAL_SECS={:?}", v))?,
            None => 300,
        };
        if sweep_interval_secs == 0 {
            bail!("VANISH_SWEEP_INTERVAL_SECS must be positive");
        }
        let max_upload_mb: usize = match get("VANISH_MAX_UPLOAD_MB") {
            Some(v) => v.parse().with_context(|| format!("VANISH_MAX_UPLOAD_MB={:?}", v))?,
            None => 100,
        };
        let allow_anonymous_delete = match get("VANISH_ALLOW_ANONYMOUS_DELETE").as_deref() {
            None | Some("false") | Some("0") => false,
            Some("true") | Some("1") => true,
            Some(other) => bail!("VANISH_ALLOW_ANONYMOUS_DELETE={:?} is not a boolean", other),
        };

        Ok(Self {
            host: get("VANISH_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            db_path: get("VANISH_DB_PATH").unwrap_or_else(|| "vanish.db".into()).into(),
            storage_dir: get("VANISH_STORAGE_DIR").unwrap_or_else(|| "./uploads".into()).into(),
            jwt_secret,
            public_url: get("VANISH_PUBLIC_URL").unwrap_or_else(|| "http://localhost:5173".into()),
            sweep_interval_secs,
            max_upload_bytes: max_upload_mb.saturating_mul(1024 * 1024),
            allow_anonymous_delete,
        })
    }
}
