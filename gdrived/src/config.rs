use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use gdrive_core::validate_folder_id;

const DEFAULT_RETRY_LIMIT: u64 = 7;
const DEFAULT_PARALLEL_LIMIT: u64 = 20;
const DEFAULT_TIMEOUT_BASE_SECS: u64 = 7;
const DEFAULT_TIMEOUT_MAX_SECS: u64 = 60;
const DEFAULT_PAGE_SIZE: u64 = 1000;
const DEFAULT_PROGRESS_MS: u64 = 1000;
const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Primary OAuth identity used for calls that must run as the user.
#[derive(Clone, Debug)]
pub struct PrimaryCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub retry_limit: u32,
    pub parallel_limit: usize,
    pub timeout_base: Duration,
    pub timeout_max: Duration,
    pub page_size: u32,
    pub progress_interval: Duration,
    /// How long a cancelled command may keep running after Ctrl-C.
    pub shutdown_grace: Duration,
    pub default_target: Option<String>,
    pub db_path: Option<PathBuf>,
    pub identity_dir: Option<PathBuf>,
    pub primary: Option<PrimaryCredentials>,
    /// Fixed bearer token; takes precedence over `primary`.
    pub token: Option<String>,
    pub api_base_url: Option<String>,
    pub oauth_base_url: Option<String>,
    pub all_drives: bool,
    pub use_service_accounts: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry_limit: DEFAULT_RETRY_LIMIT as u32,
            parallel_limit: DEFAULT_PARALLEL_LIMIT as usize,
            timeout_base: Duration::from_secs(DEFAULT_TIMEOUT_BASE_SECS),
            timeout_max: Duration::from_secs(DEFAULT_TIMEOUT_MAX_SECS),
            page_size: DEFAULT_PAGE_SIZE as u32,
            progress_interval: Duration::from_millis(DEFAULT_PROGRESS_MS),
            shutdown_grace: Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECS),
            default_target: None,
            db_path: None,
            identity_dir: None,
            primary: None,
            token: None,
            api_base_url: None,
            oauth_base_url: None,
            all_drives: true,
            use_service_accounts: false,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let home = dirs::home_dir();
        let path = |name: &str| {
            lookup(name).map(|value| match &home {
                Some(home) => expand_with_home(&value, home),
                None => PathBuf::from(value),
            })
        };

        let default_target = lookup("GDRIVE_DEFAULT_TARGET").filter(|v| !v.trim().is_empty());
        if let Some(target) = &default_target
            && !validate_folder_id(target)
        {
            anyhow::bail!("GDRIVE_DEFAULT_TARGET is not a valid folder id: {target}");
        }

        let primary = match (
            lookup("GDRIVE_CLIENT_ID"),
            lookup("GDRIVE_CLIENT_SECRET"),
            lookup("GDRIVE_REFRESH_TOKEN"),
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => Some(PrimaryCredentials {
                client_id,
                client_secret,
                refresh_token,
            }),
            (None, None, None) => None,
            _ => anyhow::bail!(
                "GDRIVE_CLIENT_ID, GDRIVE_CLIENT_SECRET and GDRIVE_REFRESH_TOKEN must be set together"
            ),
        };

        let identity_dir = path("GDRIVE_SA_DIR");
        let use_service_accounts = read_bool(&lookup, "GDRIVE_USE_SA", identity_dir.is_some());
        if use_service_accounts && identity_dir.is_none() {
            anyhow::bail!("GDRIVE_USE_SA is enabled but GDRIVE_SA_DIR is not set");
        }

        let timeout_base = Duration::from_secs(read_u64(
            &lookup,
            "GDRIVE_TIMEOUT_BASE_SECS",
            DEFAULT_TIMEOUT_BASE_SECS,
        ));
        let timeout_max = Duration::from_secs(read_u64(
            &lookup,
            "GDRIVE_TIMEOUT_MAX_SECS",
            DEFAULT_TIMEOUT_MAX_SECS,
        ));

        Ok(Self {
            retry_limit: u32::try_from(read_u64(&lookup, "GDRIVE_RETRY_LIMIT", DEFAULT_RETRY_LIMIT))
                .context("GDRIVE_RETRY_LIMIT is too large")?,
            parallel_limit: usize::try_from(read_u64(
                &lookup,
                "GDRIVE_PARALLEL_LIMIT",
                DEFAULT_PARALLEL_LIMIT,
            ))
            .context("GDRIVE_PARALLEL_LIMIT is too large")?,
            timeout_base,
            timeout_max,
            page_size: read_u64(&lookup, "GDRIVE_PAGE_SIZE", DEFAULT_PAGE_SIZE)
                .min(gdrive_core::MAX_PAGE_SIZE as u64) as u32,
            progress_interval: Duration::from_millis(read_u64(
                &lookup,
                "GDRIVE_PROGRESS_MS",
                DEFAULT_PROGRESS_MS,
            )),
            shutdown_grace: Duration::from_secs(read_u64(
                &lookup,
                "GDRIVE_SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE_SECS,
            )),
            default_target,
            db_path: path("GDRIVE_DB_PATH"),
            identity_dir,
            primary,
            token: lookup("GDRIVE_TOKEN").filter(|v| !v.trim().is_empty()),
            api_base_url: lookup("GDRIVE_API_BASE_URL"),
            oauth_base_url: lookup("GDRIVE_OAUTH_BASE_URL"),
            all_drives: read_bool(&lookup, "GDRIVE_ALL_DRIVES", true),
            use_service_accounts,
        })
    }
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn read_bool<F>(lookup: &F, name: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        })
        .unwrap_or(default)
}
