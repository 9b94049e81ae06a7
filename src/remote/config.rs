use crate::config::{env_flag, env_millis, env_opt, env_parse, env_path};
use crate::error::{CiviError, CiviResult};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP basic credentials for sites behind an htaccess login.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub user: String,
    pub password: String,
}

/// Configuration for the REST transport.
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Site URL or the full `extern/rest.php` endpoint.
    pub base_url: String,
    pub site_key: String,
    pub api_key: String,
    pub auth: Option<BasicAuth>,
    /// POST every call, not only `create`/`delete`.
    pub force_post: bool,
    pub debug: bool,
    pub verify_ssl: bool,
    /// Pack all parameters into a single `json` form field.
    pub json_params: bool,
    pub request_timeout: Duration,
}

impl RestConfig {
    pub fn new(
        base_url: impl Into<String>,
        site_key: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            site_key: site_key.into(),
            api_key: api_key.into(),
            auth: None,
            force_post: false,
            debug: false,
            verify_ssl: true,
            json_params: false,
            request_timeout: Duration::from_secs(60),
        }
    }

    pub fn from_env() -> CiviResult<Self> {
        let base_url = env_opt("CIVI_URL")
            .ok_or_else(|| CiviError::Config("CIVI_URL is required".into()))?;
        let site_key = env_opt("CIVI_SITE_KEY")
            .ok_or_else(|| CiviError::Config("CIVI_SITE_KEY is required".into()))?;
        let api_key = env_opt("CIVI_API_KEY")
            .ok_or_else(|| CiviError::Config("CIVI_API_KEY is required".into()))?;
        let auth = match (env_opt("CIVI_AUTH_USER"), env_opt("CIVI_AUTH_PASS")) {
            (Some(user), Some(password)) => Some(BasicAuth { user, password }),
            _ => None,
        };

        Ok(Self {
            base_url,
            site_key,
            api_key,
            auth,
            force_post: env_flag("CIVI_FORCE_POST", false),
            debug: env_flag("CIVI_DEBUG", false),
            verify_ssl: env_flag("CIVI_VERIFY_SSL", true),
            json_params: env_flag("CIVI_JSON_PARAMS", false),
            request_timeout: env_millis("CIVI_TIMEOUT_MS", 60_000),
        })
    }
}

/// Configuration for the drush transport.
#[derive(Debug, Clone)]
pub struct ShellConfig {
    pub drush_path: PathBuf,
    /// Drupal root passed with `-r`.
    pub root: PathBuf,
    pub site: String,
}

impl ShellConfig {
    pub fn from_env() -> Self {
        Self {
            drush_path: env_path("CIVI_DRUSH_PATH", "drush"),
            root: env_path("CIVI_DRUSH_ROOT", "."),
            site: env_opt("CIVI_DRUSH_SITE").unwrap_or_else(|| "default".to_string()),
        }
    }
}

/// Retry schedule for transient HTTP failures.
///
/// There is no "disabled" instance: a zero retry count yields `None` and the
/// caller is used without the retry layer.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub retry_on: Vec<u16>,
}

impl RetryPolicy {
    pub const DEFAULT_CODES: RangeInclusive<u16> = 500..=599;

    pub fn new(max_retries: u32, delay: Duration) -> Option<Self> {
        (max_retries > 0).then(|| Self {
            max_retries,
            delay,
            retry_on: Self::DEFAULT_CODES.collect(),
        })
    }

    pub fn from_env() -> Option<Self> {
        Self::new(
            env_parse("CIVI_RETRIES", 0_u32),
            env_millis("CIVI_RETRY_DELAY_MS", 1_000),
        )
    }

    pub fn with_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on = codes.into_iter().collect();
        self
    }

    pub fn should_retry(&self, err: &CiviError) -> bool {
        err.status_code()
            .is_some_and(|code| self.retry_on.contains(&code))
    }
}
