use std::path::{Path, PathBuf};
use std::time::Duration;

use facet::Facet;

use crate::accounts::DEFAULT_ACCOUNTS_ENDPOINT;
use crate::compute::rest::DEFAULT_COMPUTE_ENDPOINT;
use crate::error::GshError;
use crate::paths;
use crate::progress::OutputMode;
use crate::ssh_keys::{KeyBudget, MAX_METADATA_VALUE_SIZE_IN_BYTES, SSH_KEY_PROPAGATION_TIMEOUT_SECONDS};

/// Environment variable holding the OAuth bearer token for API calls.
pub const ACCESS_TOKEN_ENV: &str = "GSH_ACCESS_TOKEN";

#[derive(Debug, Clone, Default, Facet)]
#[facet(default)]
pub struct Config {
    #[facet(default)]
    pub core: CoreConfig,
    #[facet(default)]
    pub compute: ComputeConfig,
    #[facet(default)]
    pub ssh: SshConfig,
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct CoreConfig {
    #[facet(default)]
    pub project: String,
    /// Authenticated account email; the account service keys users by it.
    #[facet(default)]
    pub account: String,
    #[facet(default = "https://www.googleapis.com/clouduseraccounts/beta")]
    pub accounts_endpoint: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            project: String::new(),
            account: String::new(),
            accounts_endpoint: DEFAULT_ACCOUNTS_ENDPOINT.into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct ComputeConfig {
    #[facet(default)]
    pub zone: String,
    #[facet(default = "https://compute.googleapis.com/compute/v1")]
    pub api_endpoint: String,
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            zone: String::new(),
            api_endpoint: DEFAULT_COMPUTE_ENDPOINT.into(),
        }
    }
}

#[derive(Debug, Clone, Facet)]
#[facet(default)]
pub struct SshConfig {
    /// Private key path; empty means `~/.ssh/google_compute_engine`.
    #[facet(default)]
    pub key_file: String,
    #[facet(default)]
    pub use_account_service: bool,
    #[facet(default = "auto")]
    pub strict_host_key_checking: String,
    #[facet(default = 60)]
    pub propagation_timeout_s: u64,
    #[facet(default = 32768)]
    pub max_metadata_bytes: usize,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            key_file: String::new(),
            use_account_service: false,
            strict_host_key_checking: "auto".into(),
            propagation_timeout_s: SSH_KEY_PROPAGATION_TIMEOUT_SECONDS,
            max_metadata_bytes: MAX_METADATA_VALUE_SIZE_IN_BYTES,
        }
    }
}

/// `StrictHostKeyChecking` policy handed to ssh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyChecking {
    /// `yes` once the instance's host key is recorded, `no` before.
    Auto,
    Yes,
    No,
    Ask,
}

impl HostKeyChecking {
    fn parse(s: &str) -> Result<Self, GshError> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            "ask" => Ok(Self::Ask),
            other => Err(GshError::Validation {
                message: format!(
                    "ssh.strict_host_key_checking must be one of auto, yes, no, ask (got '{other}')"
                ),
            }),
        }
    }
}

// ── Context ───────────────────────────────────────────────

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub project: Option<String>,
    pub zone: Option<String>,
    pub access_token: Option<String>,
}

/// Everything an operation needs to know about who is calling and what it
/// targets. Built once per invocation and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Context {
    pub project: String,
    pub zone: String,
    pub account: Option<String>,
    pub access_token: Option<String>,
    pub use_account_service: bool,
    pub key_file: PathBuf,
    pub known_hosts_file: PathBuf,
    pub host_key_checking: HostKeyChecking,
    pub propagation_timeout: Duration,
    pub budget: KeyBudget,
    pub compute_endpoint: String,
    pub accounts_endpoint: String,
    pub mode: OutputMode,
}

impl Context {
    pub fn resolve(config: &Config, overrides: Overrides, mode: OutputMode) -> Result<Self, GshError> {
        let project = overrides
            .project
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| config.core.project.clone());
        if project.is_empty() {
            return Err(GshError::Validation {
                message: "no project set; pass --project or set core.project in the config".into(),
            });
        }
        let zone = overrides
            .zone
            .filter(|z| !z.is_empty())
            .unwrap_or_else(|| config.compute.zone.clone());
        if zone.is_empty() {
            return Err(GshError::Validation {
                message: "no zone set; pass --zone or set compute.zone in the config".into(),
            });
        }

        let key_file = if config.ssh.key_file.is_empty() {
            paths::default_key_file()
        } else {
            paths::expand_home(&config.ssh.key_file)
        };

        Ok(Self {
            project,
            zone,
            account: Some(config.core.account.clone()).filter(|a| !a.is_empty()),
            access_token: overrides
                .access_token
                .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
                .filter(|t| !t.is_empty()),
            use_account_service: config.ssh.use_account_service,
            key_file,
            known_hosts_file: paths::known_hosts_file(),
            host_key_checking: HostKeyChecking::parse(&config.ssh.strict_host_key_checking)?,
            propagation_timeout: Duration::from_secs(config.ssh.propagation_timeout_s),
            budget: KeyBudget {
                max_bytes: config.ssh.max_metadata_bytes,
            },
            compute_endpoint: config.compute.api_endpoint.clone(),
            accounts_endpoint: config.core.accounts_endpoint.clone(),
            mode,
        })
    }
}

// ── validation ────────────────────────────────────────────

fn validate_config(config: &Config) -> Result<(), GshError> {
    HostKeyChecking::parse(&config.ssh.strict_host_key_checking)?;

    if config.ssh.max_metadata_bytes == 0 {
        return Err(GshError::Validation {
            message: "ssh.max_metadata_bytes must be positive".into(),
        });
    }
    if config.ssh.max_metadata_bytes > MAX_METADATA_VALUE_SIZE_IN_BYTES {
        return Err(GshError::Validation {
            message: format!(
                "ssh.max_metadata_bytes cannot exceed the API limit of {MAX_METADATA_VALUE_SIZE_IN_BYTES}"
            ),
        });
    }

    for (name, url) in [
        ("compute.api_endpoint", &config.compute.api_endpoint),
        ("core.accounts_endpoint", &config.core.accounts_endpoint),
    ] {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            return Err(GshError::Validation {
                message: format!("{name} must be an http(s) URL (got '{url}')"),
            });
        }
    }

    if !config.core.account.is_empty() && !config.core.account.contains('@') {
        return Err(GshError::Validation {
            message: format!("core.account must be an email (got '{}')", config.core.account),
        });
    }

    Ok(())
}

// ── public API ────────────────────────────────────────────

pub fn parse_config(contents: &str, path: &Path) -> Result<Config, GshError> {
    let config: Config = facet_toml::from_str(contents).map_err(|e| GshError::ConfigParse {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config file.
///
/// An explicitly requested file must exist; the default location is
/// optional and falls back to built-in defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, GshError> {
    let path = match explicit {
        Some(p) => p.to_path_buf(),
        None => {
            let default = paths::config_path();
            if !default.exists() {
                tracing::debug!(path = %default.display(), "no config file, using defaults");
                return Ok(Config::default());
            }
            default
        }
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| GshError::ConfigLoad {
        path: path.display().to_string(),
        source,
    })?;
    parse_config(&contents, &path)
}
