use std::path::PathBuf;

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Default config file: `~/.config/gsh/config.toml`
pub fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| home().join(".config"))
        .join("gsh")
        .join("config.toml")
}

/// Default private key: `~/.ssh/google_compute_engine`
pub fn default_key_file() -> PathBuf {
    home().join(".ssh").join("google_compute_engine")
}

/// Host keys of Compute Engine instances, kept apart from `~/.ssh/known_hosts`
/// because instance IPs get recycled.
pub fn known_hosts_file() -> PathBuf {
    home().join(".ssh").join("google_compute_known_hosts")
}

/// Log directory: `~/.local/share/gsh/logs/`
pub fn logs_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("gsh")
        .join("logs")
}

/// Expand a leading `~/` in a configured path.
pub fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home().join(rest),
        None => PathBuf::from(path),
    }
}
