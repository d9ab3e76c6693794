//! `jobq config` - view and edit the persisted configuration.

use anyhow::{Context, Result, anyhow};
use jobq_core::config::{Config, StateDir};

/// Prints the effective configuration as JSON.
pub fn show(state_dir: &StateDir) -> Result<()> {
    let config = Config::load(&state_dir.config_path());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Validates and persists one configuration key.
pub fn set(state_dir: &StateDir, key: &str, value: &str) -> Result<()> {
    let value: u32 = value
        .parse()
        .map_err(|_| anyhow!("value for {key} must be a non-negative integer"))?;

    let mut config = Config::load(&state_dir.config_path());
    config.set(key, value)?;
    config
        .save(&state_dir.config_path())
        .context("failed to write config")?;

    println!("Set {key} = {value}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_set_persists_value() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());

        set(&state_dir, "max_retries", "5").unwrap();

        let config = Config::load(&state_dir.config_path());
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.backoff_base, 2);
    }

    #[test]
    fn test_set_rejects_unknown_key() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());
        assert!(set(&state_dir, "poll_interval", "1").is_err());
    }

    #[test]
    fn test_set_rejects_non_integer_value() {
        let dir = TempDir::new().unwrap();
        let state_dir = StateDir::at(dir.path());
        assert!(set(&state_dir, "max_retries", "lots").is_err());
    }
}
