//! Typed configuration, loaded from a `labbook.toml` in the LabBook working
//! directory's base, the way the teacher's `ShipperConfig` loads
//! `.shipper.toml` from the workspace root.

use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Options for the rotating detail log (spec.md §9 Design Notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailDbConfig {
    #[serde(default = "default_logfile_limit")]
    pub logfile_limit: u64,
    #[serde(default)]
    pub options: DetailDbOptions,
}

impl Default for DetailDbConfig {
    fn default() -> Self {
        Self {
            logfile_limit: default_logfile_limit(),
            options: DetailDbOptions::default(),
        }
    }
}

fn default_logfile_limit() -> u64 {
    4_000_000
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailDbOptions {
    #[serde(default)]
    pub compress: bool,
    #[serde(default = "default_compress_min_bytes")]
    pub compress_min_bytes: u64,
}

fn default_compress_min_bytes() -> u64 {
    1024
}

/// Lock manager behavior (spec.md §4.8, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    #[serde(with = "humantime_duration", default = "default_lock_timeout")]
    pub timeout: Duration,
    #[serde(with = "humantime_duration", default = "default_lock_expire")]
    pub expire: Duration,
    #[serde(default = "default_true")]
    pub auto_renewal: bool,
    #[serde(default)]
    pub strict: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout: default_lock_timeout(),
            expire: default_lock_expire(),
            auto_renewal: true,
            strict: false,
        }
    }
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_lock_expire() -> Duration {
    Duration::from_secs(60)
}

fn default_true() -> bool {
    true
}

/// LabBook Core behavior (spec.md §4.4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// When true, branches are shared (`gm.workspace`) rather than
    /// per-username (`gm.workspace-<username>`).
    #[serde(default)]
    pub team_mode: bool,
}

/// Repository Adapter defaults (spec.md §4.3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default = "default_remote")]
    pub default_remote: String,
    #[serde(default)]
    pub lfs_enabled: bool,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            default_remote: default_remote(),
            lfs_enabled: false,
        }
    }
}

fn default_remote() -> String {
    "origin".to_string()
}

/// Top-level configuration for a LabBook installation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabBookConfig {
    #[serde(default)]
    pub detaildb: DetailDbConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub core: CoreConfig,
    #[serde(default)]
    pub git: GitConfig,
}

impl LabBookConfig {
    /// Load from `<base>/labbook.toml`. Returns defaults if no file exists.
    pub fn load_from_base(base: &Path) -> Result<Self> {
        let config_path = base.join("labbook.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(&config_path)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.detaildb.logfile_limit == 0 {
            bail!("detaildb.logfile_limit must be greater than 0");
        }
        if self.lock.timeout.is_zero() {
            bail!("lock.timeout must be greater than 0");
        }
        if self.lock.expire.is_zero() {
            bail!("lock.expire must be greater than 0");
        }
        Ok(())
    }
}

mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let td = tempdir().unwrap();
        let config = LabBookConfig::load_from_base(td.path()).unwrap();
        assert_eq!(config.detaildb.logfile_limit, 4_000_000);
        assert_eq!(config.lock.timeout, Duration::from_secs(30));
    }

    #[test]
    fn parses_a_full_toml_document() {
        let td = tempdir().unwrap();
        std::fs::write(
            td.path().join("labbook.toml"),
            r#"
            [detaildb]
            logfile_limit = 1000000

            [detaildb.options]
            compress = true
            compress_min_bytes = 512

            [lock]
            timeout = "10s"
            expire = "20s"
            auto_renewal = false
            strict = true

            [core]
            team_mode = true

            [git]
            default_remote = "upstream"
            lfs_enabled = true
            "#,
        )
        .unwrap();

        let config = LabBookConfig::load_from_base(td.path()).unwrap();
        assert_eq!(config.detaildb.logfile_limit, 1_000_000);
        assert!(config.detaildb.options.compress);
        assert_eq!(config.lock.timeout, Duration::from_secs(10));
        assert!(!config.lock.auto_renewal);
        assert!(config.core.team_mode);
        assert_eq!(config.git.default_remote, "upstream");
    }

    #[test]
    fn rejects_zero_logfile_limit() {
        let td = tempdir().unwrap();
        std::fs::write(
            td.path().join("labbook.toml"),
            "[detaildb]\nlogfile_limit = 0\n",
        )
        .unwrap();
        assert!(LabBookConfig::load_from_base(td.path()).is_err());
    }
}
