use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Duration,
};

use carelog_crypto::{KdfParams, ManagerOptions, UnlockPolicy, WritePolicy};
use color_eyre::{
    eyre::{eyre, WrapErr},
    Result,
};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

/// User-level configuration loaded from `~/.config/carelog/config.toml` (platform-specific).
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Override for the record directory.
    pub data_dir: Option<PathBuf>,
    /// `reject` (default) or `plaintext`.
    pub write_while_locked: WritePolicy,
    /// Argon2id costs for newly created passwords; existing hashes keep their own.
    pub kdf: KdfParams,
    pub unlock: UnlockConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct UnlockConfig {
    /// Wrong passwords allowed before a pause; `0` means unlimited.
    pub max_attempts: u32,
    pub lockout_secs: u64,
}

impl Default for UnlockConfig {
    fn default() -> Self {
        let policy = UnlockPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            lockout_secs: policy.lockout.as_secs(),
        }
    }
}

impl Config {
    pub fn manager_options(&self) -> ManagerOptions {
        ManagerOptions {
            kdf: self.kdf,
            unlock: UnlockPolicy {
                max_attempts: self.unlock.max_attempts,
                lockout: Duration::from_secs(self.unlock.lockout_secs),
            },
            write_policy: self.write_while_locked,
            ..ManagerOptions::default()
        }
    }
}

/// Read `config.toml` from the platform config dir. Without one, locked writes are
/// rejected, Argon2id runs at its stock costs and unlock allows five tries per 30 s.
pub fn load() -> Result<Config> {
    load_from_path(default_path()?)
}

/// Parse a config file; a missing or blank file yields [`Config::default`].
///
/// `[kdf]` costs Argon2 would refuse are reported here instead of at `carelog enable`.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => {
            return Err(err).wrap_err_with(|| format!("failed to read {}", path.display()))
        }
    };
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }

    let cfg: Config = toml::from_str(&contents)
        .wrap_err_with(|| format!("invalid carelog config at {}", path.display()))?;
    cfg.kdf
        .validate()
        .wrap_err_with(|| format!("unusable [kdf] section in {}", path.display()))?;
    Ok(cfg)
}

/// `<config_dir>/carelog/config.toml`. Records live elsewhere, under `data_dir`.
pub fn default_path() -> Result<PathBuf> {
    let base = config_dir().ok_or_else(|| eyre!("no config dir available"))?;
    Ok(base.join("carelog").join("config.toml"))
}

/// Write the given config to the default path unless a file is already there.
pub fn write_default_if_missing(config: &Config) -> Result<PathBuf> {
    write_to_path_if_missing(config, &default_path()?)
}

fn write_to_path_if_missing(config: &Config, path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return Ok(path.to_path_buf());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(config)?;
    fs::write(path, body)?;
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_default_when_missing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_from_path(dir.path().join("config.toml")).expect("load");
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.write_while_locked, WritePolicy::Reject);
    }

    #[test]
    fn parses_custom_config() {
        let contents = r#"
            data_dir = "/tmp/carelog-data"
            write_while_locked = "plaintext"
            [kdf]
            memory_kib = 65536
            iterations = 3
            [unlock]
            max_attempts = 0
        "#;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, contents).expect("write temp config");

        let cfg = load_from_path(&path).expect("load");
        assert_eq!(
            cfg,
            Config {
                data_dir: Some(PathBuf::from("/tmp/carelog-data")),
                write_while_locked: WritePolicy::Plaintext,
                kdf: KdfParams {
                    memory_kib: 65536,
                    iterations: 3,
                    parallelism: 1,
                },
                unlock: UnlockConfig {
                    max_attempts: 0,
                    lockout_secs: 30,
                },
            }
        );

        let options = cfg.manager_options();
        assert_eq!(options.unlock.max_attempts, 0);
        assert_eq!(options.write_policy, WritePolicy::Plaintext);
    }

    #[test]
    fn rejects_kdf_costs_argon2_cannot_run() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[kdf]\nmemory_kib = 1\n").expect("write temp config");

        let err = load_from_path(&path).expect_err("memory cost too small");
        assert!(err.to_string().contains("[kdf]"));
    }

    #[test]
    fn write_default_creates_file_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = Config {
            data_dir: Some(PathBuf::from("/tmp/carelog-data")),
            ..Config::default()
        };

        write_to_path_if_missing(&cfg, &path).expect("write should succeed");
        let untouched = Config::default();
        let second = write_to_path_if_missing(&untouched, &path).expect("second write ok");
        assert_eq!(second, path);
        let loaded = load_from_path(&path).expect("load");
        assert_eq!(loaded, cfg);
    }
}
