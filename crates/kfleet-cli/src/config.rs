//! Operator configuration – reads/writes `~/.kfleet/config.toml`.
//!
//! ```toml
//! fleet_dir = "/home/me/.kfleet/fleet"
//! api_port = 9550
//!
//! [supervisor]
//! base_port = 9555
//! kernel_binary = "llmspell"
//! strict_limits = false
//!
//! [supervisor.alerts]
//! memory_mb = 1000.0
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use kfleet_api::DEFAULT_PORT;
use kfleet_supervisor::SupervisorConfig;
use serde::{Deserialize, Serialize};

/// Persisted operator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Where the registry, PID files, descriptors and logs live.
    #[serde(default = "default_fleet_dir")]
    pub fleet_dir: PathBuf,

    /// Port of `kfleet serve`.
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub supervisor: SupervisorConfig,
}

fn home_dir() -> PathBuf {
    PathBuf::from(
        std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

fn default_fleet_dir() -> PathBuf {
    home_dir().join(".kfleet").join("fleet")
}

fn default_api_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fleet_dir: default_fleet_dir(),
            api_port: default_api_port(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Return the path to `~/.kfleet/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

pub(crate) fn config_path_for_home(home: &Path) -> PathBuf {
    home.join(".kfleet").join("config.toml")
}

/// Load the config at `path` (or the default location), writing defaults
/// there on first run.  Environment overrides are applied either way.
pub fn resolve(path: Option<&Path>) -> Result<Config, String> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = match load_from(&path)? {
        Some(cfg) => cfg,
        None => {
            let cfg = Config::default();
            if let Err(e) = save_to(&cfg, &path) {
                tracing::warn!(path = %path.display(), error = %e, "could not write default config");
            } else {
                tracing::info!(path = %path.display(), "wrote default config");
            }
            cfg
        }
    };
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path.  Returns `None` if the file does
/// not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config at {}: {}", path.display(), e))?;
    Ok(Some(cfg))
}

/// Apply `KFLEET_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `KFLEET_DIR` | `fleet_dir` |
/// | `KFLEET_API_PORT` | `api_port` |
/// | `KFLEET_BASE_PORT` | `supervisor.base_port` |
/// | `KFLEET_KERNEL_BIN` | `supervisor.kernel_binary` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |key| std::env::var(key).ok());
}

/// [`apply_env_overrides`] over an arbitrary variable source.
pub(crate) fn apply_overrides(cfg: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(v) = var("KFLEET_DIR")
        && !v.is_empty()
    {
        cfg.fleet_dir = PathBuf::from(v);
    }
    if let Some(v) = var("KFLEET_API_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.api_port = port;
    }
    if let Some(v) = var("KFLEET_BASE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.supervisor.base_port = port;
    }
    if let Some(v) = var("KFLEET_KERNEL_BIN")
        && !v.is_empty()
    {
        cfg.supervisor.kernel_binary = v;
    }
}

/// Save the config to `path`, creating its directory if necessary.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Owner-only directory (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only file (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::io::Write;
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| f.write_all(raw.as_bytes()))
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(dir.path());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir metadata")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(dir.path());

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.api_port, 9550);
        assert_eq!(loaded.supervisor.base_port, 9555);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "api_port = 9999\n\n[supervisor]\nstrict_limits = true\n\n[supervisor.alerts]\ncpu_percent = 50.0\n",
        )
        .unwrap();

        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.api_port, 9999);
        assert!(cfg.supervisor.strict_limits);
        assert_eq!(cfg.supervisor.alerts.cpu_percent, 50.0);
        assert_eq!(cfg.supervisor.alerts.memory_mb, 1000.0);
        assert_eq!(cfg.supervisor.kernel_binary, "llmspell");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "api_port = \"nope\"").unwrap();
        assert!(load_from(&path).is_err());
    }

    #[test]
    fn resolve_writes_defaults_on_first_run() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("config.toml");
        let cfg = resolve(Some(&path)).expect("resolve");
        assert!(path.exists());
        assert_eq!(cfg.supervisor.pid_file_attempts, 10);
    }

    #[test]
    fn config_path_points_to_kfleet_dir() {
        let p = config_path_for_home(Path::new("/home/testuser"));
        assert_eq!(p, PathBuf::from("/home/testuser/.kfleet/config.toml"));
    }

    fn overridden(vars: &[(&str, &str)]) -> Config {
        let vars: std::collections::BTreeMap<&str, &str> = vars.iter().copied().collect();
        let mut cfg = Config::default();
        apply_overrides(&mut cfg, |key| vars.get(key).map(|v| v.to_string()));
        cfg
    }

    #[test]
    fn env_overrides_change_api_port() {
        assert_eq!(overridden(&[("KFLEET_API_PORT", "9700")]).api_port, 9700);
    }

    #[test]
    fn env_overrides_ignore_invalid_base_port() {
        let cfg = overridden(&[("KFLEET_BASE_PORT", "not-a-port")]);
        assert_eq!(cfg.supervisor.base_port, 9555);
    }

    #[test]
    fn env_overrides_change_kernel_binary_and_dir() {
        let cfg = overridden(&[
            ("KFLEET_KERNEL_BIN", "/opt/llmspell/bin/llmspell"),
            ("KFLEET_DIR", "/srv/fleet"),
        ]);
        assert_eq!(cfg.supervisor.kernel_binary, "/opt/llmspell/bin/llmspell");
        assert_eq!(cfg.fleet_dir, PathBuf::from("/srv/fleet"));
    }

    #[test]
    fn empty_env_values_are_ignored() {
        let cfg = overridden(&[("KFLEET_KERNEL_BIN", ""), ("KFLEET_DIR", "")]);
        assert_eq!(cfg, Config::default());
    }
}
