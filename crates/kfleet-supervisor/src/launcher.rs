//! Kernel binary discovery and daemon launch.
//!
//! The real kernel daemonizes: the launched command forks, writes its PID
//! file and exits.  [`KernelLauncher`] is the seam between the spawn state
//! machine and that behaviour, so tests can substitute a scripted launcher.

use std::collections::BTreeMap;
use std::env;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use kfleet_types::FleetError;
use tracing::{debug, info};

use crate::config::SupervisorConfig;

// ─────────────────────────────────────────────────────────────────────────────
// Artifacts
// ─────────────────────────────────────────────────────────────────────────────

/// Files a kernel owns inside the fleet directory.
///
/// | artifact | path |
/// |---|---|
/// | PID file | `<fleet>/<id>.pid` |
/// | connection descriptor | `<fleet>/<id>.json` |
/// | log | `<fleet>/logs/<id>.log` |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub pid_file: PathBuf,
    pub connection_descriptor: PathBuf,
    pub log_file: PathBuf,
}

impl ArtifactPaths {
    pub fn for_kernel(fleet_dir: &Path, kernel_id: &str) -> Self {
        Self {
            pid_file: fleet_dir.join(format!("{kernel_id}.pid")),
            connection_descriptor: fleet_dir.join(format!("{kernel_id}.json")),
            log_file: fleet_dir.join("logs").join(format!("{kernel_id}.log")),
        }
    }
}

/// Everything a launcher needs to start one kernel.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub kernel_id: String,
    pub port: u16,
    pub paths: ArtifactPaths,
    /// Named config to forward, `None` for the kernel's built-in defaults.
    pub config_file: Option<PathBuf>,
    /// Added on top of the supervisor's own environment.
    pub env: BTreeMap<String, String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Launcher seam
// ─────────────────────────────────────────────────────────────────────────────

/// Starts kernel processes.
pub trait KernelLauncher: Send + Sync {
    /// Locate the kernel executable.
    fn resolve(&self) -> Result<PathBuf, FleetError>;

    /// Start a kernel for `plan` and return once the launcher itself has
    /// finished.  The kernel reports its PID through `plan.paths.pid_file`.
    ///
    /// Returns the PID of a still-running process started for `plan`, when
    /// the launcher knows one.  The supervisor kills it if the kernel never
    /// confirms its PID.
    fn launch(&self, binary: &Path, plan: &LaunchPlan) -> Result<Option<u32>, FleetError>;
}

/// Launches `<binary> <args…> --daemon …` and waits for the forking parent.
#[derive(Debug, Clone)]
pub struct DaemonLauncher {
    binary_name: String,
    args: Vec<String>,
    search_paths: Vec<PathBuf>,
}

impl DaemonLauncher {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            binary_name: config.kernel_binary.clone(),
            args: config.kernel_args.clone(),
            search_paths: config.binary_search_paths.clone(),
        }
    }

    /// The full command line for `plan`, not yet spawned.
    pub fn command(&self, binary: &Path, plan: &LaunchPlan) -> Command {
        let mut cmd = Command::new(binary);
        cmd.args(&self.args)
            .arg("--daemon")
            .arg("--port")
            .arg(plan.port.to_string())
            .arg("--connection-file")
            .arg(&plan.paths.connection_descriptor)
            .arg("--log-file")
            .arg(&plan.paths.log_file)
            .arg("--pid-file")
            .arg(&plan.paths.pid_file);
        if let Some(config) = &plan.config_file {
            cmd.arg("--config").arg(config);
        }
        cmd.envs(&plan.env)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }
}

impl KernelLauncher for DaemonLauncher {
    fn resolve(&self) -> Result<PathBuf, FleetError> {
        resolve_binary(&self.binary_name, &self.search_paths)
    }

    fn launch(&self, binary: &Path, plan: &LaunchPlan) -> Result<Option<u32>, FleetError> {
        if let Some(logs) = plan.paths.log_file.parent() {
            std::fs::create_dir_all(logs)?;
        }
        let mut cmd = self.command(binary, plan);
        debug!(kernel_id = %plan.kernel_id, command = ?cmd, "launching kernel");

        let output = cmd.output()?;
        if !output.status.success() {
            return Err(FleetError::LaunchFailed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        info!(kernel_id = %plan.kernel_id, port = plan.port, "kernel launcher returned");
        // The forking parent has exited; only the PID file names the daemon.
        Ok(None)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Binary discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Find `name` on `PATH`, then in each of `extra`.
///
/// A `name` containing a path separator is checked as-is.
///
/// # Errors
///
/// [`FleetError::BinaryNotFound`] listing every location tried.
pub fn resolve_binary(name: &str, extra: &[PathBuf]) -> Result<PathBuf, FleetError> {
    let direct = Path::new(name);
    if direct.components().count() > 1 {
        return if is_executable(direct) {
            Ok(direct.to_path_buf())
        } else {
            Err(FleetError::BinaryNotFound {
                name: name.to_string(),
                searched: vec![direct.to_path_buf()],
            })
        };
    }

    let path_dirs = env::var_os("PATH")
        .map(|raw| env::split_paths(&raw).collect::<Vec<_>>())
        .unwrap_or_default();

    let mut searched = Vec::new();
    for dir in path_dirs.iter().chain(extra) {
        let candidate = dir.join(name);
        if is_executable(&candidate) {
            debug!(binary = %candidate.display(), "resolved kernel binary");
            return Ok(candidate);
        }
        searched.push(candidate);
    }
    Err(FleetError::BinaryNotFound {
        name: name.to_string(),
        searched,
    })
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(dir: &Path) -> LaunchPlan {
        LaunchPlan {
            kernel_id: "kernel-abcd1234".into(),
            port: 9555,
            paths: ArtifactPaths::for_kernel(dir, "kernel-abcd1234"),
            config_file: None,
            env: BTreeMap::new(),
        }
    }

    #[test]
    fn artifact_layout() {
        let paths = ArtifactPaths::for_kernel(Path::new("/fleet"), "kernel-1");
        assert_eq!(paths.pid_file, PathBuf::from("/fleet/kernel-1.pid"));
        assert_eq!(paths.connection_descriptor, PathBuf::from("/fleet/kernel-1.json"));
        assert_eq!(paths.log_file, PathBuf::from("/fleet/logs/kernel-1.log"));
    }

    #[test]
    fn command_line_carries_daemon_flags() {
        let launcher = DaemonLauncher::from_config(&SupervisorConfig::default());
        let mut plan = plan(Path::new("/fleet"));
        plan.config_file = Some(PathBuf::from("configs/gpu.toml"));
        plan.env.insert("RUST_LOG".into(), "debug".into());

        let cmd = launcher.command(Path::new("/bin/llmspell"), &plan);
        let args: Vec<String> = cmd
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            args,
            [
                "kernel",
                "start",
                "--daemon",
                "--port",
                "9555",
                "--connection-file",
                "/fleet/kernel-abcd1234.json",
                "--log-file",
                "/fleet/logs/kernel-abcd1234.log",
                "--pid-file",
                "/fleet/kernel-abcd1234.pid",
                "--config",
                "configs/gpu.toml",
            ]
        );
        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(envs.len(), 1);
    }

    #[test]
    fn default_config_is_not_forwarded() {
        let launcher = DaemonLauncher::from_config(&SupervisorConfig::default());
        let cmd = launcher.command(Path::new("llmspell"), &plan(Path::new("/fleet")));
        assert!(!cmd.get_args().any(|a| a == std::ffi::OsStr::new("--config")));
    }

    #[test]
    fn missing_binary_lists_search_locations() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_binary("kfleet-no-such-kernel", &[dir.path().to_path_buf()]).unwrap_err();
        match err {
            FleetError::BinaryNotFound { name, searched } => {
                assert_eq!(name, "kfleet-no-such-kernel");
                assert!(searched.contains(&dir.path().join("kfleet-no-such-kernel")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn extra_search_path_is_used() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("kfleet-test-kernel");
        std::fs::write(&bin, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();

        let found = resolve_binary("kfleet-test-kernel", &[dir.path().to_path_buf()]).unwrap();
        assert_eq!(found, bin);
    }

    #[cfg(unix)]
    #[test]
    fn non_executable_file_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kfleet-plain"), "data").unwrap();
        assert!(resolve_binary("kfleet-plain", &[dir.path().to_path_buf()]).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn failing_launcher_reports_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = DaemonLauncher {
            binary_name: "sh".into(),
            args: vec!["-c".into(), "echo boom >&2; exit 3".into(), "sh".into()],
            search_paths: vec![],
        };
        let binary = launcher.resolve().unwrap();
        let err = launcher.launch(&binary, &plan(dir.path())).unwrap_err();
        match err {
            FleetError::LaunchFailed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {other}"),
        }
        assert!(dir.path().join("logs").is_dir());
    }
}
