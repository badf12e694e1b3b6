//! Resource ceilings for running kernels.
//!
//! Enforcement is a capability: exactly one [`ResourceLimiter`] is active,
//! chosen by [`default_limiter`] when the supervisor is built.
//!
//! | Platform | Implementation | Memory | CPU |
//! |---|---|---|---|
//! | Linux | [`CgroupLimiter`] | `memory.max` / `memory.limit_in_bytes` | `cpu.max` / `cpu.cfs_quota_us` |
//! | other Unix | [`NiceLimiter`] | not enforced | nice 10 |
//! | elsewhere | [`NoopLimiter`] | not enforced | not enforced |

use std::fs;
use std::path::{Path, PathBuf};

use kfleet_types::FleetError;
use tracing::{debug, info, warn};

use crate::config::SupervisorConfig;

/// CFS bandwidth period; quotas are expressed against it.
pub const CPU_PERIOD_US: u64 = 100_000;

/// Niceness applied when priority is the only CPU control available.
pub const LOW_PRIORITY_NICE: i32 = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Parsed limits
// ─────────────────────────────────────────────────────────────────────────────

/// Validated ceilings ready for enforcement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceLimits {
    pub memory_bytes: Option<u64>,
    pub cpu_fraction: Option<f64>,
}

impl ResourceLimits {
    /// Parse the caller's raw request.  Malformed values are dropped with a
    /// warning instead of failing the spawn.
    pub fn from_request(memory: Option<&str>, cpu: Option<f64>) -> Self {
        let memory_bytes = memory.and_then(|raw| {
            let parsed = parse_memory_limit(raw);
            if parsed.is_none() {
                warn!(memory_limit = raw, "ignoring malformed memory limit");
            }
            parsed
        });
        let cpu_fraction = cpu.and_then(|fraction| {
            if fraction.is_finite() && fraction > 0.0 {
                Some(fraction)
            } else {
                warn!(cpu_limit = fraction, "ignoring non-positive cpu limit");
                None
            }
        });
        Self {
            memory_bytes,
            cpu_fraction,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.memory_bytes.is_none() && self.cpu_fraction.is_none()
    }

    /// CFS quota in microseconds per [`CPU_PERIOD_US`].
    pub fn cpu_quota_us(&self) -> Option<u64> {
        self.cpu_fraction
            .map(|fraction| ((fraction * CPU_PERIOD_US as f64).round() as u64).max(1))
    }
}

/// Parse `"512M"`, `"1G"`, `"750K"`, `"2gb"` or a bare byte count.
///
/// Units are binary (`K` = 1024) and case-insensitive; a trailing `B` is
/// allowed.  Returns `None` for anything else.
pub fn parse_memory_limit(raw: &str) -> Option<u64> {
    let upper = raw.trim().to_ascii_uppercase();
    let digits_end = upper
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(upper.len());
    if digits_end == 0 {
        return None;
    }
    let value: u64 = upper[..digits_end].parse().ok()?;
    let unit = upper[digits_end..].strip_suffix('B').unwrap_or(&upper[digits_end..]);
    let multiplier: u64 = match unit {
        "" => 1,
        "K" => 1 << 10,
        "M" => 1 << 20,
        "G" => 1 << 30,
        "T" => 1 << 40,
        _ => return None,
    };
    value.checked_mul(multiplier)
}

// ─────────────────────────────────────────────────────────────────────────────
// Capability interface
// ─────────────────────────────────────────────────────────────────────────────

/// Applies [`ResourceLimits`] to a running process.
pub trait ResourceLimiter: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Enforce `limits` on `pid`.
    ///
    /// # Errors
    ///
    /// [`FleetError::ResourceLimitApplyFailure`] when the OS rejects any part
    /// of the request.
    fn apply(&self, pid: u32, limits: &ResourceLimits) -> Result<(), FleetError>;
}

/// The limiter for the platform this binary was built for.
pub fn default_limiter(config: &SupervisorConfig) -> Box<dyn ResourceLimiter> {
    #[cfg(target_os = "linux")]
    {
        Box::new(CgroupLimiter::new(&config.cgroup_root, &config.cgroup_group))
    }
    #[cfg(all(unix, not(target_os = "linux")))]
    {
        let _ = config;
        Box::new(NiceLimiter)
    }
    #[cfg(not(unix))]
    {
        let _ = config;
        Box::new(NoopLimiter)
    }
}

fn failure(pid: u32, reason: impl Into<String>) -> FleetError {
    FleetError::ResourceLimitApplyFailure {
        pid,
        reason: reason.into(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// cgroups
// ─────────────────────────────────────────────────────────────────────────────

/// Per-process control groups under `<root>/<group>/<pid>`.
///
/// Uses the unified (v2) hierarchy when `<root>/cgroup.controllers` exists,
/// the per-controller v1 layout otherwise.
#[derive(Debug, Clone)]
pub struct CgroupLimiter {
    root: PathBuf,
    group: String,
}

impl CgroupLimiter {
    pub fn new(root: impl AsRef<Path>, group: impl Into<String>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            group: group.into(),
        }
    }

    fn is_unified(&self) -> bool {
        self.root.join("cgroup.controllers").exists()
    }

    fn apply_v2(&self, pid: u32, limits: &ResourceLimits) -> Result<(), FleetError> {
        let parent = self.root.join(&self.group);
        let dir = parent.join(pid.to_string());
        fs::create_dir_all(&dir).map_err(|e| failure(pid, format!("{}: {e}", dir.display())))?;

        // Controllers must be delegated to children before their files appear.
        let controllers = parent.join("cgroup.subtree_control");
        if let Err(e) = fs::write(&controllers, "+memory +cpu") {
            debug!(path = %controllers.display(), error = %e, "could not delegate controllers");
        }

        if let Some(bytes) = limits.memory_bytes {
            write_control(pid, &dir.join("memory.max"), &bytes.to_string())?;
        }
        if let Some(quota) = limits.cpu_quota_us() {
            write_control(pid, &dir.join("cpu.max"), &format!("{quota} {CPU_PERIOD_US}"))?;
        }
        write_control(pid, &dir.join("cgroup.procs"), &pid.to_string())
    }

    fn apply_v1(&self, pid: u32, limits: &ResourceLimits) -> Result<(), FleetError> {
        if let Some(bytes) = limits.memory_bytes {
            let dir = self.v1_dir("memory", pid)?;
            write_control(pid, &dir.join("memory.limit_in_bytes"), &bytes.to_string())?;
            write_control(pid, &dir.join("tasks"), &pid.to_string())?;
        }
        if let Some(quota) = limits.cpu_quota_us() {
            let dir = self.v1_dir("cpu", pid)?;
            write_control(pid, &dir.join("cpu.cfs_period_us"), &CPU_PERIOD_US.to_string())?;
            write_control(pid, &dir.join("cpu.cfs_quota_us"), &quota.to_string())?;
            write_control(pid, &dir.join("tasks"), &pid.to_string())?;
        }
        Ok(())
    }

    fn v1_dir(&self, controller: &str, pid: u32) -> Result<PathBuf, FleetError> {
        let dir = self
            .root
            .join(controller)
            .join(&self.group)
            .join(pid.to_string());
        fs::create_dir_all(&dir).map_err(|e| failure(pid, format!("{}: {e}", dir.display())))?;
        Ok(dir)
    }
}

fn write_control(pid: u32, path: &Path, value: &str) -> Result<(), FleetError> {
    fs::write(path, value).map_err(|e| failure(pid, format!("writing {}: {e}", path.display())))
}

impl ResourceLimiter for CgroupLimiter {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn apply(&self, pid: u32, limits: &ResourceLimits) -> Result<(), FleetError> {
        if limits.is_empty() {
            return Ok(());
        }
        let unified = self.is_unified();
        if unified {
            self.apply_v2(pid, limits)?;
        } else {
            self.apply_v1(pid, limits)?;
        }
        info!(
            pid,
            memory_bytes = limits.memory_bytes,
            cpu_fraction = limits.cpu_fraction,
            cgroup_v2 = unified,
            "resource limits applied"
        );
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scheduling priority
// ─────────────────────────────────────────────────────────────────────────────

/// Lowers scheduling priority for CPU limits; memory limits are not
/// enforceable this way.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct NiceLimiter;

#[cfg(unix)]
impl ResourceLimiter for NiceLimiter {
    fn name(&self) -> &'static str {
        "nice"
    }

    fn apply(&self, pid: u32, limits: &ResourceLimits) -> Result<(), FleetError> {
        if limits.memory_bytes.is_some() {
            debug!(pid, "memory limit not enforceable on this platform");
        }
        if limits.cpu_fraction.is_none() {
            return Ok(());
        }
        // `who == 0` would renice the supervisor itself.
        if pid == 0 {
            return Err(failure(pid, "refusing to renice PID 0"));
        }
        // SAFETY: `setpriority(2)` takes three integers by value and touches
        // no caller memory, so no argument value can cause undefined
        // behaviour.  `PRIO_PROCESS` with a non-zero `who` affects only that
        // process.  errno is read on this thread right after the call.
        let rc = unsafe {
            libc::setpriority(libc::PRIO_PROCESS, libc::id_t::from(pid), LOW_PRIORITY_NICE)
        };
        if rc != 0 {
            return Err(failure(pid, format!("setpriority: {}", std::io::Error::last_os_error())));
        }
        info!(pid, nice = LOW_PRIORITY_NICE, "lowered kernel priority");
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// No-op
// ─────────────────────────────────────────────────────────────────────────────

/// Accepts every request and enforces nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLimiter;

impl ResourceLimiter for NoopLimiter {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn apply(&self, pid: u32, limits: &ResourceLimits) -> Result<(), FleetError> {
        if !limits.is_empty() {
            debug!(pid, "resource limits not supported on this platform");
        }
        Ok(())
    }
}
