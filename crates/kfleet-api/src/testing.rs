//! Supervisors for the API tests.

use std::fs;
use std::net::{Ipv4Addr, TcpListener};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use kfleet_supervisor::limits::NoopLimiter;
use kfleet_supervisor::{KernelLauncher, LaunchPlan, Supervisor, SupervisorConfig};
use kfleet_types::FleetError;

// Port ranges handed to listening supervisors, one per test.
static NEXT_BASE: AtomicU16 = AtomicU16::new(23_000);

/// Every spawn fails with `binary_not_found`.
pub(crate) fn supervisor_without_kernel(dir: &Path) -> Arc<Supervisor> {
    let config = SupervisorConfig {
        kernel_binary: "kfleet-no-such-kernel".into(),
        binary_search_paths: vec![],
        ..SupervisorConfig::default()
    };
    Arc::new(Supervisor::new(dir, config).with_limiter(NoopLimiter))
}

/// Spawns succeed: each kernel is a `sleep` child plus a local listener on
/// its port.
pub(crate) fn supervisor_with_kernels(dir: &Path) -> Arc<Supervisor> {
    let base = NEXT_BASE.fetch_add(20, Ordering::SeqCst);
    let config = SupervisorConfig {
        base_port: base,
        port_upper_bound: base + 20,
        pid_file_interval_ms: 20,
        ready_interval_ms: 20,
        ..SupervisorConfig::default()
    };
    Arc::new(
        Supervisor::new(dir, config)
            .with_launcher(ListeningLauncher::default())
            .with_limiter(NoopLimiter),
    )
}

#[derive(Default)]
struct ListeningLauncher {
    listeners: Mutex<Vec<TcpListener>>,
}

impl KernelLauncher for ListeningLauncher {
    fn resolve(&self) -> Result<PathBuf, FleetError> {
        Ok(PathBuf::from("sleep"))
    }

    fn launch(&self, _binary: &Path, plan: &LaunchPlan) -> Result<Option<u32>, FleetError> {
        let mut child = Command::new("sleep").arg("30").spawn()?;
        let pid = child.id();
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, plan.port))?;
        self.listeners.lock().unwrap().push(listener);
        fs::write(&plan.paths.connection_descriptor, "{}")?;
        fs::write(&plan.paths.pid_file, pid.to_string())?;
        Ok(Some(pid))
    }
}
