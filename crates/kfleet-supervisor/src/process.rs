//! OS process probing and signalling by PID.
//!
//! Kernels daemonize, so the supervisor never holds a child handle for them.
//! Everything here works from a bare PID.  [`ProcessControl`] is the seam
//! the supervisor probes and signals through; [`OsProcesses`] is the real
//! one.

use kfleet_types::FleetError;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Signals the supervisor sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessSignal {
    /// Ask the kernel to shut down (SIGTERM).
    Terminate,
    /// Unconditional kill (SIGKILL).
    Kill,
}

/// Liveness probing and signal delivery.
pub trait ProcessControl: Send + Sync {
    /// `true` when `pid` names an existing, non-zombie process.
    fn is_alive(&self, pid: u32) -> bool;

    /// Deliver `signal` to `pid`.
    ///
    /// # Errors
    ///
    /// [`FleetError::ProcessAlreadyDead`] when the process does not exist;
    /// any other error means the signal could not be delivered.
    fn send_signal(&self, pid: u32, signal: ProcessSignal) -> Result<(), FleetError>;
}

/// The host's process table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsProcesses;

impl ProcessControl for OsProcesses {
    fn is_alive(&self, pid: u32) -> bool {
        is_alive(pid)
    }

    fn send_signal(&self, pid: u32, signal: ProcessSignal) -> Result<(), FleetError> {
        send_signal(pid, signal)
    }
}

/// A process table holding at most `pid`.
fn lookup(pid: u32) -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[Pid::from_u32(pid)]));
    system
}

fn is_zombie(pid: u32) -> bool {
    lookup(pid)
        .process(Pid::from_u32(pid))
        .is_some_and(|process| process.status() == ProcessStatus::Zombie)
}

#[cfg(unix)]
mod imp {
    use super::{ProcessSignal, is_zombie};
    use kfleet_types::FleetError;
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    fn to_pid(pid: u32) -> Option<Pid> {
        // PID 0 and negative values address process groups; never probe those.
        match i32::try_from(pid) {
            Ok(raw) if raw > 0 => Some(Pid::from_raw(raw)),
            _ => None,
        }
    }

    pub fn is_alive(pid: u32) -> bool {
        let Some(target) = to_pid(pid) else {
            return false;
        };
        match kill(target, None) {
            Ok(()) => !is_zombie(pid),
            // Exists, but belongs to someone else.
            Err(Errno::EPERM) => true,
            Err(_) => false,
        }
    }

    pub fn send(pid: u32, signal: ProcessSignal) -> Result<(), FleetError> {
        let Some(target) = to_pid(pid) else {
            return Err(FleetError::ProcessAlreadyDead(pid));
        };
        let sig = match signal {
            ProcessSignal::Terminate => Signal::SIGTERM,
            ProcessSignal::Kill => Signal::SIGKILL,
        };
        match kill(target, sig) {
            Ok(()) => Ok(()),
            Err(Errno::ESRCH) => Err(FleetError::ProcessAlreadyDead(pid)),
            Err(errno) => Err(FleetError::Io(std::io::Error::from(errno))),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::{ProcessSignal, is_zombie, lookup};
    use kfleet_types::FleetError;
    use sysinfo::Pid;

    pub fn is_alive(pid: u32) -> bool {
        lookup(pid).process(Pid::from_u32(pid)).is_some() && !is_zombie(pid)
    }

    pub fn send(pid: u32, _signal: ProcessSignal) -> Result<(), FleetError> {
        let system = lookup(pid);
        match system.process(Pid::from_u32(pid)) {
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(FleetError::Io(std::io::Error::other(format!(
                "could not signal process {pid}"
            )))),
            None => Err(FleetError::ProcessAlreadyDead(pid)),
        }
    }
}

/// `true` when `pid` names an existing, non-zombie process.
pub fn is_alive(pid: u32) -> bool {
    imp::is_alive(pid)
}

/// Deliver `signal` to `pid`.
///
/// # Errors
///
/// [`FleetError::ProcessAlreadyDead`] when the process does not exist;
/// [`FleetError::Io`] for anything else (typically a permission error).
pub fn send_signal(pid: u32, signal: ProcessSignal) -> Result<(), FleetError> {
    imp::send(pid, signal)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Command;
    use std::time::{Duration, Instant};

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id()));
        assert!(OsProcesses.is_alive(std::process::id()));
    }

    #[test]
    fn pid_zero_is_never_alive() {
        assert!(!is_alive(0));
        assert!(matches!(
            send_signal(0, ProcessSignal::Terminate),
            Err(FleetError::ProcessAlreadyDead(0))
        ));
    }

    #[test]
    fn reaped_child_is_dead_and_signal_reports_it() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        child.wait().expect("wait");
        assert!(!is_alive(pid));
        assert!(matches!(
            OsProcesses.send_signal(pid, ProcessSignal::Kill),
            Err(FleetError::ProcessAlreadyDead(_))
        ));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn unreaped_child_counts_as_dead() {
        let mut child = Command::new("true").spawn().expect("spawn true");
        let pid = child.id();
        // Let it exit without reaping it.
        let deadline = Instant::now() + Duration::from_secs(5);
        while !is_zombie(pid) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(is_zombie(pid), "exited child should be a zombie until reaped");
        assert!(!is_alive(pid), "zombies must not count as alive");
        child.wait().expect("wait");
        assert!(!is_zombie(pid));
    }

    #[test]
    fn running_process_is_not_a_zombie() {
        assert!(!is_zombie(std::process::id()));
    }

    #[test]
    fn terminate_stops_a_sleeping_child() {
        let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
        let pid = child.id();
        assert!(is_alive(pid));

        send_signal(pid, ProcessSignal::Terminate).expect("signal");
        child.wait().expect("wait");
        assert!(!is_alive(pid));
    }
}
