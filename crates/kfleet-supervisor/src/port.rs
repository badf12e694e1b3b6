//! Port allocation and readiness probing.
//!
//! Allocation is advisory: a probe bind succeeding now does not stop another
//! process from taking the port before the kernel binds it.  Readiness
//! confirmation after launch closes that gap for the supervisor.

use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use kfleet_types::{FleetError, Registry};
use tracing::trace;

/// Connect timeout used for each readiness attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Find the first bindable port at or above `hint` (or the registry's
/// `next_port` cursor), below `upper_bound`.
///
/// Ports claimed by registry records are skipped even if they happen to be
/// bindable, so two records never share a port.
///
/// # Errors
///
/// [`FleetError::PortExhausted`] when the scan reaches `upper_bound`.
pub fn find_free_port(
    registry: &Registry,
    hint: Option<u16>,
    upper_bound: u16,
) -> Result<u16, FleetError> {
    let start = hint.unwrap_or(registry.next_port);
    (start..upper_bound)
        .find(|&port| !registry.port_in_use(port) && port_is_free(port))
        .ok_or(FleetError::PortExhausted {
            start,
            upper: upper_bound,
        })
}

/// `true` when a listener can bind `port` on all interfaces right now.
pub fn port_is_free(port: u16) -> bool {
    let free = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).is_ok();
    trace!(port, free, "probed port");
    free
}

/// `true` when something accepts TCP connections on `127.0.0.1:port`.
pub fn port_accepts(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A port the OS just handed out, released again.
    fn ephemeral_port() -> u16 {
        TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn occupied_port_is_skipped() {
        let occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();

        let registry = Registry::new(port);
        let found = find_free_port(&registry, None, u16::MAX).unwrap();
        assert!(found > port, "occupied port {port} must not be returned");
    }

    #[test]
    fn hint_overrides_cursor() {
        let port = ephemeral_port();
        let registry = Registry::new(1);
        let found = find_free_port(&registry, Some(port), u16::MAX).unwrap();
        assert!(found >= port);
    }

    #[test]
    fn scan_stops_at_upper_bound() {
        let occupied = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0)).unwrap();
        let port = occupied.local_addr().unwrap().port();

        let registry = Registry::new(port);
        let err = find_free_port(&registry, None, port + 1).unwrap_err();
        assert!(matches!(
            err,
            FleetError::PortExhausted { start, upper } if start == port && upper == port + 1
        ));
    }

    #[test]
    fn empty_range_is_exhausted() {
        let registry = Registry::new(10_000);
        assert!(matches!(
            find_free_port(&registry, None, 10_000),
            Err(FleetError::PortExhausted { .. })
        ));
    }

    #[test]
    fn port_accepts_only_while_listening() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_accepts(port));
        drop(listener);
        assert!(!port_accepts(port));
    }
}
