//! Port Map (C8, second half): host-port allocation backed by the
//! coordinator, double-checked against an actual TCP bind so a stale
//! coordinator record can never paper over a port genuinely in use.

use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;

use labbook_coordinator::Coordinator;
use labbook_types::{ErrorKind, LabBookKey, hostport_interface_key, hostport_labbook_key};

/// Number of consecutive ports tried before giving up, per spec.md §4.8.
const SCAN_WINDOW: u16 = 50;

pub struct PortMap<C: Coordinator> {
    coordinator: Arc<C>,
}

impl<C: Coordinator> PortMap<C> {
    pub fn new(coordinator: Arc<C>) -> Self {
        Self { coordinator }
    }

    /// Claim a free port starting at `desired_port` on `interface`. Writes
    /// both coordinator records before returning, so the two are never
    /// observed out of sync.
    pub fn assign(
        &self,
        labbook: &LabBookKey,
        interface: &str,
        desired_port: u16,
    ) -> Result<u16, ErrorKind> {
        for offset in 0..SCAN_WINDOW {
            let port = desired_port.wrapping_add(offset);
            if self.is_usable(interface, port)? {
                let iface_key = hostport_interface_key(interface, port);
                let labbook_key = hostport_labbook_key(labbook);
                let payload = serde_json::to_string(&(interface, port))
                    .map_err(|e| ErrorKind::internal(format!("serializing port assignment: {e}")))?;

                self.coordinator
                    .set(&iface_key, "1")
                    .map_err(|e| ErrorKind::internal(format!("recording port claim: {e}")))?;
                self.coordinator
                    .set(&labbook_key, &payload)
                    .map_err(|e| ErrorKind::internal(format!("recording labbook port mapping: {e}")))?;

                return Ok(port);
            }
        }

        Err(ErrorKind::conflict(format!(
            "no free port found in {SCAN_WINDOW} slots starting at {desired_port} on {interface}"
        )))
    }

    fn is_usable(&self, interface: &str, port: u16) -> Result<bool, ErrorKind> {
        let iface_key = hostport_interface_key(interface, port);
        let taken = self
            .coordinator
            .get(&iface_key)
            .map_err(|e| ErrorKind::internal(format!("checking port claim: {e}")))?
            .is_some();
        if taken {
            return Ok(false);
        }

        let addr: SocketAddr = format!("{interface}:{port}")
            .parse()
            .map_err(|e| ErrorKind::validation(format!("invalid interface/port {interface}:{port}: {e}")))?;
        Ok(TcpListener::bind(addr).is_ok())
    }

    /// Release a labbook's port assignment. The labbook mapping is deleted
    /// before the interface claim so the inverse (`hostport:<iface>:<port>`
    /// without a matching labbook mapping) never dangles.
    pub fn release(&self, labbook: &LabBookKey) -> Result<(), ErrorKind> {
        let (iface, port) = self.lookup_raw(labbook)?;
        if TcpListener::bind(format!("{iface}:{port}")).is_err() {
            return Err(ErrorKind::conflict(format!(
                "port {port} on {iface} is still bound; refusing to release"
            )));
        }

        let labbook_key = hostport_labbook_key(labbook);
        let iface_key = hostport_interface_key(&iface, port);
        self.coordinator
            .delete(&labbook_key)
            .map_err(|e| ErrorKind::internal(format!("releasing labbook port mapping: {e}")))?;
        self.coordinator
            .delete(&iface_key)
            .map_err(|e| ErrorKind::internal(format!("releasing port claim: {e}")))?;
        Ok(())
    }

    /// The (interface, port) a LabBook currently holds.
    pub fn lookup(&self, labbook: &LabBookKey) -> Result<(String, u16), ErrorKind> {
        self.lookup_raw(labbook)
    }

    fn lookup_raw(&self, labbook: &LabBookKey) -> Result<(String, u16), ErrorKind> {
        let labbook_key = hostport_labbook_key(labbook);
        let raw = self
            .coordinator
            .get(&labbook_key)
            .map_err(|e| ErrorKind::internal(format!("looking up port assignment: {e}")))?
            .ok_or_else(|| ErrorKind::not_found(format!("no port assignment for {labbook}")))?;
        serde_json::from_str(&raw)
            .map_err(|e| ErrorKind::internal(format!("parsing port assignment: {e}")))
    }

    /// Remove every `hostport:*` key, used on startup to recover from
    /// crashes that left stale claims behind.
    pub fn reset_all_ports(&self) -> Result<usize, ErrorKind> {
        self.coordinator
            .delete_prefix(labbook_types::HOSTPORT_PREFIX)
            .map_err(|e| ErrorKind::internal(format!("resetting port map: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use labbook_coordinator::InMemoryCoordinator;

    use super::*;

    fn labbook() -> LabBookKey {
        LabBookKey::new("alice", "alice", "proj")
    }

    #[test]
    fn assign_then_lookup_round_trips() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let map = PortMap::new(coordinator);
        let lb = labbook();

        let port = map.assign(&lb, "127.0.0.1", 18080).unwrap();
        let (iface, looked_up) = map.lookup(&lb).unwrap();
        assert_eq!(iface, "127.0.0.1");
        assert_eq!(looked_up, port);
    }

    #[test]
    fn assign_skips_a_port_already_claimed_in_the_coordinator() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let map = PortMap::new(Arc::clone(&coordinator));
        let lb1 = LabBookKey::new("alice", "alice", "proj1");
        let lb2 = LabBookKey::new("alice", "alice", "proj2");

        let first = map.assign(&lb1, "127.0.0.1", 18090).unwrap();
        let second = map.assign(&lb2, "127.0.0.1", 18090).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn release_requires_the_socket_to_actually_be_free() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let map = PortMap::new(coordinator);
        let lb = labbook();

        let port = map.assign(&lb, "127.0.0.1", 18100).unwrap();
        let _listener = TcpListener::bind(("127.0.0.1", port)).unwrap();
        let err = map.release(&lb).unwrap_err();
        assert!(matches!(err, ErrorKind::Conflict(_)));
    }

    #[test]
    fn release_then_lookup_fails_with_not_found() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let map = PortMap::new(coordinator);
        let lb = labbook();

        map.assign(&lb, "127.0.0.1", 18110).unwrap();
        map.release(&lb).unwrap();
        let err = map.lookup(&lb).unwrap_err();
        assert!(matches!(err, ErrorKind::NotFound(_)));
    }

    #[test]
    fn reset_all_ports_clears_every_hostport_key() {
        let coordinator = Arc::new(InMemoryCoordinator::new());
        let map = PortMap::new(Arc::clone(&coordinator));
        map.assign(&labbook(), "127.0.0.1", 18120).unwrap();

        let removed = map.reset_all_ports().unwrap();
        assert_eq!(removed, 2);
        assert!(coordinator.scan_prefix("hostport:").unwrap().is_empty());
    }
}
