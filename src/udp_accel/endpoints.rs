//! Endpoint bookkeeping for UDP acceleration v2 (spec §4.8): the configured,
//! reported, and pinned destination addresses, and the fallback-send
//! ordering used when the primary path isn't confirmed ready yet.

use std::net::SocketAddr;

use crate::udp_accel::readiness::ReadinessTracker;

#[derive(Debug, Default)]
pub struct EndpointBook {
    /// The address from `SessionConfig`/Welcome that we dialed initially.
    pub configured: Option<SocketAddr>,
    /// The address the server told us it sees us as (`udp_reported_ip/port`).
    pub reported: Option<SocketAddr>,
    /// The address we've pinned to after observing traffic from it.
    pub pinned: Option<SocketAddr>,
}

impl EndpointBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `addr` as the active endpoint, subject to the readiness tracker's
    /// pinning gate.
    pub fn try_pin(&mut self, addr: SocketAddr, now_ms: u64, readiness: &mut ReadinessTracker) -> bool {
        if !readiness.can_pin_endpoint() {
            return false;
        }
        self.pinned = Some(addr);
        readiness.mark_endpoint_pinned(now_ms);
        true
    }

    /// The primary destination for outbound packets: pinned if we have one,
    /// else reported, else configured.
    pub fn primary(&self) -> Option<SocketAddr> {
        self.pinned.or(self.reported).or(self.configured)
    }

    /// Fallback destinations to additionally send to when not yet ready,
    /// excluding the primary and de-duplicated.
    pub fn fallbacks(&self) -> Vec<SocketAddr> {
        let primary = self.primary();
        let mut seen = Vec::new();
        for candidate in [self.pinned, self.reported, self.configured].into_iter().flatten() {
            if Some(candidate) != primary && !seen.contains(&candidate) {
                seen.push(candidate);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("10.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn primary_prefers_pinned_over_reported_over_configured() {
        let mut book = EndpointBook::new();
        book.configured = Some(addr(1));
        assert_eq!(book.primary(), Some(addr(1)));

        book.reported = Some(addr(2));
        assert_eq!(book.primary(), Some(addr(2)));

        book.pinned = Some(addr(3));
        assert_eq!(book.primary(), Some(addr(3)));
    }

    #[test]
    fn fallbacks_exclude_primary_and_dedup() {
        let mut book = EndpointBook::new();
        book.configured = Some(addr(1));
        book.reported = Some(addr(1)); // duplicate of configured
        book.pinned = Some(addr(3));

        let fallbacks = book.fallbacks();
        assert_eq!(fallbacks, vec![addr(1)]);
    }

    #[test]
    fn pin_respects_readiness_gate() {
        let mut book = EndpointBook::new();
        let mut readiness = ReadinessTracker::new();
        // Gate is closed until a packet has advanced last_received_server_tick.
        assert!(!book.try_pin(addr(5), 0, &mut readiness));
        assert!(book.pinned.is_none());

        readiness.on_packet(10, 10, 0);
        assert!(book.try_pin(addr(5), 10, &mut readiness));
        assert_eq!(book.pinned, Some(addr(5)));
    }
}
