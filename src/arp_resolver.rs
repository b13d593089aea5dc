//! ARP resolver/cache (spec §4.9): tracks `IPv4 -> MAC` mappings learned
//! from the wire, answers requests addressed to us, and keeps a gratuitous
//! announcement going while tunneling.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::l2::arp_packet::{ArpPacket, OP_REPLY, OP_REQUEST};
use crate::l2::ethernet::{EthernetFrame, ETHERTYPE_ARP};
use crate::mac::MacAddr;

const CACHE_TTL: Duration = Duration::from_secs(60);
const GRATUITOUS_INTERVAL: Duration = Duration::from_secs(30);
const MAX_PENDING_ATTEMPTS: u32 = 4;
const PENDING_RETRY_SPACING: Duration = Duration::from_secs(2);

struct CacheEntry {
    mac: MacAddr,
    age: Duration,
}

struct PendingResolve {
    attempts: u32,
    since_last_attempt: Duration,
}

pub struct ArpResolver {
    my_ip: Ipv4Addr,
    my_mac: MacAddr,
    cache: HashMap<Ipv4Addr, CacheEntry>,
    pending: HashMap<Ipv4Addr, PendingResolve>,
    running: bool,
    since_gratuitous: Duration,
}

impl ArpResolver {
    pub fn new(my_ip: Ipv4Addr, my_mac: MacAddr) -> Self {
        Self {
            my_ip,
            my_mac,
            cache: HashMap::new(),
            pending: HashMap::new(),
            running: false,
            since_gratuitous: Duration::ZERO,
        }
    }

    pub fn start(&mut self) -> Vec<u8> {
        self.running = true;
        self.since_gratuitous = Duration::ZERO;
        self.gratuitous_frame()
    }

    pub fn stop(&mut self) {
        self.running = false;
        self.cache.clear();
        self.pending.clear();
    }

    /// Resolve `ip`, returning `None` if unknown or the entry has expired.
    pub fn resolve(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.cache.get(&ip).and_then(|entry| {
            if entry.age < CACHE_TTL {
                Some(entry.mac)
            } else {
                None
            }
        })
    }

    /// Issue an ARP request for `ip`, unless it's already pending at the
    /// attempt cap. Idempotent: calling repeatedly for the same IP does not
    /// reset the attempt counter.
    pub fn request(&mut self, ip: Ipv4Addr) -> Option<Vec<u8>> {
        let pending = self.pending.entry(ip).or_insert(PendingResolve {
            attempts: 0,
            since_last_attempt: PENDING_RETRY_SPACING,
        });
        if pending.attempts >= MAX_PENDING_ATTEMPTS {
            return None;
        }
        if pending.since_last_attempt < PENDING_RETRY_SPACING {
            return None;
        }
        pending.attempts += 1;
        pending.since_last_attempt = Duration::ZERO;

        Some(self.request_frame(ip))
    }

    fn request_frame(&self, target_ip: Ipv4Addr) -> Vec<u8> {
        let arp = ArpPacket {
            operation: OP_REQUEST,
            sender_mac: self.my_mac,
            sender_ip: self.my_ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        };
        EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: self.my_mac,
            ethertype: ETHERTYPE_ARP,
            payload: arp.encode().to_vec(),
        }
        .encode()
    }

    fn gratuitous_frame(&self) -> Vec<u8> {
        let arp = ArpPacket {
            operation: OP_REPLY,
            sender_mac: self.my_mac,
            sender_ip: self.my_ip,
            target_mac: self.my_mac,
            target_ip: self.my_ip,
        };
        EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: self.my_mac,
            ethertype: ETHERTYPE_ARP,
            payload: arp.encode().to_vec(),
        }
        .encode()
    }

    /// Feed an incoming Ethernet frame. If it's an ARP request for us,
    /// returns the reply frame to send. Replies (ours or others') refresh
    /// the cache as a side effect.
    pub fn on_incoming(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let eth = EthernetFrame::decode(frame)?;
        if eth.ethertype != ETHERTYPE_ARP {
            return None;
        }
        let arp = ArpPacket::decode(&eth.payload)?;

        match arp.operation {
            OP_REQUEST if arp.target_ip == self.my_ip => {
                self.cache.insert(
                    arp.sender_ip,
                    CacheEntry {
                        mac: arp.sender_mac,
                        age: Duration::ZERO,
                    },
                );
                let reply = ArpPacket {
                    operation: OP_REPLY,
                    sender_mac: self.my_mac,
                    sender_ip: self.my_ip,
                    target_mac: arp.sender_mac,
                    target_ip: arp.sender_ip,
                };
                Some(
                    EthernetFrame {
                        dst: arp.sender_mac,
                        src: self.my_mac,
                        ethertype: ETHERTYPE_ARP,
                        payload: reply.encode().to_vec(),
                    }
                    .encode(),
                )
            }
            OP_REPLY => {
                self.cache.insert(
                    arp.sender_ip,
                    CacheEntry {
                        mac: arp.sender_mac,
                        age: Duration::ZERO,
                    },
                );
                self.pending.remove(&arp.sender_ip);
                None
            }
            _ => None,
        }
    }

    /// Advance internal clocks; returns a gratuitous announcement frame when
    /// due.
    pub fn on_tick(&mut self, dt: Duration) -> Option<Vec<u8>> {
        if !self.running {
            return None;
        }
        for entry in self.cache.values_mut() {
            entry.age += dt;
        }
        for pending in self.pending.values_mut() {
            pending.since_last_attempt += dt;
        }

        self.since_gratuitous += dt;
        if self.since_gratuitous >= GRATUITOUS_INTERVAL {
            self.since_gratuitous = Duration::ZERO;
            Some(self.gratuitous_frame())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_resolver() -> ArpResolver {
        ArpResolver::new(Ipv4Addr::new(10, 0, 0, 5), MacAddr([1, 2, 3, 4, 5, 6]))
    }

    /// S5: an ARP request for us must produce a reply to the requester.
    #[test]
    fn answers_request_for_our_ip() {
        let mut resolver = sample_resolver();
        resolver.start();

        let requester_mac = MacAddr([9, 9, 9, 9, 9, 9]);
        let request = ArpPacket {
            operation: OP_REQUEST,
            sender_mac: requester_mac,
            sender_ip: Ipv4Addr::new(10, 0, 0, 1),
            target_mac: MacAddr::ZERO,
            target_ip: Ipv4Addr::new(10, 0, 0, 5),
        };
        let frame = EthernetFrame {
            dst: MacAddr::BROADCAST,
            src: requester_mac,
            ethertype: ETHERTYPE_ARP,
            payload: request.encode().to_vec(),
        }
        .encode();

        let reply_frame = resolver.on_incoming(&frame).expect("must reply");
        let eth = EthernetFrame::decode(&reply_frame).unwrap();
        assert_eq!(eth.dst, requester_mac);
        let reply = ArpPacket::decode(&eth.payload).unwrap();
        assert_eq!(reply.operation, OP_REPLY);
        assert_eq!(reply.sender_ip, Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(reply.target_mac, requester_mac);

        assert_eq!(
            resolver.resolve(Ipv4Addr::new(10, 0, 0, 1)),
            Some(requester_mac)
        );
    }

    #[test]
    fn reply_refreshes_cache_without_reply_sent() {
        let mut resolver = sample_resolver();
        let other_mac = MacAddr([7, 7, 7, 7, 7, 7]);
        let reply = ArpPacket {
            operation: OP_REPLY,
            sender_mac: other_mac,
            sender_ip: Ipv4Addr::new(10, 0, 0, 9),
            target_mac: resolver.my_mac,
            target_ip: resolver.my_ip,
        };
        let frame = EthernetFrame {
            dst: resolver.my_mac,
            src: other_mac,
            ethertype: ETHERTYPE_ARP,
            payload: reply.encode().to_vec(),
        }
        .encode();

        assert!(resolver.on_incoming(&frame).is_none());
        assert_eq!(resolver.resolve(Ipv4Addr::new(10, 0, 0, 9)), Some(other_mac));
    }

    #[test]
    fn request_caps_pending_attempts() {
        let mut resolver = sample_resolver();
        let target = Ipv4Addr::new(10, 0, 0, 2);

        let mut sent = 0;
        for _ in 0..(MAX_PENDING_ATTEMPTS + 2) {
            if resolver.request(target).is_some() {
                sent += 1;
            }
            resolver.on_tick(PENDING_RETRY_SPACING);
        }
        assert_eq!(sent, MAX_PENDING_ATTEMPTS);
    }

    #[test]
    fn gratuitous_announcement_fires_on_schedule() {
        let mut resolver = sample_resolver();
        resolver.start();
        assert!(resolver.on_tick(GRATUITOUS_INTERVAL - Duration::from_secs(1)).is_none());
        assert!(resolver.on_tick(Duration::from_secs(1)).is_some());
    }

    #[test]
    fn cache_entry_expires_after_ttl() {
        let mut resolver = sample_resolver();
        resolver.cache.insert(
            Ipv4Addr::new(10, 0, 0, 9),
            CacheEntry {
                mac: MacAddr([1, 1, 1, 1, 1, 1]),
                age: Duration::ZERO,
            },
        );
        resolver.on_tick(CACHE_TTL + Duration::from_secs(1));
        assert_eq!(resolver.resolve(Ipv4Addr::new(10, 0, 0, 9)), None);
    }
}
