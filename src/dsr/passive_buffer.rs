//! Record of packets overheard in promiscuous mode.
use crate::network::Time;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq)]
pub struct PassiveBuffEntry {
    /// Hash identifying the packet across hops.
    pub identification: String,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub segments_left: u8,
    pub expire: Time,
}

impl PassiveBuffEntry {
    fn same_packet(&self, other: &PassiveBuffEntry) -> bool {
        self.identification == other.identification
            && self.source == other.source
            && self.destination == other.destination
            && self.segments_left == other.segments_left
    }
}

#[derive(Debug)]
pub struct PassiveBuffer {
    max_len: usize,
    entries: Vec<PassiveBuffEntry>,
}

impl PassiveBuffer {
    pub fn new(max_len: usize) -> PassiveBuffer {
        PassiveBuffer {
            max_len,
            entries: Vec::new(),
        }
    }

    /// Records an overheard packet. Returns false if the same packet was already overheard.
    pub fn enqueue(&mut self, entry: PassiveBuffEntry, now: Time) -> bool {
        self.purge(now);
        if self.entries.iter().any(|e| e.same_packet(&entry)) {
            return false;
        }
        if self.entries.len() >= self.max_len && !self.entries.is_empty() {
            self.entries.remove(0);
        }
        self.entries.push(entry);
        true
    }

    pub fn purge(&mut self, now: Time) {
        self.entries.retain(|e| e.expire >= now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
