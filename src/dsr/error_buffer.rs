//! Route errors waiting for a route back to the node they must reach.
use crate::dsr::wire::RouteErrorUnreach;
use crate::network::Time;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorBuffEntry {
    pub error: RouteErrorUnreach,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub unreach: Ipv4Addr,
    pub expire: Time,
}

#[derive(Debug)]
pub struct ErrorBuffer {
    max_len: usize,
    entries: Vec<ErrorBuffEntry>,
}

impl ErrorBuffer {
    pub fn new(max_len: usize) -> ErrorBuffer {
        ErrorBuffer {
            max_len,
            entries: Vec::new(),
        }
    }

    /// Buffers an error. Duplicates of a buffered error are rejected, as are errors beyond capacity.
    pub fn enqueue(&mut self, entry: ErrorBuffEntry, now: Time) -> bool {
        self.purge(now);
        let duplicate = self.entries.iter().any(|e| {
            e.destination == entry.destination
                && e.source == entry.source
                && e.unreach == entry.unreach
        });
        if duplicate || self.entries.len() >= self.max_len {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn dequeue(&mut self, dst: Ipv4Addr, now: Time) -> Option<ErrorBuffEntry> {
        self.purge(now);
        let i = self.entries.iter().position(|e| e.destination == dst)?;
        Some(self.entries.remove(i))
    }

    pub fn find(&self, dst: Ipv4Addr) -> bool {
        self.entries.iter().any(|e| e.destination == dst)
    }

    pub fn drop_packet_for_error_link(&mut self, source: Ipv4Addr, unreach: Ipv4Addr) {
        self.entries
            .retain(|e| !(e.source == source && e.unreach == unreach));
    }

    pub fn purge(&mut self, now: Time) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.expire >= now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
