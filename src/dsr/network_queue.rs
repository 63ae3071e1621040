//! Output queue between the routing core and the link layer. Control packets always leave
//! before data packets; entries older than the maximum delay are dropped when dequeued.
use crate::network::Time;
use chrono::Duration;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketClass {
    Control,
    Data,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DsrNetworkQueueEntry {
    /// Serialized DSR packet.
    pub packet: Vec<u8>,
    pub source: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub ttl: u8,
    pub class: PacketClass,
    pub inserted: Time,
}

#[derive(Debug)]
pub struct DsrNetworkQueue {
    max_size: usize,
    max_delay: Duration,
    control: VecDeque<DsrNetworkQueueEntry>,
    data: VecDeque<DsrNetworkQueueEntry>,
    dropped: usize,
}

impl DsrNetworkQueue {
    pub fn new(max_size: usize, max_delay: Duration) -> DsrNetworkQueue {
        DsrNetworkQueue {
            max_size,
            max_delay,
            control: VecDeque::new(),
            data: VecDeque::new(),
            dropped: 0,
        }
    }

    /// Appends an entry. Fails when the queue is full.
    pub fn enqueue(&mut self, entry: DsrNetworkQueueEntry) -> bool {
        if self.len() >= self.max_size {
            self.dropped += 1;
            return false;
        }
        match entry.class {
            PacketClass::Control => self.control.push_back(entry),
            PacketClass::Data => self.data.push_back(entry),
        }
        true
    }

    /// Puts back at the head of its class an entry the link layer refused.
    pub fn requeue(&mut self, entry: DsrNetworkQueueEntry) {
        match entry.class {
            PacketClass::Control => self.control.push_front(entry),
            PacketClass::Data => self.data.push_front(entry),
        }
    }

    /// Next entry to transmit. Entries that waited longer than the maximum delay are dropped.
    pub fn dequeue(&mut self, now: Time) -> Option<DsrNetworkQueueEntry> {
        loop {
            let entry = match self.control.pop_front() {
                Some(e) => e,
                None => self.data.pop_front()?,
            };
            if now - entry.inserted > self.max_delay {
                self.dropped += 1;
                continue;
            }
            return Some(entry);
        }
    }

    pub fn drop_packets_with_next_hop(&mut self, next_hop: Ipv4Addr) -> usize {
        let before = self.len();
        self.control.retain(|e| e.next_hop != next_hop);
        self.data.retain(|e| e.next_hop != next_hop);
        let removed = before - self.len();
        self.dropped += removed;
        removed
    }

    pub fn len(&self) -> usize {
        self.control.len() + self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries dropped so far for being late, refused or flushed.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
