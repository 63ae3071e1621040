//! Packets waiting for a route to their destination.
use crate::dsr::wire::DsrPacket;
use crate::network::Time;
use std::collections::VecDeque;
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct SendBuffEntry {
    pub packet: DsrPacket,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub protocol: u8,
    pub expire: Time,
}

#[derive(Debug)]
pub struct SendBuffer {
    max_len: usize,
    entries: VecDeque<SendBuffEntry>,
}

impl SendBuffer {
    pub fn new(max_len: usize) -> SendBuffer {
        SendBuffer {
            max_len,
            entries: VecDeque::new(),
        }
    }

    /// Buffers a packet, evicting the oldest one when full. Returns the evicted entry.
    pub fn enqueue(&mut self, entry: SendBuffEntry, now: Time) -> Option<SendBuffEntry> {
        self.purge(now);
        let evicted = if self.entries.len() >= self.max_len {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    /// Oldest packet for `dst`.
    pub fn dequeue(&mut self, dst: Ipv4Addr, now: Time) -> Option<SendBuffEntry> {
        self.purge(now);
        let i = self.entries.iter().position(|e| e.destination == dst)?;
        self.entries.remove(i)
    }

    pub fn find(&self, dst: Ipv4Addr) -> bool {
        self.entries.iter().any(|e| e.destination == dst)
    }

    pub fn drop_packet_with_dst(&mut self, dst: Ipv4Addr) -> Vec<SendBuffEntry> {
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| e.destination == dst);
        self.entries = kept;
        dropped.into_iter().collect()
    }

    /// Removes packets that expired strictly before `now` and returns them.
    pub fn purge(&mut self, now: Time) -> Vec<SendBuffEntry> {
        let (expired, kept): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| e.expire < now);
        self.entries = kept;
        expired.into_iter().collect()
    }

    /// Distinct destinations with buffered packets, in arrival order.
    pub fn destinations(&self) -> Vec<Ipv4Addr> {
        let mut dsts: Vec<Ipv4Addr> = Vec::new();
        for e in &self.entries {
            if !dsts.contains(&e.destination) {
                dsts.push(e.destination);
            }
        }
        dsts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
