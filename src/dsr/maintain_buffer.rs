//! Packets sent towards a next hop and still waiting for a delivery confirmation.
//! Each entry is confirmed by exactly one kind of evidence, described by its `ConfirmationKey`.
use crate::dsr::wire::DsrPacket;
use crate::network::{Time, TimerHandle};
use std::collections::VecDeque;
use std::net::Ipv4Addr;

/// Confirmed by a DSR acknowledgment carrying `ack_id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkKey {
    pub our: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ack_id: u16,
}

/// Confirmed by a successful link-layer transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkKey {
    pub our: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
}

/// Confirmed by overhearing the next hop relay the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassiveKey {
    pub identification: String,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    /// Segments left of the packet as we sent it.
    pub segments_left: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationKey {
    Network(NetworkKey),
    Link(LinkKey),
    Passive(PassiveKey),
}

impl ConfirmationKey {
    pub fn stage(&self) -> &'static str {
        match self {
            ConfirmationKey::Network(_) => "network",
            ConfirmationKey::Link(_) => "link",
            ConfirmationKey::Passive(_) => "passive",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MaintainBuffEntry {
    pub id: u64,
    /// The packet as it left this node, without any ack request.
    pub packet: DsrPacket,
    pub our: Ipv4Addr,
    pub next_hop: Ipv4Addr,
    /// First node of the source route.
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub segments_left: u8,
    pub salvage: u8,
    pub route: Vec<Ipv4Addr>,
    pub protocol: u8,
    pub expire: Time,
    pub key: ConfirmationKey,
    /// Attempts made in the current confirmation stage.
    pub retries: u32,
    pub timer: Option<TimerHandle>,
}

#[derive(Debug)]
pub struct MaintainBuffer {
    max_len: usize,
    entries: VecDeque<MaintainBuffEntry>,
}

impl MaintainBuffer {
    pub fn new(max_len: usize) -> MaintainBuffer {
        MaintainBuffer {
            max_len,
            entries: VecDeque::new(),
        }
    }

    /// Adds an entry. Fails without evicting anything once the buffer is full.
    pub fn enqueue(&mut self, entry: MaintainBuffEntry) -> bool {
        if self.is_full() {
            return false;
        }
        self.entries.push_back(entry);
        true
    }

    /// Oldest entry for `dst`.
    pub fn dequeue(&mut self, dst: Ipv4Addr) -> Option<MaintainBuffEntry> {
        let i = self.entries.iter().position(|e| e.destination == dst)?;
        self.entries.remove(i)
    }

    pub fn dequeue_next_hop(&mut self, next_hop: Ipv4Addr) -> Option<MaintainBuffEntry> {
        let i = self.entries.iter().position(|e| e.next_hop == next_hop)?;
        self.entries.remove(i)
    }

    pub fn get(&self, id: u64) -> Option<&MaintainBuffEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut MaintainBuffEntry> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub fn remove(&mut self, id: u64) -> Option<MaintainBuffEntry> {
        let i = self.entries.iter().position(|e| e.id == id)?;
        self.entries.remove(i)
    }

    /// Removes exactly the entries going through `next_hop` and hands them back.
    pub fn drop_packet_with_next_hop(&mut self, next_hop: Ipv4Addr) -> Vec<MaintainBuffEntry> {
        let (dropped, kept): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| e.next_hop == next_hop);
        self.entries = kept;
        dropped.into_iter().collect()
    }

    /// Removes and returns the oldest entry confirmed by `key`.
    pub fn confirm(&mut self, key: &ConfirmationKey) -> Option<MaintainBuffEntry> {
        let i = self.entries.iter().position(|e| &e.key == key)?;
        self.entries.remove(i)
    }

    /// Removes entries that expired strictly before `now`.
    pub fn purge(&mut self, now: Time) -> Vec<MaintainBuffEntry> {
        let (expired, kept): (VecDeque<_>, VecDeque<_>) =
            self.entries.drain(..).partition(|e| e.expire < now);
        self.entries = kept;
        expired.into_iter().collect()
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_len
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MaintainBuffEntry> {
        self.entries.iter()
    }
}
