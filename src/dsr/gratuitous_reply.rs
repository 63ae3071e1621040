//! Hold-off table for gratuitous route replies.
use crate::network::Time;
use chrono::Duration;
use std::net::Ipv4Addr;

/// A gratuitous reply recently sent to `reply_to` on behalf of the overheard `hear_from`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GraReplyEntry {
    pub reply_to: Ipv4Addr,
    pub hear_from: Ipv4Addr,
    pub holdoff: Time,
}

#[derive(Debug)]
pub struct GraReply {
    max_size: usize,
    entries: Vec<GraReplyEntry>,
}

impl GraReply {
    pub fn new(max_size: usize) -> GraReply {
        GraReply {
            max_size,
            entries: Vec::new(),
        }
    }

    /// Returns true if a reply for the pair is still held off, extending the hold-off.
    pub fn find_and_update(
        &mut self,
        reply_to: Ipv4Addr,
        hear_from: Ipv4Addr,
        holdoff: Duration,
        now: Time,
    ) -> bool {
        self.purge(now);
        match self
            .entries
            .iter_mut()
            .find(|e| e.reply_to == reply_to && e.hear_from == hear_from)
        {
            Some(entry) => {
                entry.holdoff = now + holdoff;
                true
            }
            None => false,
        }
    }

    /// Records a new hold-off. Fails once the table is full.
    pub fn add_entry(&mut self, entry: GraReplyEntry) -> bool {
        if self.entries.len() >= self.max_size {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn purge(&mut self, now: Time) {
        self.entries.retain(|e| e.holdoff >= now);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
