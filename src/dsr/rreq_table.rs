//! Flood control for route discovery: request ids, retry counters, the record of requests
//! already seen and the blacklist of unidirectional links.
use crate::dsr::Config;
use crate::network::Time;
use chrono::Duration;
use slog::Logger;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;

/// Retry state of the discovery towards one destination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RreqTableEntry {
    pub req_no: u32,
    pub expire: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Probable,
    Questionable,
}

/// A neighbour whose link towards us is believed to be unidirectional.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlackList {
    pub neighbor: Ipv4Addr,
    pub expire: Time,
    pub link_state: LinkState,
}

/// A request this node already processed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReceivedRreqEntry {
    pub destination: Ipv4Addr,
    pub identification: u16,
    pub expire: Time,
}

#[derive(Debug)]
pub struct RreqTable {
    request_table_size: usize,
    request_id_size: usize,
    received_rreq_timeout: Duration,
    discovery_hop_limit: u8,
    rreq_table: HashMap<Ipv4Addr, RreqTableEntry>,
    rreq_ids: HashMap<Ipv4Addr, u16>,
    received: HashMap<Ipv4Addr, VecDeque<ReceivedRreqEntry>>,
    blacklist: Vec<BlackList>,
    logger: Logger,
}

impl RreqTable {
    pub fn new(config: &Config, logger: Logger) -> RreqTable {
        RreqTable {
            request_table_size: config.request_table_size,
            request_id_size: config.request_id_size,
            received_rreq_timeout: config.received_rreq_timeout,
            discovery_hop_limit: config.discovery_hop_limit,
            rreq_table: HashMap::new(),
            rreq_ids: HashMap::new(),
            received: HashMap::new(),
            blacklist: Vec::new(),
            logger,
        }
    }

    /// Next request id for `dst`. Ids grow by one per call, wrapping at 2^16.
    pub fn check_unique_rreq_id(&mut self, dst: Ipv4Addr) -> u16 {
        let next = self.rreq_ids.entry(dst).or_insert(0);
        let id = *next;
        *next = next.wrapping_add(1);
        id
    }

    /// Returns true if the request (src, dst, id) was already seen. Records it otherwise.
    pub fn find_source_entry(&mut self, src: Ipv4Addr, dst: Ipv4Addr, id: u16, now: Time) -> bool {
        let capacity = self.request_id_size.max(1);
        let expire = now + self.received_rreq_timeout;
        let history = self.received.entry(src).or_insert_with(VecDeque::new);
        while history.front().map(|e| e.expire < now).unwrap_or(false) {
            history.pop_front();
        }
        if history
            .iter()
            .any(|e| e.destination == dst && e.identification == id)
        {
            return true;
        }
        if history.len() >= capacity {
            history.pop_front();
        }
        history.push_back(ReceivedRreqEntry {
            destination: dst,
            identification: id,
            expire,
        });
        false
    }

    /// Counts one more discovery attempt towards `dst`.
    pub fn find_and_update(&mut self, dst: Ipv4Addr, now: Time) {
        if !self.rreq_table.contains_key(&dst) && self.rreq_table.len() >= self.request_table_size {
            self.remove_least_expire();
        }
        let expire = now + self.received_rreq_timeout;
        let entry = self
            .rreq_table
            .entry(dst)
            .or_insert(RreqTableEntry { req_no: 0, expire });
        entry.req_no += 1;
        entry.expire = expire;
    }

    fn remove_least_expire(&mut self) {
        let oldest = self
            .rreq_table
            .iter()
            .min_by(|a, b| a.1.expire.cmp(&b.1.expire))
            .map(|(dst, _)| *dst);
        if let Some(dst) = oldest {
            debug!(self.logger, "Request table full, evicting entry"; "destination" => %dst);
            self.rreq_table.remove(&dst);
        }
    }

    pub fn get_rreq_cnt(&self, dst: Ipv4Addr) -> u32 {
        self.rreq_table.get(&dst).map(|e| e.req_no).unwrap_or(0)
    }

    pub fn remove_rreq_entry(&mut self, dst: Ipv4Addr) -> bool {
        self.rreq_table.remove(&dst).is_some()
    }

    pub fn get_init_hop_limit(&self) -> u8 {
        self.discovery_hop_limit
    }

    /// Blacklists `neighbor` for `timeout`. Returns false if it already was.
    pub fn mark_link_as_unidirectional(
        &mut self,
        neighbor: Ipv4Addr,
        timeout: Duration,
        now: Time,
    ) -> bool {
        let expire = now + timeout;
        if let Some(entry) = self
            .blacklist
            .iter_mut()
            .find(|b| b.neighbor == neighbor && b.expire >= now)
        {
            entry.expire = expire;
            return false;
        }
        self.blacklist.retain(|b| b.neighbor != neighbor);
        info!(self.logger, "Link marked as unidirectional"; "neighbor" => %neighbor);
        self.blacklist.push(BlackList {
            neighbor,
            expire,
            link_state: LinkState::Probable,
        });
        true
    }

    pub fn find_unidirectional(&mut self, neighbor: Ipv4Addr, now: Time) -> Option<BlackList> {
        self.blacklist.retain(|b| b.expire >= now);
        self.blacklist
            .iter()
            .find(|b| b.neighbor == neighbor)
            .copied()
    }
}
