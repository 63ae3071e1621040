//! Dynamic Source Routing, following RFC 4728 https://www.rfc-editor.org/info/rfc4728
//! `DsrRouting` is the protocol instance of one node. It owns every table and buffer of the
//! node and is driven by the scheduler, the link layer and the upper layer through the traits
//! in `crate::network`.
pub mod error_buffer;
pub mod gratuitous_reply;
pub mod maintain_buffer;
pub mod network_queue;
mod options;
pub mod passive_buffer;
pub mod route_cache;
pub mod rreq_table;
pub mod send_buffer;
pub mod strategies;
pub mod wire;

use crate::config::{CacheType, DsrConfig, StabilityPolicyKind};
use crate::logging::{self, MessageStatus};
use crate::network::{
    Environment, Frame, IpHeader, RouteErrorCode, Time, TimerHandle, BROADCAST_ADDRESS,
};
use crate::{DsrError, DsrErrorKind, DSR_PROTOCOL_NUMBER};
use error_buffer::{ErrorBuffEntry, ErrorBuffer};
use gratuitous_reply::GraReply;
use maintain_buffer::{ConfirmationKey, LinkKey, MaintainBuffEntry, MaintainBuffer, NetworkKey, PassiveKey};
use network_queue::{DsrNetworkQueue, DsrNetworkQueueEntry, PacketClass};
use passive_buffer::PassiveBuffer;
use route_cache::{RouteCache, RouteCacheEntry};
use rreq_table::RreqTable;
use send_buffer::{SendBuffEntry, SendBuffer};
use wire::*;

use chrono::Duration;
use rand::{rngs::StdRng, Rng, SeedableRng};
use slog::Logger;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

// **************************************************
// ************ Configuration parameters ************
// **************************************************
const MAX_SEND_BUFF_LEN: usize = 64;
const SEND_BUFF_TIMEOUT: i64 = 30_000; //milliseconds
const MAX_MAINT_LEN: usize = 50;
const MAX_MAINT_TIME: i64 = 30_000; //milliseconds
const MAX_CACHE_LEN: usize = 64;
const ROUTE_CACHE_TIMEOUT: i64 = 300_000; //milliseconds
const MAX_ENTRIES_EACH_DST: usize = 20;
const SEND_BUFF_INTERVAL: i64 = 500_000; //milliseconds
const NODE_TRAVERSAL_TIME: i64 = 40; //milliseconds
const RREQ_RETRIES: u32 = 16;
const MAINTENANCE_RETRIES: u32 = 2;
const REQUEST_TABLE_SIZE: usize = 64;
const REQUEST_ID_SIZE: usize = 16;
const NON_PROP_REQUEST_TIMEOUT: i64 = 30; //milliseconds
const DISCOVERY_HOP_LIMIT: u8 = 255;
const MAX_SALVAGE_COUNT: u8 = 15;
const BLACKLIST_TIMEOUT: i64 = 3_000; //milliseconds
const GRAT_REPLY_HOLDOFF: i64 = 1_000; //milliseconds
const BROADCAST_JITTER: i64 = 10; //milliseconds
const LINK_ACK_TIMEOUT: i64 = 100; //milliseconds
const TRY_LINK_ACKS: u32 = 1;
const PASSIVE_ACK_TIMEOUT: i64 = 100; //milliseconds
const TRY_PASSIVE_ACKS: u32 = 1;
const REQUEST_PERIOD: i64 = 500; //milliseconds
const MAX_REQUEST_PERIOD: i64 = 10_000; //milliseconds
const GRA_REPLY_TABLE_SIZE: usize = 64;
const STABILITY_DECR_FACTOR: u32 = 2;
const STABILITY_INCR_FACTOR: u32 = 4;
const INIT_STABILITY: i64 = 25_000; //milliseconds
const MIN_LIFE_TIME: i64 = 1_000; //milliseconds
const USE_EXTENDS: i64 = 120_000; //milliseconds
const ENABLE_SUB_ROUTE: bool = true;
const RETRANS_INCR: i64 = 20; //milliseconds
const MAX_NETWORK_QUEUE_SIZE: usize = 400;
const MAX_NETWORK_QUEUE_DELAY: i64 = 30_000; //milliseconds
const LINK_ACKNOWLEDGMENT: bool = false;
const RECEIVED_RREQ_TIMEOUT: i64 = 10_000; //milliseconds
const DEFAULT_TTL: u8 = 64;
/// Network queue length above which confirmation timeouts are stretched by `retrans_incr`.
const BUSY_QUEUE_LEN: usize = 5;
const NETWORK_QUEUE_BACKOFF: i64 = 1_000; //microseconds

/// Protocol parameters with every default resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub max_send_buff_len: usize,
    pub send_buff_timeout: Duration,
    pub max_maint_len: usize,
    pub max_maint_time: Duration,
    pub max_cache_len: usize,
    pub route_cache_timeout: Duration,
    pub max_entries_each_dst: usize,
    pub send_buff_interval: Duration,
    pub node_traversal_time: Duration,
    pub rreq_retries: u32,
    pub maintenance_retries: u32,
    pub request_table_size: usize,
    pub request_id_size: usize,
    pub non_prop_request_timeout: Duration,
    pub discovery_hop_limit: u8,
    pub max_salvage_count: u8,
    pub blacklist_timeout: Duration,
    pub grat_reply_holdoff: Duration,
    pub broadcast_jitter: Duration,
    pub link_ack_timeout: Duration,
    pub try_link_acks: u32,
    pub passive_ack_timeout: Duration,
    pub try_passive_acks: u32,
    pub request_period: Duration,
    pub max_request_period: Duration,
    pub grat_reply_table_size: usize,
    pub cache_type: CacheType,
    pub stability_decr_factor: u32,
    pub stability_incr_factor: u32,
    pub init_stability: Duration,
    pub min_life_time: Duration,
    pub use_extends: Duration,
    pub enable_sub_route: bool,
    pub retrans_incr: Duration,
    pub max_network_queue_size: usize,
    pub max_network_queue_delay: Duration,
    pub link_acknowledgment: bool,
    pub received_rreq_timeout: Duration,
    pub stability_policy: StabilityPolicyKind,
}

fn ms(value: Option<i64>, default: i64) -> Duration {
    Duration::milliseconds(value.unwrap_or(default))
}

impl From<&DsrConfig> for Config {
    fn from(c: &DsrConfig) -> Config {
        Config {
            max_send_buff_len: c.max_send_buff_len.unwrap_or(MAX_SEND_BUFF_LEN),
            send_buff_timeout: ms(c.send_buff_timeout, SEND_BUFF_TIMEOUT),
            max_maint_len: c.max_maint_len.unwrap_or(MAX_MAINT_LEN),
            max_maint_time: ms(c.max_maint_time, MAX_MAINT_TIME),
            max_cache_len: c.max_cache_len.unwrap_or(MAX_CACHE_LEN),
            route_cache_timeout: ms(c.route_cache_timeout, ROUTE_CACHE_TIMEOUT),
            max_entries_each_dst: c.max_entries_each_dst.unwrap_or(MAX_ENTRIES_EACH_DST),
            send_buff_interval: ms(c.send_buff_interval, SEND_BUFF_INTERVAL),
            node_traversal_time: ms(c.node_traversal_time, NODE_TRAVERSAL_TIME),
            rreq_retries: c.rreq_retries.unwrap_or(RREQ_RETRIES),
            maintenance_retries: c.maintenance_retries.unwrap_or(MAINTENANCE_RETRIES),
            request_table_size: c.request_table_size.unwrap_or(REQUEST_TABLE_SIZE),
            request_id_size: c.request_id_size.unwrap_or(REQUEST_ID_SIZE),
            non_prop_request_timeout: ms(c.non_prop_request_timeout, NON_PROP_REQUEST_TIMEOUT),
            discovery_hop_limit: c.discovery_hop_limit.unwrap_or(DISCOVERY_HOP_LIMIT),
            max_salvage_count: c.max_salvage_count.unwrap_or(MAX_SALVAGE_COUNT),
            blacklist_timeout: ms(c.blacklist_timeout, BLACKLIST_TIMEOUT),
            grat_reply_holdoff: ms(c.grat_reply_holdoff, GRAT_REPLY_HOLDOFF),
            broadcast_jitter: ms(c.broadcast_jitter, BROADCAST_JITTER),
            link_ack_timeout: ms(c.link_ack_timeout, LINK_ACK_TIMEOUT),
            try_link_acks: c.try_link_acks.unwrap_or(TRY_LINK_ACKS),
            passive_ack_timeout: ms(c.passive_ack_timeout, PASSIVE_ACK_TIMEOUT),
            try_passive_acks: c.try_passive_acks.unwrap_or(TRY_PASSIVE_ACKS),
            request_period: ms(c.request_period, REQUEST_PERIOD),
            max_request_period: ms(c.max_request_period, MAX_REQUEST_PERIOD),
            grat_reply_table_size: c.grat_reply_table_size.unwrap_or(GRA_REPLY_TABLE_SIZE),
            cache_type: c.cache_type.unwrap_or(CacheType::PathCache),
            stability_decr_factor: c.stability_decr_factor.unwrap_or(STABILITY_DECR_FACTOR),
            stability_incr_factor: c.stability_incr_factor.unwrap_or(STABILITY_INCR_FACTOR),
            init_stability: ms(c.init_stability, INIT_STABILITY),
            min_life_time: ms(c.min_life_time, MIN_LIFE_TIME),
            use_extends: ms(c.use_extends, USE_EXTENDS),
            enable_sub_route: c.enable_sub_route.unwrap_or(ENABLE_SUB_ROUTE),
            retrans_incr: ms(c.retrans_incr, RETRANS_INCR),
            max_network_queue_size: c.max_network_queue_size.unwrap_or(MAX_NETWORK_QUEUE_SIZE),
            max_network_queue_delay: ms(c.max_network_queue_delay, MAX_NETWORK_QUEUE_DELAY),
            link_acknowledgment: c.link_acknowledgment.unwrap_or(LINK_ACKNOWLEDGMENT),
            received_rreq_timeout: ms(c.received_rreq_timeout, RECEIVED_RREQ_TIMEOUT),
            stability_policy: c
                .stability_policy
                .unwrap_or(StabilityPolicyKind::StabilityWeighted),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::from(&DsrConfig::default())
    }
}

// **************************************************
// ***************** Public types *******************
// **************************************************

/// Callbacks the routing core asks the scheduler for.
#[derive(Debug, Clone, PartialEq)]
pub enum DsrTimer {
    /// The one-hop request towards `target` got no answer.
    NonPropRequest { target: Ipv4Addr },
    /// A flooded request towards `target` got no answer.
    RouteRequest { target: Ipv4Addr },
    /// A maintained packet was not confirmed in time.
    Confirmation { entry_id: u64 },
    /// A jittered or held-off transmission.
    DelayedTransmission {
        packet: DsrPacket,
        next_hop: Ipv4Addr,
        ttl: u8,
        class: PacketClass,
    },
    /// Retry handing queued frames to the link layer.
    NetworkQueueDrain,
    /// Periodic sweep of the send buffer.
    SendBufferCheck,
}

/// Progress of the route discovery towards a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryState {
    Idle,
    Requesting,
    Replied,
    Failed,
}

/// Outcome of `DsrRouting::send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Sent along a cached route.
    Sent,
    /// Waiting in the send buffer for route discovery.
    Buffered,
    /// Addressed to this node and handed straight back up.
    Delivered,
}

/// Why a received packet went no further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    OwnRequest,
    DuplicateSuppressed,
    LoopDetected,
    UnidirectionalLink,
    MalformedRoute,
    SalvageExhausted,
    UnsupportedOption(u8),
    HopLimitReached,
    QueueFull,
    NotForUs,
    NoRoute,
    Expired,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DropReason::OwnRequest => write!(f, "Own route request"),
            DropReason::DuplicateSuppressed => write!(f, "Duplicate suppressed"),
            DropReason::LoopDetected => write!(f, "Route loop detected"),
            DropReason::UnidirectionalLink => write!(f, "Unidirectional link"),
            DropReason::MalformedRoute => write!(f, "Malformed source route"),
            DropReason::SalvageExhausted => write!(f, "Salvage count exhausted"),
            DropReason::UnsupportedOption(t) => write!(f, "Unsupported option {}", t),
            DropReason::HopLimitReached => write!(f, "Hop limit reached"),
            DropReason::QueueFull => write!(f, "Queue full"),
            DropReason::NotForUs => write!(f, "Not addressed to this node"),
            DropReason::NoRoute => write!(f, "No route"),
            DropReason::Expired => write!(f, "Expired"),
        }
    }
}

/// Outcome of `DsrRouting::receive`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveStatus {
    /// Data handed to the upper layer.
    Delivered,
    /// Relayed towards its destination.
    Forwarded,
    /// Control information consumed by this node.
    Processed,
    Dropped(DropReason),
}

impl ReceiveStatus {
    pub fn message_status(&self) -> MessageStatus {
        match self {
            ReceiveStatus::Delivered | ReceiveStatus::Processed => MessageStatus::ACCEPTED,
            ReceiveStatus::Forwarded => MessageStatus::FORWARDING,
            ReceiveStatus::Dropped(_) => MessageStatus::DROPPED,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum MaintenanceStep {
    Retransmit,
    Escalate,
    LinkFailure,
}

// **************************************************
// ***************** Main struct ********************
// **************************************************

/// DSR protocol instance of one node.
#[derive(Debug)]
pub struct DsrRouting {
    address: Ipv4Addr,
    config: Config,
    route_cache: RouteCache,
    rreq_table: RreqTable,
    grat_reply_table: GraReply,
    maintain_buffer: MaintainBuffer,
    passive_buffer: PassiveBuffer,
    send_buffer: SendBuffer,
    error_buffer: ErrorBuffer,
    network_queue: DsrNetworkQueue,
    discoveries: HashMap<Ipv4Addr, DiscoveryState>,
    /// Pending request timer per discovery target.
    rreq_timers: HashMap<Ipv4Addr, TimerHandle>,
    periodic_timer: Option<TimerHandle>,
    queue_drain_timer: Option<TimerHandle>,
    /// Every timer armed and not yet fired or cancelled.
    outstanding: HashSet<TimerHandle>,
    next_entry_id: u64,
    stale_timer_events: usize,
    rng: StdRng,
    logger: Logger,
}

impl DsrRouting {
    /// Creates the protocol instance of the node at `address`.
    pub fn new(address: Ipv4Addr, settings: &DsrConfig, seed: u64, logger: Logger) -> DsrRouting {
        let config = Config::from(settings);
        let logger = logger.new(o!("node" => address.to_string()));
        DsrRouting {
            address,
            route_cache: RouteCache::new(address, &config, logger.clone()),
            rreq_table: RreqTable::new(&config, logger.clone()),
            grat_reply_table: GraReply::new(config.grat_reply_table_size),
            maintain_buffer: MaintainBuffer::new(config.max_maint_len),
            passive_buffer: PassiveBuffer::new(config.max_maint_len),
            send_buffer: SendBuffer::new(config.max_send_buff_len),
            error_buffer: ErrorBuffer::new(config.max_send_buff_len),
            network_queue: DsrNetworkQueue::new(
                config.max_network_queue_size,
                config.max_network_queue_delay,
            ),
            config,
            discoveries: HashMap::new(),
            rreq_timers: HashMap::new(),
            periodic_timer: None,
            queue_drain_timer: None,
            outstanding: HashSet::new(),
            next_entry_id: 0,
            stale_timer_events: 0,
            rng: StdRng::seed_from_u64(seed),
            logger,
        }
    }

    /// Arms the periodic send buffer sweep.
    pub fn start(&mut self, env: &mut dyn Environment) {
        if self.periodic_timer.is_none() {
            let handle = self.arm(env, self.config.send_buff_interval, DsrTimer::SendBufferCheck);
            self.periodic_timer = Some(handle);
        }
        info!(self.logger, "Protocol initialized"; "cache_type" => format!("{:?}", self.config.cache_type));
    }

    /// Sends `payload` to `destination`, discovering a route first if none is cached.
    pub fn send(
        &mut self,
        env: &mut dyn Environment,
        payload: Vec<u8>,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        protocol: u8,
    ) -> Result<SendStatus, DsrError> {
        let now = env.now();
        if destination == self.address {
            env.deliver(source, destination, protocol, payload);
            return Ok(SendStatus::Delivered);
        }

        let mut packet = DsrPacket::new(
            MESSAGE_TYPE_DATA,
            node_id(source),
            node_id(destination),
            protocol,
        );
        packet.payload = payload;

        if let Some(route) = self.route_cache.lookup_route(destination, now) {
            if self.send_data(env, packet, route.path, 0) {
                return Ok(SendStatus::Sent);
            }
            let err_msg = String::from("Maintenance buffer is full");
            return Err(DsrError::from(DsrErrorKind::QueueFull(err_msg)));
        }

        info!(self.logger, "No known route, buffering packet"; "destination" => %destination);
        let entry = SendBuffEntry {
            packet,
            source,
            destination,
            protocol,
            expire: now + self.config.send_buff_timeout,
        };
        if let Some(evicted) = self.send_buffer.enqueue(entry, now) {
            self.log_drop(&evicted.packet, DropReason::QueueFull);
        }
        if !self.rreq_timers.contains_key(&destination) {
            self.send_initial_request(env, destination);
        }
        Ok(SendStatus::Buffered)
    }

    /// Processes a frame addressed to this node or broadcast.
    pub fn receive(
        &mut self,
        env: &mut dyn Environment,
        bytes: &[u8],
        header: &IpHeader,
    ) -> Result<ReceiveStatus, DsrError> {
        let packet = DsrPacket::deserialize(bytes).map_err(|e| {
            warn!(self.logger, "Malformed packet discarded"; "source" => %header.source, "reason" => %e);
            e
        })?;
        let now = env.now();
        let transmitter = header.source;
        let destination = if packet.header.destination_id == BROADCAST_NODE_ID {
            BROADCAST_ADDRESS
        } else {
            address_from_id(self.address, packet.header.destination_id)
        };

        let (status, action) =
            if header.destination != self.address && header.destination != BROADCAST_ADDRESS {
                (ReceiveStatus::Dropped(DropReason::NotForUs), None)
            } else {
                self.route_cache
                    .add_neighbor(transmitter, self.config.route_cache_timeout, now);
                if header.destination == self.address {
                    self.acknowledge(env, &packet, transmitter);
                }
                self.process_options(env, &packet, header)
            };

        let reason = match status {
            ReceiveStatus::Dropped(r) => Some(r.to_string()),
            _ => None,
        };
        logging::log_handle_message(
            &self.logger,
            &packet,
            transmitter,
            destination,
            status.message_status(),
            reason.as_deref(),
            action,
        );
        Ok(status)
    }

    /// Dispatches a timer armed by this instance.
    pub fn handle_timer(
        &mut self,
        env: &mut dyn Environment,
        handle: TimerHandle,
        timer: DsrTimer,
    ) -> Result<(), DsrError> {
        if !self.outstanding.remove(&handle) {
            self.stale_timer_events += 1;
            warn!(self.logger, "Stale timer fired"; "timer" => format!("{:?}", timer));
            return Ok(());
        }

        match timer {
            DsrTimer::NonPropRequest { target } => {
                if self.take_rreq_timer(target, handle) {
                    self.non_prop_request_timer_expire(env, target);
                }
            }
            DsrTimer::RouteRequest { target } => {
                if self.take_rreq_timer(target, handle) {
                    self.route_request_timer_expire(env, target);
                }
            }
            DsrTimer::Confirmation { entry_id } => {
                self.confirmation_timer_expire(env, handle, entry_id);
            }
            DsrTimer::DelayedTransmission {
                packet,
                next_hop,
                ttl,
                class,
            } => {
                self.transmit(env, &packet, next_hop, class, ttl);
            }
            DsrTimer::NetworkQueueDrain => {
                if self.queue_drain_timer == Some(handle) {
                    self.queue_drain_timer = None;
                    self.drain_network_queue(env);
                } else {
                    self.stale_timer_events += 1;
                }
            }
            DsrTimer::SendBufferCheck => {
                if self.periodic_timer == Some(handle) {
                    self.periodic_timer = None;
                    self.check_send_buffer(env);
                } else {
                    self.stale_timer_events += 1;
                }
            }
        }
        Ok(())
    }

    /// Link-layer report on a unicast frame previously handed to the transport.
    pub fn handle_tx_status(&mut self, env: &mut dyn Environment, frame: &Frame, success: bool) {
        if frame.is_broadcast() {
            return;
        }
        let now = env.now();
        let next_hop = frame.header.destination;
        if !success {
            debug!(self.logger, "Link-layer transmission failed"; "next_hop" => %next_hop);
            self.route_cache.process_tx_error(next_hop);
            return;
        }

        self.route_cache
            .add_neighbor(next_hop, self.config.route_cache_timeout, now);
        if !self.config.link_acknowledgment {
            return;
        }
        let packet = match DsrPacket::deserialize(&frame.payload) {
            Ok(p) => p,
            Err(_) => return,
        };
        let (source, destination) = match packet.source_route() {
            Some(sr) => match (sr.source(), sr.destination()) {
                (Some(s), Some(d)) => (s, d),
                _ => return,
            },
            None => return,
        };
        let key = ConfirmationKey::Link(LinkKey {
            our: self.address,
            next_hop,
            source,
            destination,
        });
        if let Some(entry) = self.maintain_buffer.confirm(&key) {
            self.confirmed(env, entry);
        }
    }

    // ****** Accessors ******

    pub fn address(&self) -> Ipv4Addr {
        self.address
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn route_cache(&self) -> &RouteCache {
        &self.route_cache
    }

    pub fn route_cache_mut(&mut self) -> &mut RouteCache {
        &mut self.route_cache
    }

    pub fn rreq_table(&self) -> &RreqTable {
        &self.rreq_table
    }

    pub fn maintain_buffer(&self) -> &MaintainBuffer {
        &self.maintain_buffer
    }

    pub fn send_buffer(&self) -> &SendBuffer {
        &self.send_buffer
    }

    pub fn error_buffer(&self) -> &ErrorBuffer {
        &self.error_buffer
    }

    pub fn network_queue(&self) -> &DsrNetworkQueue {
        &self.network_queue
    }

    pub fn discovery_state(&self, destination: Ipv4Addr) -> DiscoveryState {
        self.discoveries
            .get(&destination)
            .copied()
            .unwrap_or(DiscoveryState::Idle)
    }

    /// Timer deliveries for handles this instance no longer tracked.
    pub fn stale_timer_events(&self) -> usize {
        self.stale_timer_events
    }

    pub fn outstanding_timers(&self) -> usize {
        self.outstanding.len()
    }

    // ****** Timers ******

    fn arm(&mut self, env: &mut dyn Environment, delay: Duration, timer: DsrTimer) -> TimerHandle {
        let handle = env.schedule(delay, timer);
        self.outstanding.insert(handle);
        handle
    }

    fn disarm(&mut self, env: &mut dyn Environment, handle: TimerHandle) {
        if self.outstanding.remove(&handle) {
            env.cancel(handle);
        }
    }

    /// Unregisters the request timer of `target` if `handle` is the registered one.
    fn take_rreq_timer(&mut self, target: Ipv4Addr, handle: TimerHandle) -> bool {
        if self.rreq_timers.get(&target) == Some(&handle) {
            self.rreq_timers.remove(&target);
            true
        } else {
            self.stale_timer_events += 1;
            false
        }
    }

    fn cancel_rreq_timer(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        if let Some(handle) = self.rreq_timers.remove(&target) {
            self.disarm(env, handle);
        }
    }

    // ****** Transmission ******

    /// Queues a packet for the link layer and drains the queue.
    fn transmit(
        &mut self,
        env: &mut dyn Environment,
        packet: &DsrPacket,
        next_hop: Ipv4Addr,
        class: PacketClass,
        ttl: u8,
    ) -> bool {
        let bytes = match packet.serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(self.logger, "Packet cannot be encoded"; "next_hop" => %next_hop, "reason" => %e);
                logging::log_tx(&self.logger, packet, self.address, next_hop, MessageStatus::DROPPED);
                return false;
            }
        };
        let entry = DsrNetworkQueueEntry {
            packet: bytes,
            source: self.address,
            next_hop,
            ttl,
            class,
            inserted: env.now(),
        };
        if !self.network_queue.enqueue(entry) {
            logging::log_tx(&self.logger, packet, self.address, next_hop, MessageStatus::DROPPED);
            return false;
        }
        self.drain_network_queue(env);
        true
    }

    fn drain_network_queue(&mut self, env: &mut dyn Environment) {
        if self.queue_drain_timer.is_some() {
            return;
        }
        while let Some(entry) = self.network_queue.dequeue(env.now()) {
            let frame = Frame {
                header: IpHeader {
                    source: self.address,
                    destination: entry.next_hop,
                    ttl: entry.ttl,
                    protocol: DSR_PROTOCOL_NUMBER,
                },
                payload: entry.packet.clone(),
            };
            if env.send(frame) {
                if let Ok(packet) = DsrPacket::deserialize(&entry.packet) {
                    logging::log_tx(
                        &self.logger,
                        &packet,
                        self.address,
                        entry.next_hop,
                        MessageStatus::SENT,
                    );
                }
            } else {
                debug!(self.logger, "Link layer busy, backing off"; "next_hop" => %entry.next_hop);
                self.network_queue.requeue(entry);
                let backoff =
                    Duration::microseconds(self.rng.gen_range(0..=NETWORK_QUEUE_BACKOFF));
                let handle = self.arm(env, backoff, DsrTimer::NetworkQueueDrain);
                self.queue_drain_timer = Some(handle);
                break;
            }
        }
    }

    fn log_drop(&self, packet: &DsrPacket, reason: DropReason) {
        info!(
            self.logger,
            "Packet dropped";
            packet,
            "reason" => reason.to_string(),
            "status" => MessageStatus::DROPPED,
            "msg_id" => packet.msg_id(),
        );
    }

    fn cache_route(&mut self, path: &[Ipv4Addr], now: Time) -> bool {
        if path.len() < 2 || path[0] != self.address {
            return false;
        }
        if self.route_cache.is_link_cache() {
            self.route_cache.add_route_link(path, self.address, now)
        } else {
            let expire = now + self.route_cache.route_cache_timeout();
            self.route_cache
                .add_route(RouteCacheEntry::new(path.to_vec(), expire), now)
        }
    }

    // ****** Route maintenance ******

    /// Sends a data packet along `route`, which starts at this node.
    fn send_data(
        &mut self,
        env: &mut dyn Environment,
        mut packet: DsrPacket,
        route: Vec<Ipv4Addr>,
        salvage: u8,
    ) -> bool {
        if route.len() < 2 || route.len() > MAX_ROUTE_ADDRESSES {
            return false;
        }
        let now = env.now();
        let next_hop = route[1];
        self.route_cache.use_extends(&route, now);
        packet.options.clear();
        packet.add_option(DsrOption::SourceRoute(SourceRoute::new(route, salvage)));
        self.start_maintenance(env, packet, next_hop)
    }

    fn new_network_key(&mut self, next_hop: Ipv4Addr, source: Ipv4Addr, destination: Ipv4Addr) -> ConfirmationKey {
        let ack_id = self.route_cache.check_unique_ack_id(next_hop);
        ConfirmationKey::Network(NetworkKey {
            our: self.address,
            next_hop,
            source,
            destination,
            ack_id,
        })
    }

    /// Transmits a data packet to `next_hop` and keeps it until the hop is confirmed.
    fn start_maintenance(
        &mut self,
        env: &mut dyn Environment,
        packet: DsrPacket,
        next_hop: Ipv4Addr,
    ) -> bool {
        let sr = match packet.source_route() {
            Some(sr) => sr.clone(),
            None => return false,
        };
        let (source, destination) = match (sr.source(), sr.destination()) {
            (Some(s), Some(d)) => (s, d),
            _ => return false,
        };
        if self.maintain_buffer.is_full() {
            warn!(self.logger, "Maintenance buffer full"; "destination" => %destination);
            self.log_drop(&packet, DropReason::QueueFull);
            return false;
        }

        let key = if self.config.link_acknowledgment {
            ConfirmationKey::Link(LinkKey {
                our: self.address,
                next_hop,
                source,
                destination,
            })
        } else if next_hop != destination && self.config.try_passive_acks > 0 {
            ConfirmationKey::Passive(PassiveKey {
                identification: packet.msg_id(),
                source,
                destination,
                segments_left: sr.segments_left,
            })
        } else {
            self.new_network_key(next_hop, source, destination)
        };

        let mut entry = MaintainBuffEntry {
            id: self.next_entry_id,
            protocol: packet.header.next_header,
            packet,
            our: self.address,
            next_hop,
            source,
            destination,
            segments_left: sr.segments_left,
            salvage: sr.salvage,
            route: sr.addresses,
            expire: env.now() + self.config.max_maint_time,
            key,
            retries: 0,
            timer: None,
        };
        self.next_entry_id += 1;
        self.transmit_maintained(env, &mut entry);
        if let Some(handle) = entry.timer {
            if !self.maintain_buffer.enqueue(entry) {
                self.disarm(env, handle);
                return false;
            }
        }
        true
    }

    /// (Re)transmits a maintained packet for its current stage and arms the stage timer.
    fn transmit_maintained(&mut self, env: &mut dyn Environment, entry: &mut MaintainBuffEntry) {
        let (packet, timeout) = match &entry.key {
            ConfirmationKey::Link(_) => (entry.packet.clone(), self.config.link_ack_timeout),
            ConfirmationKey::Passive(_) => (entry.packet.clone(), self.config.passive_ack_timeout),
            ConfirmationKey::Network(key) => {
                let mut packet = entry.packet.clone();
                packet.add_option(DsrOption::AckRequest(AckRequest { ack_id: key.ack_id }));
                let factor = entry.retries.max(1) as i32;
                let mut timeout = self.config.node_traversal_time * 2 * factor;
                if self.network_queue.len() > BUSY_QUEUE_LEN {
                    timeout = timeout + self.config.retrans_incr;
                }
                (packet, timeout)
            }
        };
        self.transmit(env, &packet, entry.next_hop, PacketClass::Data, DEFAULT_TTL);
        let handle = self.arm(env, timeout, DsrTimer::Confirmation { entry_id: entry.id });
        entry.timer = Some(handle);
    }

    fn confirmation_timer_expire(&mut self, env: &mut dyn Environment, handle: TimerHandle, entry_id: u64) {
        let mut entry = match self.maintain_buffer.get(entry_id) {
            Some(e) if e.timer == Some(handle) => e.clone(),
            _ => {
                self.stale_timer_events += 1;
                return;
            }
        };
        let now = env.now();
        entry.timer = None;
        entry.retries += 1;

        let step = match entry.key {
            ConfirmationKey::Link(_) => {
                if entry.retries < self.config.try_link_acks {
                    MaintenanceStep::Retransmit
                } else {
                    self.rreq_table.mark_link_as_unidirectional(
                        entry.next_hop,
                        self.config.blacklist_timeout,
                        now,
                    );
                    MaintenanceStep::Escalate
                }
            }
            ConfirmationKey::Passive(_) => {
                if entry.retries < self.config.try_passive_acks {
                    MaintenanceStep::Retransmit
                } else {
                    MaintenanceStep::Escalate
                }
            }
            ConfirmationKey::Network(_) => {
                if entry.retries <= self.config.maintenance_retries {
                    MaintenanceStep::Retransmit
                } else {
                    MaintenanceStep::LinkFailure
                }
            }
        };

        match step {
            MaintenanceStep::Retransmit | MaintenanceStep::Escalate => {
                if step == MaintenanceStep::Escalate {
                    debug!(self.logger, "Escalating to network acknowledgment"; "stage" => entry.key.stage(), "next_hop" => %entry.next_hop);
                    entry.key = self.new_network_key(entry.next_hop, entry.source, entry.destination);
                    entry.retries = 0;
                }
                self.transmit_maintained(env, &mut entry);
                if let Some(slot) = self.maintain_buffer.get_mut(entry_id) {
                    *slot = entry;
                }
            }
            MaintenanceStep::LinkFailure => {
                self.maintain_buffer.remove(entry_id);
                self.handle_link_failure(env, entry);
            }
        }
    }

    fn confirmed(&mut self, env: &mut dyn Environment, entry: MaintainBuffEntry) {
        if let Some(handle) = entry.timer {
            self.disarm(env, handle);
        }
        let now = env.now();
        self.route_cache.update_route_entry(entry.destination, now);
        if self.route_cache.is_link_cache() {
            self.route_cache.inc_stability(entry.next_hop, now);
        }
        debug!(
            self.logger,
            "Delivery confirmed";
            "stage" => entry.key.stage(),
            "next_hop" => %entry.next_hop,
            "destination" => %entry.destination,
        );
    }

    /// Answers an ack request carried by a packet addressed to this node.
    fn acknowledge(&mut self, env: &mut dyn Environment, packet: &DsrPacket, transmitter: Ipv4Addr) {
        let request = match packet.ack_request() {
            Some(r) => r,
            None => return,
        };
        let (source, destination) = match packet.source_route() {
            Some(sr) => match (sr.source(), sr.destination()) {
                (Some(s), Some(d)) => (s, d),
                _ => return,
            },
            None => return,
        };
        let mut ack = DsrPacket::control(node_id(self.address), node_id(transmitter));
        ack.add_option(DsrOption::Ack(Ack {
            ack_id: request.ack_id,
            real_source: source,
            real_destination: destination,
        }));
        self.transmit(env, &ack, transmitter, PacketClass::Control, 1);
    }

    fn handle_link_failure(&mut self, env: &mut dyn Environment, entry: MaintainBuffEntry) {
        let now = env.now();
        let next_hop = entry.next_hop;
        warn!(
            self.logger,
            "Link failure detected";
            "next_hop" => %next_hop,
            "destination" => %entry.destination,
        );
        self.route_cache
            .delete_all_routes_include_link(self.address, next_hop, self.address, now);
        self.route_cache.process_tx_error(next_hop);
        self.network_queue.drop_packets_with_next_hop(next_hop);

        let mut pending = vec![entry];
        for other in self.maintain_buffer.drop_packet_with_next_hop(next_hop) {
            if let Some(handle) = other.timer {
                self.disarm(env, handle);
            }
            pending.push(other);
        }

        let mut notified: Vec<Ipv4Addr> = Vec::new();
        for entry in pending {
            if entry.source != self.address && !notified.contains(&entry.source) {
                notified.push(entry.source);
                let error = RouteErrorUnreach {
                    salvage: entry.salvage,
                    error_source: self.address,
                    error_destination: entry.source,
                    unreach_node: next_hop,
                    original_destination: entry.destination,
                };
                self.send_unreach_error(env, error);
            }
            self.salvage_packet(env, entry);
        }
    }

    /// Gives a packet stranded by a broken link another chance.
    fn salvage_packet(&mut self, env: &mut dyn Environment, entry: MaintainBuffEntry) {
        let now = env.now();
        let destination = entry.destination;
        let originator = address_from_id(self.address, entry.packet.header.source_id);

        if originator == self.address {
            if let Some(route) = self.route_cache.lookup_route(destination, now) {
                if !self.send_data(env, entry.packet.clone(), route.path, entry.salvage) {
                    self.log_drop(&entry.packet, DropReason::QueueFull);
                }
                return;
            }
            info!(self.logger, "Own packet stranded, rediscovering"; "destination" => %destination);
            let buffered = SendBuffEntry {
                packet: entry.packet,
                source: originator,
                destination,
                protocol: entry.protocol,
                expire: now + self.config.send_buff_timeout,
            };
            if let Some(evicted) = self.send_buffer.enqueue(buffered, now) {
                self.log_drop(&evicted.packet, DropReason::QueueFull);
            }
            if !self.rreq_timers.contains_key(&destination) {
                self.send_initial_request(env, destination);
            }
            return;
        }

        if entry.salvage >= self.config.max_salvage_count {
            self.log_drop(&entry.packet, DropReason::SalvageExhausted);
            return;
        }
        match self.route_cache.lookup_route(destination, now) {
            Some(route) => {
                info!(self.logger, "Salvaging packet"; "destination" => %destination, "salvage" => entry.salvage + 1);
                if !self.send_data(env, entry.packet.clone(), route.path, entry.salvage + 1) {
                    self.log_drop(&entry.packet, DropReason::QueueFull);
                }
            }
            None => self.log_drop(&entry.packet, DropReason::NoRoute),
        }
    }

    /// Reports an unreachable next hop to the node that built the route.
    fn send_unreach_error(&mut self, env: &mut dyn Environment, error: RouteErrorUnreach) {
        let now = env.now();
        let destination = error.error_destination;
        match self.route_cache.lookup_route(destination, now) {
            Some(route) => self.send_error_request(env, error, route.path),
            None => {
                let entry = ErrorBuffEntry {
                    source: error.error_source,
                    destination,
                    unreach: error.unreach_node,
                    expire: now + self.config.send_buff_timeout,
                    error,
                };
                if self.error_buffer.enqueue(entry, now) && !self.rreq_timers.contains_key(&destination) {
                    self.send_initial_request(env, destination);
                }
            }
        }
    }

    fn send_error_request(&mut self, env: &mut dyn Environment, error: RouteErrorUnreach, route: Vec<Ipv4Addr>) {
        if route.len() < 2 {
            return;
        }
        let next_hop = route[1];
        let mut packet = DsrPacket::control(node_id(self.address), node_id(error.error_destination));
        info!(
            self.logger,
            "Sending route error";
            "error_destination" => %error.error_destination,
            "unreach_node" => %error.unreach_node,
        );
        packet.add_option(DsrOption::RouteErrorUnreach(error));
        packet.add_option(DsrOption::SourceRoute(SourceRoute::new(route, 0)));
        self.transmit(env, &packet, next_hop, PacketClass::Control, DEFAULT_TTL);
    }

    // ****** Route discovery ******

    fn route_request_packet(&self, target: Ipv4Addr, id: u16, error: Option<RouteErrorUnreach>) -> DsrPacket {
        let mut packet = DsrPacket::control(node_id(self.address), BROADCAST_NODE_ID);
        if let Some(error) = error {
            packet.add_option(DsrOption::RouteErrorUnreach(error));
        }
        packet.add_option(DsrOption::RouteRequest(RouteRequest {
            identification: id,
            target,
            addresses: vec![self.address],
        }));
        packet
    }

    /// One-hop request, answered only by neighbours.
    fn send_initial_request(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        let now = env.now();
        self.cancel_rreq_timer(env, target);
        self.rreq_table.find_and_update(target, now);
        let id = self.rreq_table.check_unique_rreq_id(target);
        info!(self.logger, "Starting route discovery"; "target" => %target, "rreq_id" => id);
        let packet = self.route_request_packet(target, id, None);
        self.discoveries.insert(target, DiscoveryState::Requesting);
        self.transmit(env, &packet, BROADCAST_ADDRESS, PacketClass::Control, 1);
        let handle = self.arm(
            env,
            self.config.non_prop_request_timeout,
            DsrTimer::NonPropRequest { target },
        );
        self.rreq_timers.insert(target, handle);
    }

    /// Flooded request, optionally carrying a route error for the nodes it crosses.
    fn send_propagating_request(
        &mut self,
        env: &mut dyn Environment,
        target: Ipv4Addr,
        error: Option<RouteErrorUnreach>,
    ) {
        let now = env.now();
        self.cancel_rreq_timer(env, target);
        self.rreq_table.find_and_update(target, now);
        let id = self.rreq_table.check_unique_rreq_id(target);
        debug!(self.logger, "Flooding route request"; "target" => %target, "rreq_id" => id);
        let packet = self.route_request_packet(target, id, error);
        self.discoveries.insert(target, DiscoveryState::Requesting);
        let ttl = self.rreq_table.get_init_hop_limit();
        self.transmit(env, &packet, BROADCAST_ADDRESS, PacketClass::Control, ttl);
        self.schedule_rreq_retry(env, target);
    }

    fn schedule_rreq_retry(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        let count = self.rreq_table.get_rreq_cnt(target).min(1_000) as i32;
        let mut delay = if count > 1 {
            self.config.request_period * (count * count)
        } else {
            self.config.request_period
        };
        if delay > self.config.max_request_period {
            delay = self.config.max_request_period;
        }
        let handle = self.arm(env, delay, DsrTimer::RouteRequest { target });
        self.rreq_timers.insert(target, handle);
    }

    fn non_prop_request_timer_expire(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        if self.route_cache.lookup_route(target, env.now()).is_some() {
            self.on_route_discovered(env, target);
            return;
        }
        self.send_propagating_request(env, target, None);
    }

    fn route_request_timer_expire(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        if self.route_cache.lookup_route(target, env.now()).is_some() {
            self.on_route_discovered(env, target);
            return;
        }
        if self.rreq_table.get_rreq_cnt(target) >= self.config.rreq_retries {
            self.discovery_failed(env, target);
        } else {
            self.send_propagating_request(env, target, None);
        }
    }

    fn discovery_failed(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        let now = env.now();
        warn!(self.logger, "Route discovery failed"; "target" => %target);
        self.rreq_table.remove_rreq_entry(target);
        self.discoveries.insert(target, DiscoveryState::Failed);
        for dropped in self.send_buffer.drop_packet_with_dst(target) {
            self.log_drop(&dropped.packet, DropReason::NoRoute);
        }
        while self.error_buffer.dequeue(target, now).is_some() {}
        env.route_error(target, RouteErrorCode::RouteNotFound);
    }

    fn on_route_discovered(&mut self, env: &mut dyn Environment, target: Ipv4Addr) {
        self.cancel_rreq_timer(env, target);
        self.rreq_table.remove_rreq_entry(target);
        self.discoveries.insert(target, DiscoveryState::Replied);
        self.send_packet_from_buffer(env, target);
    }

    /// Sends every packet and error buffered for `destination` if a route is now known.
    fn send_packet_from_buffer(&mut self, env: &mut dyn Environment, destination: Ipv4Addr) {
        let now = env.now();
        let route = match self.route_cache.lookup_route(destination, now) {
            Some(r) => r.path,
            None => return,
        };
        while let Some(entry) = self.send_buffer.dequeue(destination, now) {
            if !self.send_data(env, entry.packet.clone(), route.clone(), 0) {
                self.log_drop(&entry.packet, DropReason::QueueFull);
            }
        }
        while let Some(entry) = self.error_buffer.dequeue(destination, now) {
            self.send_error_request(env, entry.error, route.clone());
        }
    }

    fn check_send_buffer(&mut self, env: &mut dyn Environment) {
        let now = env.now();
        for expired in self.send_buffer.purge(now) {
            self.log_drop(&expired.packet, DropReason::Expired);
        }
        for expired in self.maintain_buffer.purge(now) {
            if let Some(handle) = expired.timer {
                self.disarm(env, handle);
            }
            self.log_drop(&expired.packet, DropReason::Expired);
        }
        self.error_buffer.purge(now);
        self.route_cache.purge(now);
        self.route_cache.purge_mac(now);

        for destination in self.send_buffer.destinations() {
            if self.route_cache.lookup_route(destination, now).is_some() {
                self.send_packet_from_buffer(env, destination);
            } else if !self.rreq_timers.contains_key(&destination) {
                self.send_initial_request(env, destination);
            }
        }

        let handle = self.arm(env, self.config.send_buff_interval, DsrTimer::SendBufferCheck);
        self.periodic_timer = Some(handle);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{sim_epoch, Scheduler, Transport, UpperLayer};

    /// Records everything the routing core asks of its environment.
    struct MockEnv {
        now: Time,
        next_handle: u64,
        scheduled: Vec<(TimerHandle, Duration, DsrTimer)>,
        cancelled: Vec<TimerHandle>,
        sent: Vec<Frame>,
        accept_frames: bool,
        delivered: Vec<(Ipv4Addr, Vec<u8>)>,
        errors: Vec<(Ipv4Addr, RouteErrorCode)>,
    }

    impl MockEnv {
        fn new() -> MockEnv {
            MockEnv {
                now: sim_epoch(),
                next_handle: 0,
                scheduled: Vec::new(),
                cancelled: Vec::new(),
                sent: Vec::new(),
                accept_frames: true,
                delivered: Vec::new(),
                errors: Vec::new(),
            }
        }
    }

    impl Scheduler for MockEnv {
        fn now(&self) -> Time {
            self.now
        }

        fn schedule(&mut self, delay: Duration, timer: DsrTimer) -> TimerHandle {
            self.next_handle += 1;
            let handle = TimerHandle::new(self.next_handle);
            self.scheduled.push((handle, delay, timer));
            handle
        }

        fn cancel(&mut self, handle: TimerHandle) -> bool {
            self.cancelled.push(handle);
            true
        }
    }

    impl Transport for MockEnv {
        fn send(&mut self, frame: Frame) -> bool {
            if self.accept_frames {
                self.sent.push(frame);
            }
            self.accept_frames
        }
    }

    impl UpperLayer for MockEnv {
        fn deliver(&mut self, source: Ipv4Addr, _destination: Ipv4Addr, _protocol: u8, payload: Vec<u8>) {
            self.delivered.push((source, payload));
        }

        fn route_error(&mut self, destination: Ipv4Addr, code: RouteErrorCode) {
            self.errors.push((destination, code));
        }
    }

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn routing(settings: &DsrConfig) -> DsrRouting {
        DsrRouting::new(addr(1), settings, 7, logging::create_discard_logger())
    }

    #[test]
    fn config_defaults() {
        let config = Config::default();
        assert_eq!(config.max_send_buff_len, 64);
        assert_eq!(config.route_cache_timeout, Duration::seconds(300));
        assert_eq!(config.rreq_retries, 16);
        assert_eq!(config.non_prop_request_timeout, Duration::milliseconds(30));
        assert_eq!(config.cache_type, CacheType::PathCache);
        assert_eq!(config.received_rreq_timeout, Duration::seconds(10));
        assert!(!config.link_acknowledgment);
    }

    #[test]
    fn send_without_route_starts_discovery() {
        let mut env = MockEnv::new();
        let mut dsr = routing(&DsrConfig::default());
        let status = dsr
            .send(&mut env, b"data".to_vec(), addr(1), addr(3), 17)
            .expect("Send failed");
        assert_eq!(status, SendStatus::Buffered);
        assert_eq!(dsr.send_buffer().len(), 1);
        assert_eq!(dsr.discovery_state(addr(3)), DiscoveryState::Requesting);

        assert_eq!(env.sent.len(), 1);
        let frame = &env.sent[0];
        assert!(frame.is_broadcast());
        assert_eq!(frame.header.ttl, 1);
        let packet = DsrPacket::deserialize(&frame.payload).expect("Malformed request");
        assert_eq!(packet.msg_type(), "RREQ");

        assert_eq!(env.scheduled.len(), 1);
        assert_eq!(env.scheduled[0].1, Duration::milliseconds(30));
        assert_eq!(env.scheduled[0].2, DsrTimer::NonPropRequest { target: addr(3) });
    }

    #[test]
    fn send_to_self_is_delivered_locally() {
        let mut env = MockEnv::new();
        let mut dsr = routing(&DsrConfig::default());
        let status = dsr
            .send(&mut env, b"me".to_vec(), addr(1), addr(1), 17)
            .expect("Send failed");
        assert_eq!(status, SendStatus::Delivered);
        assert_eq!(env.delivered, vec![(addr(1), b"me".to_vec())]);
        assert!(env.sent.is_empty());
    }

    #[test]
    fn unknown_timers_are_counted_as_stale() {
        let mut env = MockEnv::new();
        let mut dsr = routing(&DsrConfig::default());
        dsr.handle_timer(&mut env, TimerHandle::new(99), DsrTimer::NetworkQueueDrain)
            .expect("Timer failed");
        assert_eq!(dsr.stale_timer_events(), 1);
    }

    #[test]
    fn refused_frames_are_retried() {
        let mut env = MockEnv::new();
        env.accept_frames = false;
        let mut dsr = routing(&DsrConfig::default());
        dsr.send(&mut env, b"data".to_vec(), addr(1), addr(3), 17)
            .expect("Send failed");
        assert_eq!(dsr.network_queue().len(), 1);
        let (handle, _, timer) = env
            .scheduled
            .iter()
            .find(|(_, _, t)| *t == DsrTimer::NetworkQueueDrain)
            .cloned()
            .expect("No drain timer");

        env.accept_frames = true;
        dsr.handle_timer(&mut env, handle, timer).expect("Timer failed");
        assert!(dsr.network_queue().is_empty());
        assert_eq!(env.sent.len(), 1);
        assert_eq!(dsr.stale_timer_events(), 0);
    }

    #[test]
    fn malformed_packets_are_rejected() {
        let mut env = MockEnv::new();
        let mut dsr = routing(&DsrConfig::default());
        let header = IpHeader {
            source: addr(2),
            destination: addr(1),
            ttl: 64,
            protocol: DSR_PROTOCOL_NUMBER,
        };
        assert!(dsr.receive(&mut env, &[0, 1, 2], &header).is_err());
    }

    #[test]
    fn data_on_a_cached_route_is_acknowledged_hop_by_hop() {
        let mut env = MockEnv::new();
        let mut dsr = routing(&DsrConfig::default());
        let now = env.now;
        assert!(dsr.route_cache_mut().add_route(
            RouteCacheEntry::new(vec![addr(1), addr(2)], now + Duration::seconds(10)),
            now
        ));
        let status = dsr
            .send(&mut env, b"data".to_vec(), addr(1), addr(2), 17)
            .expect("Send failed");
        assert_eq!(status, SendStatus::Sent);
        assert_eq!(dsr.maintain_buffer().len(), 1);

        // Next hop is the destination, so a network acknowledgment is requested
        let packet = DsrPacket::deserialize(&env.sent[0].payload).expect("Malformed data");
        let ack_id = packet.ack_request().expect("No ack request").ack_id;

        let mut ack = DsrPacket::control(node_id(addr(2)), node_id(addr(1)));
        ack.add_option(DsrOption::Ack(Ack {
            ack_id,
            real_source: addr(1),
            real_destination: addr(2),
        }));
        let header = IpHeader {
            source: addr(2),
            destination: addr(1),
            ttl: 1,
            protocol: DSR_PROTOCOL_NUMBER,
        };
        let status = dsr
            .receive(&mut env, &ack.serialize().expect("Failed to encode ack"), &header)
            .expect("Receive failed");
        assert_eq!(status, ReceiveStatus::Processed);
        assert!(dsr.maintain_buffer().is_empty());
        assert_eq!(env.cancelled.len(), 1);
        assert_eq!(dsr.outstanding_timers(), 0);
    }
}
