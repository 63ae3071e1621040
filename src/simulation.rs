//! Discrete-event harness that runs a set of `DsrRouting` instances over a simulated topology
//! of bidirectional links. Frames cross a link after a fixed transmission delay; unicast
//! frames are also overheard by every other neighbour of the sender.
use crate::config::{DsrConfig, SimulationConfig};
use crate::dsr::route_cache::Link;
use crate::dsr::{DsrRouting, DsrTimer, ReceiveStatus, SendStatus};
use crate::network::{
    sim_epoch, Environment, Frame, RouteErrorCode, Scheduler, Time, TimerHandle, Transport,
    UpperLayer,
};
use crate::{DsrError, DsrErrorKind};

use byteorder::{BigEndian, ByteOrder};
use chrono::Duration;
use crossbeam_channel::{unbounded, Receiver, Sender};
use slog::Logger;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::fmt;
use std::net::Ipv4Addr;

const DEFAULT_TRANSMISSION_DELAY: i64 = 1; //milliseconds
/// Protocol number of the traffic generated by the harness.
pub const UDP_PROTOCOL_NUMBER: u8 = 17;

// *****************************************
// ************ Event queue ****************
// *****************************************

/// Time-ordered queue of events. Events scheduled for the same instant pop in scheduling order.
#[derive(Debug)]
pub struct EventQueue<E> {
    now: Time,
    next_id: u64,
    heap: BinaryHeap<Reverse<(Time, u64)>>,
    events: HashMap<u64, E>,
}

impl<E> EventQueue<E> {
    pub fn new(start: Time) -> EventQueue<E> {
        EventQueue {
            now: start,
            next_id: 0,
            heap: BinaryHeap::new(),
            events: HashMap::new(),
        }
    }

    pub fn now(&self) -> Time {
        self.now
    }

    /// Schedules `event` at `at`, or now if `at` is in the past. Returns the id of the event.
    pub fn schedule_at(&mut self, at: Time, event: E) -> u64 {
        let at = if at < self.now { self.now } else { at };
        self.next_id += 1;
        let id = self.next_id;
        self.heap.push(Reverse((at, id)));
        self.events.insert(id, event);
        id
    }

    pub fn schedule_in(&mut self, delay: Duration, event: E) -> u64 {
        let at = self.now + delay;
        self.schedule_at(at, event)
    }

    /// Returns false if the event already ran or was cancelled.
    pub fn cancel(&mut self, id: u64) -> bool {
        self.events.remove(&id).is_some()
    }

    /// Time of the next pending event.
    pub fn peek_time(&mut self) -> Option<Time> {
        while let Some(Reverse((at, id))) = self.heap.peek().copied() {
            if self.events.contains_key(&id) {
                return Some(at);
            }
            self.heap.pop();
        }
        None
    }

    /// Removes the next pending event and advances the clock to it.
    pub fn pop(&mut self) -> Option<(u64, Time, E)> {
        while let Some(Reverse((at, id))) = self.heap.pop() {
            if let Some(event) = self.events.remove(&id) {
                self.now = at;
                return Some((id, at, event));
            }
        }
        None
    }

    /// Moves the clock forward without running anything.
    pub fn advance_to(&mut self, at: Time) {
        if at > self.now {
            self.now = at;
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// *****************************************
// ************ Simulated nodes ************
// *****************************************

#[derive(Debug, Clone)]
pub enum SimEvent {
    Timer {
        node: usize,
        timer: DsrTimer,
    },
    Frame {
        to: usize,
        frame: Frame,
        promiscuous: bool,
    },
    TxStatus {
        node: usize,
        frame: Frame,
        success: bool,
    },
    LinkChange {
        a: Ipv4Addr,
        b: Ipv4Addr,
        up: bool,
    },
    Send {
        node: usize,
        destination: Ipv4Addr,
        payload: Vec<u8>,
    },
}

/// Notifications the routing instances hand to the layer above them.
#[derive(Debug, Clone, PartialEq)]
pub enum Upcall {
    Delivered {
        node: Ipv4Addr,
        source: Ipv4Addr,
        payload: Vec<u8>,
        at: Time,
    },
    RouteError {
        node: Ipv4Addr,
        destination: Ipv4Addr,
        code: RouteErrorCode,
        at: Time,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeliveredPacket {
    pub source: Ipv4Addr,
    pub payload: Vec<u8>,
    pub at: Time,
}

/// A routing instance plus everything observed at its upper edge.
#[derive(Debug)]
pub struct SimNode {
    pub routing: DsrRouting,
    pub delivered: Vec<DeliveredPacket>,
    pub route_errors: Vec<(Ipv4Addr, RouteErrorCode)>,
    /// Outcome of every frame addressed to this node or broadcast.
    pub statuses: Vec<ReceiveStatus>,
    pub send_failures: usize,
}

/// The environment of one node during one callback.
struct NodeEnv<'a> {
    queue: &'a mut EventQueue<SimEvent>,
    node: usize,
    address: Ipv4Addr,
    links: &'a HashSet<Link>,
    addresses: &'a [Ipv4Addr],
    delay: Duration,
    upcalls: &'a Sender<Upcall>,
}

impl NodeEnv<'_> {
    fn neighbors(&self) -> Vec<usize> {
        self.addresses
            .iter()
            .enumerate()
            .filter(|(i, a)| *i != self.node && self.links.contains(&Link::new(self.address, **a)))
            .map(|(i, _)| i)
            .collect()
    }
}

impl Scheduler for NodeEnv<'_> {
    fn now(&self) -> Time {
        self.queue.now()
    }

    fn schedule(&mut self, delay: Duration, timer: DsrTimer) -> TimerHandle {
        let id = self.queue.schedule_in(
            delay,
            SimEvent::Timer {
                node: self.node,
                timer,
            },
        );
        TimerHandle::new(id)
    }

    fn cancel(&mut self, handle: TimerHandle) -> bool {
        self.queue.cancel(handle.id())
    }
}

impl Transport for NodeEnv<'_> {
    fn send(&mut self, frame: Frame) -> bool {
        let neighbors = self.neighbors();
        let broadcast = frame.is_broadcast();
        let mut reached = false;
        for n in neighbors {
            let promiscuous = !broadcast && self.addresses[n] != frame.header.destination;
            reached |= !broadcast && !promiscuous;
            self.queue.schedule_in(
                self.delay,
                SimEvent::Frame {
                    to: n,
                    frame: frame.clone(),
                    promiscuous,
                },
            );
        }
        if !broadcast {
            self.queue.schedule_in(
                self.delay,
                SimEvent::TxStatus {
                    node: self.node,
                    frame,
                    success: reached,
                },
            );
        }
        true
    }
}

impl UpperLayer for NodeEnv<'_> {
    fn deliver(&mut self, source: Ipv4Addr, _destination: Ipv4Addr, _protocol: u8, payload: Vec<u8>) {
        let _ = self.upcalls.send(Upcall::Delivered {
            node: self.address,
            source,
            payload,
            at: self.queue.now(),
        });
    }

    fn route_error(&mut self, destination: Ipv4Addr, code: RouteErrorCode) {
        let _ = self.upcalls.send(Upcall::RouteError {
            node: self.address,
            destination,
            code,
            at: self.queue.now(),
        });
    }
}

// *****************************************
// ************ Network ********************
// *****************************************

/// Summary of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationReport {
    pub packets_sent: usize,
    pub packets_delivered: usize,
    pub route_errors: usize,
    pub frames_dropped: usize,
    pub stale_timer_events: usize,
}

impl SimulationReport {
    pub fn delivery_ratio(&self) -> f64 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_delivered as f64 / self.packets_sent as f64
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "Packets sent: {}", self.packets_sent)?;
        writeln!(f, "Packets delivered: {}", self.packets_delivered)?;
        writeln!(f, "Delivery ratio: {:.2}", self.delivery_ratio())?;
        writeln!(f, "Route errors: {}", self.route_errors)?;
        writeln!(f, "Frames dropped: {}", self.frames_dropped)?;
        write!(f, "Stale timer events: {}", self.stale_timer_events)
    }
}

/// A simulated network of DSR nodes.
#[derive(Debug)]
pub struct SimNetwork {
    queue: EventQueue<SimEvent>,
    start: Time,
    addresses: Vec<Ipv4Addr>,
    index: HashMap<Ipv4Addr, usize>,
    nodes: Vec<SimNode>,
    links: HashSet<Link>,
    delay: Duration,
    settings: DsrConfig,
    seed: u64,
    upcalls: Sender<Upcall>,
    upcall_rx: Receiver<Upcall>,
    packets_sent: usize,
    logger: Logger,
}

impl SimNetwork {
    pub fn new(settings: DsrConfig, seed: u64, delay: Duration, logger: Logger) -> SimNetwork {
        let (upcalls, upcall_rx) = unbounded();
        let start = sim_epoch();
        SimNetwork {
            queue: EventQueue::new(start),
            start,
            addresses: Vec::new(),
            index: HashMap::new(),
            nodes: Vec::new(),
            links: HashSet::new(),
            delay,
            settings,
            seed,
            upcalls,
            upcall_rx,
            packets_sent: 0,
            logger,
        }
    }

    /// Builds the network, links, link events and traffic a scenario describes.
    pub fn from_config(config: &SimulationConfig, logger: Logger) -> Result<SimNetwork, DsrError> {
        config.validate()?;
        let delay = Duration::milliseconds(
            config
                .transmission_delay
                .unwrap_or(DEFAULT_TRANSMISSION_DELAY),
        );
        let mut net = SimNetwork::new(config.protocol.clone(), config.random_seed, delay, logger);
        for node in &config.nodes {
            net.add_node(*node)?;
        }
        for link in &config.links {
            net.connect(link.a, link.b);
        }
        for event in &config.link_events {
            net.schedule_link_change(Duration::milliseconds(event.at), event.a, event.b, event.up);
        }
        for flow in &config.traffic {
            for seq in 0..flow.packets {
                let at = Duration::milliseconds(flow.start + flow.interval * seq as i64);
                let payload = packet_payload(seq as u32, flow.payload_size);
                net.schedule_send(at, flow.source, flow.destination, payload)?;
            }
        }
        info!(net.logger, "Scenario loaded"; "nodes" => config.nodes.len(), "links" => config.links.len(), "flows" => config.traffic.len());
        Ok(net)
    }

    /// Adds and starts a node. Node `i` seeds its RNG with the network seed plus `i`.
    pub fn add_node(&mut self, address: Ipv4Addr) -> Result<usize, DsrError> {
        if self.index.contains_key(&address) {
            let err_msg = format!("Node {} already exists", address);
            return Err(DsrError::from(DsrErrorKind::Simulation(err_msg)));
        }
        let i = self.nodes.len();
        let routing = DsrRouting::new(
            address,
            &self.settings,
            self.seed.wrapping_add(i as u64),
            self.logger.clone(),
        );
        self.addresses.push(address);
        self.index.insert(address, i);
        self.nodes.push(SimNode {
            routing,
            delivered: Vec::new(),
            route_errors: Vec::new(),
            statuses: Vec::new(),
            send_failures: 0,
        });
        self.dispatch(i, |routing, env| routing.start(env));
        Ok(i)
    }

    pub fn connect(&mut self, a: Ipv4Addr, b: Ipv4Addr) {
        debug!(self.logger, "Link up"; "a" => %a, "b" => %b);
        self.links.insert(Link::new(a, b));
    }

    pub fn disconnect(&mut self, a: Ipv4Addr, b: Ipv4Addr) {
        debug!(self.logger, "Link down"; "a" => %a, "b" => %b);
        self.links.remove(&Link::new(a, b));
    }

    pub fn is_connected(&self, a: Ipv4Addr, b: Ipv4Addr) -> bool {
        self.links.contains(&Link::new(a, b))
    }

    /// Schedules a link change `at` after the start of the run.
    pub fn schedule_link_change(&mut self, at: Duration, a: Ipv4Addr, b: Ipv4Addr, up: bool) {
        self.queue
            .schedule_at(self.start + at, SimEvent::LinkChange { a, b, up });
    }

    /// Schedules `source` to send `payload` to `destination` `at` after the start of the run.
    pub fn schedule_send(
        &mut self,
        at: Duration,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        payload: Vec<u8>,
    ) -> Result<(), DsrError> {
        let node = self.node_index(source)?;
        self.queue.schedule_at(
            self.start + at,
            SimEvent::Send {
                node,
                destination,
                payload,
            },
        );
        Ok(())
    }

    /// Hands a packet to the routing instance of `source` right away.
    pub fn send_now(
        &mut self,
        source: Ipv4Addr,
        destination: Ipv4Addr,
        payload: Vec<u8>,
    ) -> Result<SendStatus, DsrError> {
        let node = self.node_index(source)?;
        let status = self.dispatch(node, |routing, env| {
            routing.send(env, payload, source, destination, UDP_PROTOCOL_NUMBER)
        })?;
        self.packets_sent += 1;
        Ok(status)
    }

    /// Puts `frame` on the link from `from` to `to`, bypassing the routing instance of `from`.
    pub fn inject_frame(&mut self, from: Ipv4Addr, to: Ipv4Addr, frame: Frame) -> Result<(), DsrError> {
        self.node_index(from)?;
        let to_index = self.node_index(to)?;
        if !self.is_connected(from, to) {
            let err_msg = format!("No link between {} and {}", from, to);
            return Err(DsrError::from(DsrErrorKind::Simulation(err_msg)));
        }
        self.queue.schedule_in(
            self.delay,
            SimEvent::Frame {
                to: to_index,
                frame,
                promiscuous: false,
            },
        );
        Ok(())
    }

    /// Runs every event up to and including `end`.
    pub fn run_until(&mut self, end: Time) -> Result<(), DsrError> {
        while let Some(at) = self.queue.peek_time() {
            if at > end {
                break;
            }
            if let Some((id, _, event)) = self.queue.pop() {
                self.process(id, event)?;
            }
        }
        self.queue.advance_to(end);
        Ok(())
    }

    pub fn run_for(&mut self, duration: Duration) -> Result<(), DsrError> {
        let end = self.queue.now() + duration;
        self.run_until(end)
    }

    pub fn now(&self) -> Time {
        self.queue.now()
    }

    /// Time elapsed since the start of the run.
    pub fn elapsed(&self) -> Duration {
        self.queue.now() - self.start
    }

    pub fn node(&self, address: Ipv4Addr) -> Option<&SimNode> {
        self.index.get(&address).map(|i| &self.nodes[*i])
    }

    pub fn node_mut(&mut self, address: Ipv4Addr) -> Option<&mut SimNode> {
        match self.index.get(&address) {
            Some(i) => self.nodes.get_mut(*i),
            None => None,
        }
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn stale_timer_events(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| n.routing.stale_timer_events())
            .sum()
    }

    pub fn report(&self) -> SimulationReport {
        SimulationReport {
            packets_sent: self.packets_sent,
            packets_delivered: self.nodes.iter().map(|n| n.delivered.len()).sum(),
            route_errors: self.nodes.iter().map(|n| n.route_errors.len()).sum(),
            frames_dropped: self
                .nodes
                .iter()
                .flat_map(|n| n.statuses.iter())
                .filter(|s| match s {
                    ReceiveStatus::Dropped(_) => true,
                    _ => false,
                })
                .count(),
            stale_timer_events: self.stale_timer_events(),
        }
    }

    fn node_index(&self, address: Ipv4Addr) -> Result<usize, DsrError> {
        self.index.get(&address).copied().ok_or_else(|| {
            let err_msg = format!("Unknown node {}", address);
            DsrError::from(DsrErrorKind::Simulation(err_msg))
        })
    }

    /// Runs `f` on the routing instance of `node` with that node's environment.
    fn dispatch<R, F>(&mut self, node: usize, f: F) -> R
    where
        F: FnOnce(&mut DsrRouting, &mut dyn Environment) -> R,
    {
        let result = {
            let SimNetwork {
                queue,
                addresses,
                nodes,
                links,
                delay,
                upcalls,
                ..
            } = self;
            let mut env = NodeEnv {
                queue,
                node,
                address: addresses[node],
                links: &*links,
                addresses: &addresses[..],
                delay: *delay,
                upcalls: &*upcalls,
            };
            let env: &mut dyn Environment = &mut env;
            f(&mut nodes[node].routing, env)
        };
        self.collect_upcalls();
        result
    }

    fn collect_upcalls(&mut self) {
        for upcall in self.upcall_rx.try_iter() {
            match upcall {
                Upcall::Delivered {
                    node,
                    source,
                    payload,
                    at,
                } => {
                    if let Some(i) = self.index.get(&node) {
                        self.nodes[*i].delivered.push(DeliveredPacket {
                            source,
                            payload,
                            at,
                        });
                    }
                }
                Upcall::RouteError {
                    node,
                    destination,
                    code,
                    ..
                } => {
                    info!(self.logger, "Route error reported"; "node" => %node, "destination" => %destination, "code" => format!("{:?}", code));
                    if let Some(i) = self.index.get(&node) {
                        self.nodes[*i].route_errors.push((destination, code));
                    }
                }
            }
        }
    }

    fn process(&mut self, id: u64, event: SimEvent) -> Result<(), DsrError> {
        match event {
            SimEvent::Timer { node, timer } => {
                self.dispatch(node, |routing, env| {
                    routing.handle_timer(env, TimerHandle::new(id), timer)
                })?;
            }
            SimEvent::Frame {
                to,
                frame,
                promiscuous,
            } => {
                let outcome = if promiscuous {
                    self.dispatch(to, |routing, env| {
                        routing.promisc_receive(env, &frame.payload, &frame.header)
                    })
                } else {
                    self.dispatch(to, |routing, env| {
                        routing.receive(env, &frame.payload, &frame.header)
                    })
                };
                match outcome {
                    Ok(status) => {
                        if !promiscuous {
                            self.nodes[to].statuses.push(status);
                        }
                    }
                    Err(e) => {
                        warn!(self.logger, "Frame rejected"; "node" => %self.addresses[to], "reason" => %e);
                    }
                }
            }
            SimEvent::TxStatus {
                node,
                frame,
                success,
            } => {
                self.dispatch(node, |routing, env| {
                    routing.handle_tx_status(env, &frame, success)
                });
            }
            SimEvent::LinkChange { a, b, up } => {
                if up {
                    self.connect(a, b);
                } else {
                    self.disconnect(a, b);
                }
            }
            SimEvent::Send {
                node,
                destination,
                payload,
            } => {
                let source = self.addresses[node];
                let outcome = self.dispatch(node, |routing, env| {
                    routing.send(env, payload, source, destination, UDP_PROTOCOL_NUMBER)
                });
                match outcome {
                    Ok(_) => self.packets_sent += 1,
                    Err(e) => {
                        warn!(self.logger, "Send failed"; "source" => %source, "destination" => %destination, "reason" => %e);
                        self.nodes[node].send_failures += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Payload of the `seq`-th packet of a flow: the sequence number followed by zero padding.
pub fn packet_payload(seq: u32, size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size.max(4)];
    BigEndian::write_u32(&mut payload[..4], seq);
    payload
}

/// Sequence number of a payload built by `packet_payload`.
pub fn payload_sequence(payload: &[u8]) -> Option<u32> {
    if payload.len() < 4 {
        return None;
    }
    Some(BigEndian::read_u32(&payload[..4]))
}

/// Runs a scenario to completion.
pub fn run_simulation(config: &SimulationConfig, logger: Logger) -> Result<SimulationReport, DsrError> {
    let mut net = SimNetwork::from_config(config, logger)?;
    net.run_for(Duration::milliseconds(config.duration))?;
    let report = net.report();
    info!(net.logger, "Simulation finished"; "sent" => report.packets_sent, "delivered" => report.packets_delivered);
    Ok(report)
}
