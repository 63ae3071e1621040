//! Contracts between the DSR core and the collaborators around it: the event scheduler,
//! the link-layer transport and the upper layer that hands packets down and receives them.
use crate::dsr::DsrTimer;
use chrono::{DateTime, Duration, Utc};
use std::net::Ipv4Addr;

/// Simulated time.
pub type Time = DateTime<Utc>;

/// Link-layer broadcast destination.
pub const BROADCAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

/// The instant every simulation starts at.
pub fn sim_epoch() -> Time {
    DateTime::<Utc>::from(std::time::UNIX_EPOCH)
}

/// Opaque handle of a scheduled callback. Returned by `Scheduler::schedule` and used to cancel it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wraps a scheduler-specific id.
    pub fn new(id: u64) -> TimerHandle {
        TimerHandle(id)
    }

    /// The scheduler-specific id of this handle.
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// The subset of the IP header the routing core reads and writes.
/// `source` is the transmitting node and `destination` the next hop (or broadcast).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub ttl: u8,
    pub protocol: u8,
}

/// A serialized DSR packet on its way to the link layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: IpHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Is this frame addressed to every neighbour?
    pub fn is_broadcast(&self) -> bool {
        self.header.destination == BROADCAST_ADDRESS
    }
}

/// Reasons reported to the upper layer when a destination can't be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteErrorCode {
    /// Route discovery exhausted its attempts.
    RouteNotFound,
    /// A route error reported a broken link towards the destination.
    LinkBroken,
}

/// Discrete-event scheduler. Callbacks scheduled for the same instant run in scheduling order.
pub trait Scheduler {
    /// Current simulated time.
    fn now(&self) -> Time;
    /// Arms `timer` to fire after `delay`.
    fn schedule(&mut self, delay: Duration, timer: DsrTimer) -> TimerHandle;
    /// Cancels a pending callback. Returns false if it already fired or was cancelled.
    fn cancel(&mut self, handle: TimerHandle) -> bool;
}

/// Link-layer transmission. Delivery success or failure is reported later through
/// `DsrRouting::handle_tx_status`.
pub trait Transport {
    /// Hands a frame to the MAC. Returns false if the MAC refused it.
    fn send(&mut self, frame: Frame) -> bool;
}

/// The layer DSR serves.
pub trait UpperLayer {
    /// A data packet reached this node.
    fn deliver(&mut self, source: Ipv4Addr, destination: Ipv4Addr, protocol: u8, payload: Vec<u8>);
    /// A destination became unreachable.
    fn route_error(&mut self, destination: Ipv4Addr, code: RouteErrorCode);
}

/// Everything a routing instance needs from the outside world.
pub trait Environment: Scheduler + Transport + UpperLayer {}

impl<T: Scheduler + Transport + UpperLayer> Environment for T {}
