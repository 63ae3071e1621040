//! Processing of the DSR option chain of received and overheard packets.
use super::gratuitous_reply::GraReplyEntry;
use super::maintain_buffer::{ConfirmationKey, NetworkKey, PassiveKey};
use super::network_queue::PacketClass;
use super::passive_buffer::PassiveBuffEntry;
use super::wire::*;
use super::{DropReason, DsrRouting, DsrTimer, ReceiveStatus, DEFAULT_TTL};
use crate::network::{Environment, IpHeader, RouteErrorCode, BROADCAST_ADDRESS};
use crate::DsrError;

use chrono::Duration;
use rand::Rng;
use std::collections::HashSet;
use std::net::Ipv4Addr;

/// What the option loop does after handling one option.
pub(super) enum OptionFlow {
    /// Move on to the next option.
    Continue,
    /// Hand the payload to the upper layer.
    Deliver,
    /// Stop processing the packet.
    Done(ReceiveStatus, Option<&'static str>),
}

fn has_duplicates(route: &[Ipv4Addr]) -> bool {
    let mut seen = HashSet::new();
    !route.iter().all(|a| seen.insert(*a))
}

fn dropped(reason: DropReason) -> OptionFlow {
    OptionFlow::Done(ReceiveStatus::Dropped(reason), None)
}

impl DsrRouting {
    pub(super) fn process_options(
        &mut self,
        env: &mut dyn Environment,
        packet: &DsrPacket,
        header: &IpHeader,
    ) -> (ReceiveStatus, Option<&'static str>) {
        let piggybacked = packet.options.iter().any(|o| match o {
            DsrOption::RouteRequest(_) => true,
            _ => false,
        });

        for option in &packet.options {
            let flow = match option {
                DsrOption::Pad1 | DsrOption::PadN(_) | DsrOption::AckRequest(_) => {
                    OptionFlow::Continue
                }
                DsrOption::RouteRequest(rreq) => self.handle_rreq(env, packet, rreq, header),
                DsrOption::RouteReply(rrep) => self.handle_rrep(env, rrep),
                DsrOption::SourceRoute(sr) => self.handle_source_route(env, packet, sr),
                DsrOption::RouteErrorUnreach(error) => self.handle_rerr(env, error, piggybacked),
                DsrOption::RouteErrorUnsupported(error) => self.handle_rerr_unsupported(error),
                DsrOption::Ack(ack) => self.handle_ack(env, ack, header),
                DsrOption::Unknown { option_type, .. } => {
                    self.handle_unknown_option(env, packet, *option_type, header)
                }
            };
            match flow {
                OptionFlow::Continue => {}
                OptionFlow::Deliver => return self.deliver(env, packet),
                OptionFlow::Done(status, action) => return (status, action),
            }
        }

        if packet.is_data() {
            // Data must travel on a source route
            return (ReceiveStatus::Dropped(DropReason::MalformedRoute), None);
        }
        (ReceiveStatus::Processed, None)
    }

    fn deliver(&mut self, env: &mut dyn Environment, packet: &DsrPacket) -> (ReceiveStatus, Option<&'static str>) {
        if !packet.is_data() {
            return (ReceiveStatus::Processed, None);
        }
        let source = address_from_id(self.address, packet.header.source_id);
        env.deliver(
            source,
            self.address,
            packet.header.next_header,
            packet.payload.clone(),
        );
        (ReceiveStatus::Delivered, None)
    }

    // ****** Route request ******

    fn handle_rreq(
        &mut self,
        env: &mut dyn Environment,
        packet: &DsrPacket,
        rreq: &RouteRequest,
        header: &IpHeader,
    ) -> OptionFlow {
        let now = env.now();
        let transmitter = header.source;
        let source = match rreq.addresses.first() {
            Some(s) => *s,
            None => return dropped(DropReason::MalformedRoute),
        };
        if source == self.address {
            return dropped(DropReason::OwnRequest);
        }
        if rreq.addresses.contains(&self.address) {
            return dropped(DropReason::LoopDetected);
        }
        if self.rreq_table.find_unidirectional(transmitter, now).is_some() {
            return dropped(DropReason::UnidirectionalLink);
        }
        if self
            .rreq_table
            .find_source_entry(source, rreq.target, rreq.identification, now)
        {
            return dropped(DropReason::DuplicateSuppressed);
        }

        let mut traversed = rreq.addresses.clone();
        traversed.push(self.address);
        let reverse: Vec<Ipv4Addr> = traversed.iter().rev().copied().collect();
        self.cache_route(&reverse, now);

        if rreq.target == self.address {
            info!(self.logger, "Route request reached its target"; "source" => %source, "hops" => traversed.len() - 1);
            let reply = self.route_reply_packet(traversed, &reverse);
            self.transmit(env, &reply, reverse[1], PacketClass::Control, DEFAULT_TTL);
            return OptionFlow::Done(ReceiveStatus::Processed, Some("Sending route reply"));
        }

        if let Some(cached) = self.route_cache.lookup_route(rreq.target, now) {
            let mut full = rreq.addresses.clone();
            full.extend_from_slice(&cached.path);
            if full.len() <= MAX_ROUTE_ADDRESSES && !has_duplicates(&full) {
                let ntt = self.config.node_traversal_time.num_microseconds().unwrap_or(0) as f64;
                let spread: f64 = self.rng.gen();
                let hops = cached.hops() as f64;
                let delay = Duration::microseconds((2.0 * ntt * (hops - 1.0 + spread)) as i64);
                let reply = self.route_reply_packet(full, &reverse);
                debug!(self.logger, "Replying from cache"; "target" => %rreq.target, "delay_us" => delay.num_microseconds());
                self.arm(
                    env,
                    delay,
                    DsrTimer::DelayedTransmission {
                        packet: reply,
                        next_hop: reverse[1],
                        ttl: DEFAULT_TTL,
                        class: PacketClass::Control,
                    },
                );
                return OptionFlow::Done(ReceiveStatus::Processed, Some("Sending cached route reply"));
            }
        }

        if header.ttl <= 1 || traversed.len() > MAX_RREQ_ADDRESSES {
            return dropped(DropReason::HopLimitReached);
        }

        let mut relayed = packet.clone();
        for opt in relayed.options.iter_mut() {
            if let DsrOption::RouteRequest(r) = opt {
                r.addresses.push(self.address);
            }
        }
        relayed.header.payload_length = relayed.options_length() as u16;
        let jitter = self.config.broadcast_jitter.num_microseconds().unwrap_or(0).max(0);
        let delay = Duration::microseconds(self.rng.gen_range(0..=jitter));
        self.arm(
            env,
            delay,
            DsrTimer::DelayedTransmission {
                packet: relayed,
                next_hop: BROADCAST_ADDRESS,
                ttl: header.ttl - 1,
                class: PacketClass::Control,
            },
        );
        OptionFlow::Done(ReceiveStatus::Forwarded, Some("Flooding route request"))
    }

    /// Route reply carrying `route`, source routed along `back` towards the requester.
    pub(super) fn route_reply_packet(&self, route: Vec<Ipv4Addr>, back: &[Ipv4Addr]) -> DsrPacket {
        let requester = back.last().copied().unwrap_or(self.address);
        let mut packet = DsrPacket::control(node_id(self.address), node_id(requester));
        packet.add_option(DsrOption::RouteReply(RouteReply { addresses: route }));
        packet.add_option(DsrOption::SourceRoute(SourceRoute::new(back.to_vec(), 0)));
        packet
    }

    // ****** Route reply ******

    fn handle_rrep(&mut self, env: &mut dyn Environment, rrep: &RouteReply) -> OptionFlow {
        let now = env.now();
        let route = &rrep.addresses;
        let target = match route.last() {
            Some(t) if route.len() >= 2 => *t,
            _ => return dropped(DropReason::MalformedRoute),
        };
        match route.iter().position(|a| *a == self.address) {
            Some(0) => {
                self.cache_route(route, now);
                info!(self.logger, "Route discovered"; "target" => %target, "hops" => route.len() - 1);
                self.on_route_discovered(env, target);
                OptionFlow::Done(ReceiveStatus::Processed, Some("Route discovered"))
            }
            Some(i) => {
                self.cache_route(&route[i..], now);
                OptionFlow::Continue
            }
            None => OptionFlow::Continue,
        }
    }

    // ****** Source route ******

    fn handle_source_route(
        &mut self,
        env: &mut dyn Environment,
        packet: &DsrPacket,
        sr: &SourceRoute,
    ) -> OptionFlow {
        let now = env.now();
        let n = sr.addresses.len();
        let segments_left = sr.segments_left as usize;

        if segments_left == 0 {
            if sr.destination() != Some(self.address) {
                return dropped(DropReason::NotForUs);
            }
            let back: Vec<Ipv4Addr> = sr.addresses.iter().rev().copied().collect();
            self.cache_route(&back, now);
            return OptionFlow::Deliver;
        }

        if segments_left >= n || sr.addresses[n - segments_left - 1] != self.address {
            return dropped(DropReason::NotForUs);
        }
        let position = n - segments_left - 1;
        let next_hop = sr.addresses[position + 1];
        if next_hop == self.address || sr.addresses[position + 1..].contains(&self.address) {
            return dropped(DropReason::LoopDetected);
        }

        let forward = sr.addresses[position..].to_vec();
        let back: Vec<Ipv4Addr> = sr.addresses[..=position].iter().rev().copied().collect();
        self.cache_route(&forward, now);
        self.cache_route(&back, now);

        let mut relayed = packet.clone();
        relayed.remove_ack_request();
        relayed.set_source_route(SourceRoute {
            salvage: sr.salvage,
            segments_left: sr.segments_left - 1,
            addresses: sr.addresses.clone(),
        });

        if relayed.is_data() {
            if self.start_maintenance(env, relayed, next_hop) {
                OptionFlow::Done(ReceiveStatus::Forwarded, Some("Forwarding data"))
            } else {
                dropped(DropReason::QueueFull)
            }
        } else if self.transmit(env, &relayed, next_hop, PacketClass::Control, DEFAULT_TTL) {
            OptionFlow::Done(ReceiveStatus::Forwarded, Some("Forwarding control"))
        } else {
            dropped(DropReason::QueueFull)
        }
    }

    // ****** Route errors ******

    fn handle_rerr(
        &mut self,
        env: &mut dyn Environment,
        error: &RouteErrorUnreach,
        piggybacked: bool,
    ) -> OptionFlow {
        let now = env.now();
        if error.salvage > self.config.max_salvage_count {
            return dropped(DropReason::SalvageExhausted);
        }
        info!(
            self.logger,
            "Route error received";
            "error_source" => %error.error_source,
            "unreach_node" => %error.unreach_node,
        );
        self.route_cache.delete_all_routes_include_link(
            error.error_source,
            error.unreach_node,
            self.address,
            now,
        );
        if piggybacked || error.error_destination != self.address {
            return OptionFlow::Continue;
        }

        self.error_buffer
            .drop_packet_for_error_link(error.error_source, error.unreach_node);
        let destination = error.original_destination;
        if self.route_cache.lookup_route(destination, now).is_none() {
            env.route_error(destination, RouteErrorCode::LinkBroken);
            if !self.rreq_timers.contains_key(&destination) {
                self.send_propagating_request(env, destination, Some(error.clone()));
            }
        }
        OptionFlow::Done(ReceiveStatus::Processed, Some("Route error handled"))
    }

    fn handle_rerr_unsupported(&mut self, error: &RouteErrorUnsupported) -> OptionFlow {
        warn!(
            self.logger,
            "Option not supported downstream";
            "error_source" => %error.error_source,
            "option_type" => error.unsupported,
        );
        if error.error_destination == self.address {
            return OptionFlow::Done(ReceiveStatus::Processed, None);
        }
        OptionFlow::Continue
    }

    fn handle_unknown_option(
        &mut self,
        env: &mut dyn Environment,
        packet: &DsrPacket,
        option_type: u8,
        header: &IpHeader,
    ) -> OptionFlow {
        let now = env.now();
        let source = address_from_id(self.address, packet.header.source_id);
        warn!(self.logger, "Unknown option"; "option_type" => option_type, "source" => %source);
        if source != self.address {
            let route = self
                .route_cache
                .lookup_route(source, now)
                .map(|r| r.path)
                .or_else(|| {
                    if header.source == source {
                        Some(vec![self.address, source])
                    } else {
                        None
                    }
                });
            if let Some(route) = route {
                let next_hop = route[1];
                let mut report = DsrPacket::control(node_id(self.address), node_id(source));
                report.add_option(DsrOption::RouteErrorUnsupported(RouteErrorUnsupported {
                    salvage: 0,
                    error_source: self.address,
                    error_destination: source,
                    unsupported: u16::from(option_type),
                }));
                report.add_option(DsrOption::SourceRoute(SourceRoute::new(route, 0)));
                self.transmit(env, &report, next_hop, PacketClass::Control, DEFAULT_TTL);
            }
        }
        dropped(DropReason::UnsupportedOption(option_type))
    }

    // ****** Acknowledgment ******

    fn handle_ack(&mut self, env: &mut dyn Environment, ack: &Ack, header: &IpHeader) -> OptionFlow {
        if header.destination != self.address {
            return OptionFlow::Continue;
        }
        let key = ConfirmationKey::Network(NetworkKey {
            our: self.address,
            next_hop: header.source,
            source: ack.real_source,
            destination: ack.real_destination,
            ack_id: ack.ack_id,
        });
        match self.maintain_buffer.confirm(&key) {
            Some(entry) => self.confirmed(env, entry),
            None => {
                debug!(self.logger, "Unmatched acknowledgment"; "ack_id" => ack.ack_id, "from" => %header.source);
            }
        }
        OptionFlow::Continue
    }

    // ****** Promiscuous mode ******

    /// Processes a frame overheard while addressed to another node.
    pub fn promisc_receive(
        &mut self,
        env: &mut dyn Environment,
        bytes: &[u8],
        header: &IpHeader,
    ) -> Result<ReceiveStatus, DsrError> {
        let packet = DsrPacket::deserialize(bytes)?;
        let now = env.now();
        let transmitter = header.source;
        let sr = match packet.source_route() {
            Some(sr) => sr.clone(),
            None => return Ok(ReceiveStatus::Processed),
        };
        let (source, destination) = match (sr.source(), sr.destination()) {
            (Some(s), Some(d)) => (s, d),
            _ => return Ok(ReceiveStatus::Dropped(DropReason::MalformedRoute)),
        };
        let identification = packet.msg_id();

        if packet.is_data() {
            let key = ConfirmationKey::Passive(PassiveKey {
                identification: identification.clone(),
                source,
                destination,
                segments_left: sr.segments_left.wrapping_add(1),
            });
            if let Some(entry) = self.maintain_buffer.confirm(&key) {
                self.confirmed(env, entry);
            }
        }

        let overheard = PassiveBuffEntry {
            identification,
            source,
            destination,
            segments_left: sr.segments_left,
            expire: now + self.config.max_maint_time,
        };
        if !self.passive_buffer.enqueue(overheard, now) {
            return Ok(ReceiveStatus::Dropped(DropReason::DuplicateSuppressed));
        }

        let positions = (
            sr.addresses.iter().position(|a| *a == transmitter),
            sr.addresses.iter().position(|a| *a == self.address),
        );
        if let (Some(t), Some(j)) = positions {
            if j > t + 1 {
                self.send_gratuitous_reply(env, &sr.addresses, t, j, transmitter);
                return Ok(ReceiveStatus::Processed);
            }
        }
        Ok(ReceiveStatus::Processed)
    }

    /// Tells the route source that the hops between `route[t]` and `route[j]` can be skipped.
    fn send_gratuitous_reply(
        &mut self,
        env: &mut dyn Environment,
        route: &[Ipv4Addr],
        t: usize,
        j: usize,
        transmitter: Ipv4Addr,
    ) {
        let now = env.now();
        let source = route[0];
        let holdoff = self.config.grat_reply_holdoff;
        if self
            .grat_reply_table
            .find_and_update(source, transmitter, holdoff, now)
        {
            return;
        }
        self.grat_reply_table.add_entry(GraReplyEntry {
            reply_to: source,
            hear_from: transmitter,
            holdoff: now + holdoff,
        });

        let mut shortened = route[..=t].to_vec();
        shortened.extend_from_slice(&route[j..]);
        let mut back = vec![self.address];
        back.extend(route[..=t].iter().rev());
        info!(
            self.logger,
            "Sending gratuitous route reply";
            "reply_to" => %source,
            "hops" => shortened.len() - 1,
        );
        let reply = self.route_reply_packet(shortened, &back);
        self.transmit(env, &reply, back[1], PacketClass::Control, DEFAULT_TTL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn duplicates_in_routes_are_detected() {
        assert!(!has_duplicates(&[addr(1), addr(2), addr(3)]));
        assert!(has_duplicates(&[addr(1), addr(2), addr(1)]));
    }
}
