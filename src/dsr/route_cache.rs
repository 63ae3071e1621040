//! Route cache of a DSR node. Routes are either kept as complete paths per destination or as a
//! graph of links from which the best path is computed on demand.
use crate::config::CacheType;
use crate::dsr::strategies::{build_policy, StabilityPolicy};
use crate::dsr::Config;
use crate::network::Time;
use chrono::Duration;
use slog::Logger;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap};
use std::fmt;
use std::net::Ipv4Addr;

/// A cached route. `path` starts at the node owning the cache and ends at `destination`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteCacheEntry {
    pub path: Vec<Ipv4Addr>,
    pub destination: Ipv4Addr,
    pub expire: Time,
    pub unidirectional: bool,
    pub blacklist_timeout: Duration,
}

impl RouteCacheEntry {
    pub fn new(path: Vec<Ipv4Addr>, expire: Time) -> RouteCacheEntry {
        let destination = path.last().copied().unwrap_or(Ipv4Addr::UNSPECIFIED);
        RouteCacheEntry {
            path,
            destination,
            expire,
            unidirectional: false,
            blacklist_timeout: Duration::zero(),
        }
    }

    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// Undirected link, stored with its endpoints in canonical order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Link {
    low: Ipv4Addr,
    high: Ipv4Addr,
}

impl Link {
    pub fn new(a: Ipv4Addr, b: Ipv4Addr) -> Link {
        if a <= b {
            Link { low: a, high: b }
        } else {
            Link { low: b, high: a }
        }
    }

    pub fn endpoints(&self) -> (Ipv4Addr, Ipv4Addr) {
        (self.low, self.high)
    }

    pub fn contains(&self, node: Ipv4Addr) -> bool {
        self.low == node || self.high == node
    }
}

/// Stability of a link: the link is trusted until `expire`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkStab {
    pub expire: Time,
}

/// Stability of a node: the node is trusted until `expire`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStab {
    pub expire: Time,
}

/// Link-layer address of a neighbour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl From<Ipv4Addr> for MacAddress {
    fn from(address: Ipv4Addr) -> MacAddress {
        let o = address.octets();
        MacAddress([0x02, 0x00, o[0], o[1], o[2], o[3]])
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub address: Ipv4Addr,
    pub mac: MacAddress,
    pub expire: Time,
    /// Set when the MAC reported a transmission failure towards this neighbour.
    pub close: bool,
}

#[derive(Debug)]
pub struct RouteCache {
    owner: Ipv4Addr,
    cache_type: CacheType,
    max_cache_len: usize,
    max_entries_each_dst: usize,
    route_cache_timeout: Duration,
    enable_sub_route: bool,
    init_stability: Duration,
    min_life_time: Duration,
    use_extends: Duration,
    policy: Box<dyn StabilityPolicy>,
    /// Routes per destination, most recently refreshed first.
    path_cache: HashMap<Ipv4Addr, Vec<RouteCacheEntry>>,
    link_cache: BTreeMap<Link, LinkStab>,
    node_cache: HashMap<Ipv4Addr, NodeStab>,
    best_routes: HashMap<Ipv4Addr, Vec<Ipv4Addr>>,
    graph_dirty: bool,
    neighbors: Vec<Neighbor>,
    ack_id_cache: HashMap<Ipv4Addr, u16>,
    logger: Logger,
}

impl RouteCache {
    pub fn new(owner: Ipv4Addr, config: &Config, logger: Logger) -> RouteCache {
        RouteCache {
            owner,
            cache_type: config.cache_type,
            max_cache_len: config.max_cache_len,
            max_entries_each_dst: config.max_entries_each_dst,
            route_cache_timeout: config.route_cache_timeout,
            enable_sub_route: config.enable_sub_route,
            init_stability: config.init_stability,
            min_life_time: config.min_life_time,
            use_extends: config.use_extends,
            policy: build_policy(
                config.stability_policy,
                config.stability_incr_factor,
                config.stability_decr_factor,
            ),
            path_cache: HashMap::new(),
            link_cache: BTreeMap::new(),
            node_cache: HashMap::new(),
            best_routes: HashMap::new(),
            graph_dirty: false,
            neighbors: Vec::new(),
            ack_id_cache: HashMap::new(),
            logger,
        }
    }

    pub fn is_link_cache(&self) -> bool {
        self.cache_type == CacheType::LinkCache
    }

    pub fn route_cache_timeout(&self) -> Duration {
        self.route_cache_timeout
    }

    // ****** Path cache ******

    /// Inserts a route. Returns false for self-routes, routes not starting at the owner, and
    /// routes already cached (whose expiry is refreshed instead).
    pub fn add_route(&mut self, entry: RouteCacheEntry, now: Time) -> bool {
        self.purge(now);
        if entry.path.len() < 2
            || entry.path[0] != self.owner
            || entry.destination == self.owner
            || entry.path.last() != Some(&entry.destination)
        {
            return false;
        }

        let max_per_dst = self.max_entries_each_dst.max(1);
        let routes = self
            .path_cache
            .entry(entry.destination)
            .or_insert_with(Vec::new);
        if let Some(existing) = routes.iter_mut().find(|r| r.path == entry.path) {
            if entry.expire > existing.expire {
                existing.expire = entry.expire;
            }
            routes.sort_by(|a, b| b.expire.cmp(&a.expire));
            return false;
        }
        if routes.len() >= max_per_dst {
            // Oldest is at the back
            routes.pop();
        }
        debug!(self.logger, "Route cached"; "destination" => %entry.destination, "hops" => entry.hops());
        // Newest first among routes expiring together
        routes.insert(0, entry);
        routes.sort_by(|a, b| b.expire.cmp(&a.expire));

        while self.path_cache_len() > self.max_cache_len {
            self.evict_oldest();
        }
        true
    }

    fn path_cache_len(&self) -> usize {
        self.path_cache.values().map(|v| v.len()).sum()
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .path_cache
            .iter()
            .filter_map(|(dst, routes)| routes.last().map(|r| (r.expire, *dst)))
            .min();
        if let Some((_, dst)) = oldest {
            if let Some(routes) = self.path_cache.get_mut(&dst) {
                routes.pop();
                if routes.is_empty() {
                    self.path_cache.remove(&dst);
                }
            }
        }
    }

    /// Best known route to `dst`.
    pub fn lookup_route(&mut self, dst: Ipv4Addr, now: Time) -> Option<RouteCacheEntry> {
        if self.is_link_cache() {
            return self.lookup_route_link(dst, now);
        }

        self.purge(now);
        if let Some(route) = self.path_cache.get(&dst).and_then(|r| r.first()) {
            return Some(route.clone());
        }

        // A cached route passing through dst also gives a route to it.
        let derived = self
            .path_cache
            .values()
            .flat_map(|routes| routes.iter())
            .filter_map(|r| {
                r.path
                    .iter()
                    .position(|a| *a == dst)
                    .filter(|i| *i > 0)
                    .map(|i| RouteCacheEntry::new(r.path[..=i].to_vec(), r.expire))
            })
            .max_by(|a, b| a.expire.cmp(&b.expire));
        if let Some(route) = derived {
            debug!(self.logger, "Route derived from a longer cached route"; "destination" => %dst);
            self.add_route(route.clone(), now);
            return Some(route);
        }
        None
    }

    /// Refreshes the expiry of the best route to `dst`, typically after an acknowledgment.
    pub fn update_route_entry(&mut self, dst: Ipv4Addr, now: Time) -> bool {
        if self.is_link_cache() {
            return match self.lookup_route_link(dst, now) {
                Some(route) => {
                    self.use_extends(&route.path, now);
                    true
                }
                None => false,
            };
        }
        let expire = now + self.route_cache_timeout;
        match self.path_cache.get_mut(&dst) {
            Some(routes) if !routes.is_empty() => {
                routes[0].expire = expire;
                true
            }
            _ => false,
        }
    }

    pub fn delete_route(&mut self, dst: Ipv4Addr) -> bool {
        if self.is_link_cache() {
            let before = self.link_cache.len();
            self.link_cache.retain(|link, _| !link.contains(dst));
            self.node_cache.remove(&dst);
            self.graph_dirty = true;
            return self.link_cache.len() != before;
        }
        self.path_cache.remove(&dst).is_some()
    }

    /// Invalidates every route using the link `error_src -> unreach_node`.
    /// With sub-routes enabled, the part of a path before the broken link stays cached.
    pub fn delete_all_routes_include_link(
        &mut self,
        error_src: Ipv4Addr,
        unreach_node: Ipv4Addr,
        node: Ipv4Addr,
        now: Time,
    ) {
        if self.is_link_cache() {
            if self
                .link_cache
                .remove(&Link::new(error_src, unreach_node))
                .is_some()
            {
                info!(
                    self.logger,
                    "Link removed from cache";
                    "from" => %error_src,
                    "to" => %unreach_node,
                    "node" => %node,
                );
            }
            self.dec_stability(error_src, now);
            self.dec_stability(unreach_node, now);
            self.graph_dirty = true;
            return;
        }

        let mut kept: Vec<RouteCacheEntry> = Vec::new();
        let mut removed = 0;
        for (_, routes) in self.path_cache.drain() {
            for route in routes {
                let broken_at = route
                    .path
                    .windows(2)
                    .position(|w| w[0] == error_src && w[1] == unreach_node);
                match broken_at {
                    None => kept.push(route),
                    Some(i) => {
                        removed += 1;
                        if self.enable_sub_route && i >= 1 {
                            kept.push(RouteCacheEntry::new(route.path[..=i].to_vec(), route.expire));
                        }
                    }
                }
            }
        }
        for route in kept {
            let routes = self
                .path_cache
                .entry(route.destination)
                .or_insert_with(Vec::new);
            if !routes.iter().any(|r| r.path == route.path) {
                routes.push(route);
            }
        }
        for routes in self.path_cache.values_mut() {
            routes.sort_by(|a, b| b.expire.cmp(&a.expire));
            routes.truncate(self.max_entries_each_dst.max(1));
        }
        if removed > 0 {
            info!(
                self.logger,
                "Routes using a broken link removed";
                "from" => %error_src,
                "to" => %unreach_node,
                "count" => removed,
            );
        }
    }

    /// Removes every route that expired strictly before `now`.
    pub fn purge(&mut self, now: Time) {
        for routes in self.path_cache.values_mut() {
            routes.retain(|r| r.expire >= now);
        }
        self.path_cache.retain(|_, routes| !routes.is_empty());
    }

    /// All cached routes to `dst`, best first.
    pub fn routes_to(&self, dst: Ipv4Addr) -> &[RouteCacheEntry] {
        self.path_cache
            .get(&dst)
            .map(|r| r.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        if self.is_link_cache() {
            self.link_cache.len()
        } else {
            self.path_cache_len()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ****** Link cache ******

    /// Adds every link of `node_list` to the graph. `node` is the address of the cache owner.
    pub fn add_route_link(&mut self, node_list: &[Ipv4Addr], node: Ipv4Addr, now: Time) -> bool {
        if node_list.len() < 2 {
            return false;
        }
        let mut added = false;
        for pair in node_list.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a == b {
                continue;
            }
            let a_stab = self.node_stability(a, now);
            let b_stab = self.node_stability(b, now);
            let mut stability = if a_stab < b_stab { a_stab } else { b_stab };
            if stability < self.min_life_time {
                stability = self.min_life_time;
            }
            let expire = now + stability;
            let link = self
                .link_cache
                .entry(Link::new(a, b))
                .or_insert(LinkStab { expire });
            if expire > link.expire {
                link.expire = expire;
            }
            added = true;
        }
        if added {
            self.graph_dirty = true;
            debug!(self.logger, "Links cached"; "count" => node_list.len() - 1, "node" => %node);
        }
        added
    }

    /// Remaining stability of a node, registering it with the initial stability if unknown.
    fn node_stability(&mut self, node: Ipv4Addr, now: Time) -> Duration {
        let init = self.init_stability;
        let stab = self
            .node_cache
            .entry(node)
            .or_insert(NodeStab { expire: now + init });
        stab.expire - now
    }

    /// Longest stability a node can build up. Never shorter than the initial stability.
    fn max_stability(&self) -> Duration {
        if self.route_cache_timeout > self.init_stability {
            self.route_cache_timeout
        } else {
            self.init_stability
        }
    }

    /// Expiry of a node given `stability`, clamped to `[0, max_stability]`.
    fn stability_expire(&self, stability: Duration, now: Time) -> Time {
        let max = self.max_stability();
        let stability = if stability > max {
            max
        } else if stability < Duration::zero() {
            Duration::zero()
        } else {
            stability
        };
        now.checked_add_signed(stability).unwrap_or(now)
    }

    pub fn inc_stability(&mut self, node: Ipv4Addr, now: Time) {
        let new_stab = match self.node_cache.get(&node) {
            Some(stab) => self.policy.increase(stab.expire - now),
            None => self.init_stability,
        };
        let expire = self.stability_expire(new_stab, now);
        self.node_cache.insert(node, NodeStab { expire });
    }

    pub fn dec_stability(&mut self, node: Ipv4Addr, now: Time) {
        let new_stab = match self.node_cache.get(&node) {
            Some(stab) => self.policy.decrease(stab.expire - now),
            None => self.init_stability,
        };
        let expire = self.stability_expire(new_stab, now);
        self.node_cache.insert(node, NodeStab { expire });
    }

    /// Extends the stability of the links and nodes of a route that is being used.
    pub fn use_extends(&mut self, route: &[Ipv4Addr], now: Time) {
        if !self.is_link_cache() || route.len() < 2 {
            return;
        }
        let extended = now + self.use_extends;
        for pair in route.windows(2) {
            if let Some(stab) = self.link_cache.get_mut(&Link::new(pair[0], pair[1])) {
                if stab.expire < extended {
                    stab.expire = extended;
                }
            }
        }
        for node in route {
            let low = self
                .node_cache
                .get(node)
                .map(|s| s.expire - now <= self.init_stability)
                .unwrap_or(true);
            if low {
                self.inc_stability(*node, now);
            }
        }
        self.graph_dirty = true;
    }

    /// Removes links and nodes whose stability ran out. Links touching a removed node go too.
    pub fn purge_link_node(&mut self, now: Time) {
        let before = (self.link_cache.len(), self.node_cache.len());
        self.node_cache.retain(|_, stab| stab.expire >= now);
        let nodes = &self.node_cache;
        let owner = self.owner;
        self.link_cache.retain(|link, stab| {
            let (a, b) = link.endpoints();
            let alive = |n: Ipv4Addr| n == owner || nodes.contains_key(&n);
            stab.expire >= now && alive(a) && alive(b)
        });
        if before != (self.link_cache.len(), self.node_cache.len()) {
            self.graph_dirty = true;
        }
    }

    fn lookup_route_link(&mut self, dst: Ipv4Addr, now: Time) -> Option<RouteCacheEntry> {
        self.purge_link_node(now);
        if self.graph_dirty {
            self.rebuild_best_route_table(now);
        }
        self.best_routes
            .get(&dst)
            .filter(|path| path.len() >= 2)
            .map(|path| RouteCacheEntry::new(path.clone(), now + self.route_cache_timeout))
    }

    /// Shortest paths from the owner over the link graph. Ties are broken by the stability policy.
    fn rebuild_best_route_table(&mut self, now: Time) {
        let mut adjacency: BTreeMap<Ipv4Addr, BTreeSet<Ipv4Addr>> = BTreeMap::new();
        for link in self.link_cache.keys() {
            let (a, b) = link.endpoints();
            adjacency.entry(a).or_insert_with(BTreeSet::new).insert(b);
            adjacency.entry(b).or_insert_with(BTreeSet::new).insert(a);
        }

        let mut dist: HashMap<Ipv4Addr, u64> = HashMap::new();
        let mut pred: HashMap<Ipv4Addr, (Ipv4Addr, Duration)> = HashMap::new();
        let mut heap = BinaryHeap::new();
        dist.insert(self.owner, 0);
        heap.push(Reverse((0u64, self.owner)));

        while let Some(Reverse((cost, u))) = heap.pop() {
            if dist.get(&u).map(|d| cost > *d).unwrap_or(false) {
                continue;
            }
            let neighbours = match adjacency.get(&u) {
                Some(n) => n,
                None => continue,
            };
            for v in neighbours {
                let stability = self
                    .link_cache
                    .get(&Link::new(u, *v))
                    .map(|s| s.expire - now)
                    .unwrap_or_else(Duration::zero);
                let candidate = cost + self.policy.link_cost(stability);
                match dist.get(v) {
                    Some(d) if candidate > *d => {}
                    Some(d) if candidate == *d => {
                        let better = pred
                            .get(v)
                            .map(|(_, current)| self.policy.prefer(stability, *current))
                            .unwrap_or(false);
                        if better {
                            pred.insert(*v, (u, stability));
                        }
                    }
                    _ => {
                        dist.insert(*v, candidate);
                        pred.insert(*v, (u, stability));
                        heap.push(Reverse((candidate, *v)));
                    }
                }
            }
        }

        self.best_routes.clear();
        for dst in pred.keys() {
            let mut path = vec![*dst];
            let mut current = *dst;
            while let Some((prev, _)) = pred.get(&current) {
                path.push(*prev);
                current = *prev;
                if current == self.owner || path.len() > pred.len() + 1 {
                    break;
                }
            }
            if current == self.owner {
                path.reverse();
                self.best_routes.insert(*dst, path);
            }
        }
        self.graph_dirty = false;
    }

    pub fn link_stability(&self, a: Ipv4Addr, b: Ipv4Addr) -> Option<LinkStab> {
        self.link_cache.get(&Link::new(a, b)).copied()
    }

    pub fn node_stab(&self, node: Ipv4Addr) -> Option<NodeStab> {
        self.node_cache.get(&node).copied()
    }

    // ****** Neighbours ******

    pub fn add_neighbor(&mut self, address: Ipv4Addr, lifetime: Duration, now: Time) {
        let expire = now + lifetime;
        match self.neighbors.iter_mut().find(|n| n.address == address) {
            Some(n) => {
                if expire > n.expire {
                    n.expire = expire;
                }
                n.close = false;
            }
            None => self.neighbors.push(Neighbor {
                address,
                mac: MacAddress::from(address),
                expire,
                close: false,
            }),
        }
    }

    /// Extends the expiry of every known neighbour that appears in `node_list`.
    pub fn update_neighbor(&mut self, node_list: &[Ipv4Addr], lifetime: Duration, now: Time) {
        let expire = now + lifetime;
        for n in self.neighbors.iter_mut() {
            if node_list.contains(&n.address) && expire > n.expire {
                n.expire = expire;
            }
        }
    }

    pub fn is_neighbor(&self, address: Ipv4Addr, now: Time) -> bool {
        self.neighbors
            .iter()
            .any(|n| n.address == address && !n.close && n.expire >= now)
    }

    pub fn neighbor_mac(&self, address: Ipv4Addr) -> Option<MacAddress> {
        self.neighbors
            .iter()
            .find(|n| n.address == address)
            .map(|n| n.mac)
    }

    /// Removes expired neighbours and those the MAC failed to reach.
    pub fn purge_mac(&mut self, now: Time) {
        self.neighbors.retain(|n| !n.close && n.expire >= now);
    }

    pub fn process_tx_error(&mut self, address: Ipv4Addr) {
        for n in self.neighbors.iter_mut().filter(|n| n.address == address) {
            n.close = true;
        }
    }

    // ****** Acknowledgment ids ******

    /// Next acknowledgment id for packets sent to `next_hop`.
    pub fn check_unique_ack_id(&mut self, next_hop: Ipv4Addr) -> u16 {
        let id = self.ack_id_cache.entry(next_hop).or_insert(0);
        *id = id.wrapping_add(1);
        if *id == 0 {
            *id = 1;
        }
        *id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DsrConfig, StabilityPolicyKind};
    use crate::logging;
    use crate::network::sim_epoch;

    fn addr(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    fn path_cache() -> RouteCache {
        let config = Config::from(&DsrConfig::default());
        RouteCache::new(addr(1), &config, logging::create_discard_logger())
    }

    fn link_cache(policy: StabilityPolicyKind) -> RouteCache {
        let mut settings = DsrConfig::default();
        settings.cache_type = Some(CacheType::LinkCache);
        settings.stability_policy = Some(policy);
        let config = Config::from(&settings);
        RouteCache::new(addr(1), &config, logging::create_discard_logger())
    }

    fn route(hops: &[u8], expire: Time) -> RouteCacheEntry {
        RouteCacheEntry::new(hops.iter().map(|h| addr(*h)).collect(), expire)
    }

    #[test]
    fn add_route_is_idempotent() {
        let mut cache = path_cache();
        let now = sim_epoch();
        let later = now + Duration::seconds(10);
        assert!(cache.add_route(route(&[1, 2, 3], later), now));
        assert!(!cache.add_route(route(&[1, 2, 3], later + Duration::seconds(5)), now));
        assert_eq!(cache.routes_to(addr(3)).len(), 1);
        assert_eq!(cache.routes_to(addr(3))[0].expire, later + Duration::seconds(5));
    }

    #[test]
    fn self_routes_are_rejected() {
        let mut cache = path_cache();
        let now = sim_epoch();
        let later = now + Duration::seconds(10);
        assert!(!cache.add_route(route(&[1], later), now));
        assert!(!cache.add_route(route(&[1, 2, 1], later), now));
        assert!(!cache.add_route(route(&[2, 3], later), now));
        assert!(cache.is_empty());
    }

    #[test]
    fn per_destination_cap_evicts_the_oldest() {
        let mut settings = DsrConfig::default();
        settings.max_entries_each_dst = Some(2);
        let config = Config::from(&settings);
        let mut cache = RouteCache::new(addr(1), &config, logging::create_discard_logger());
        let now = sim_epoch();
        assert!(cache.add_route(route(&[1, 2, 9], now + Duration::seconds(1)), now));
        assert!(cache.add_route(route(&[1, 3, 9], now + Duration::seconds(2)), now));
        assert!(cache.add_route(route(&[1, 4, 9], now + Duration::seconds(3)), now));
        let routes: Vec<Vec<Ipv4Addr>> = cache
            .routes_to(addr(9))
            .iter()
            .map(|r| r.path.clone())
            .collect();
        assert_eq!(routes, vec![vec![addr(1), addr(4), addr(9)], vec![addr(1), addr(3), addr(9)]]);
    }

    #[test]
    fn global_cap_evicts_the_globally_oldest() {
        let mut settings = DsrConfig::default();
        settings.max_cache_len = Some(2);
        let config = Config::from(&settings);
        let mut cache = RouteCache::new(addr(1), &config, logging::create_discard_logger());
        let now = sim_epoch();
        assert!(cache.add_route(route(&[1, 2], now + Duration::seconds(1)), now));
        assert!(cache.add_route(route(&[1, 3], now + Duration::seconds(5)), now));
        assert!(cache.add_route(route(&[1, 4], now + Duration::seconds(3)), now));
        assert_eq!(cache.len(), 2);
        assert!(cache.routes_to(addr(2)).is_empty());
    }

    #[test]
    fn purge_only_removes_expired_entries() {
        let mut cache = path_cache();
        let now = sim_epoch();
        assert!(cache.add_route(route(&[1, 2], now + Duration::seconds(1)), now));
        assert!(cache.add_route(route(&[1, 3], now + Duration::seconds(2)), now));
        cache.purge(now + Duration::seconds(1));
        assert_eq!(cache.routes_to(addr(2)).len(), 1);
        cache.purge(now + Duration::milliseconds(1001));
        assert!(cache.routes_to(addr(2)).is_empty());
        assert_eq!(cache.routes_to(addr(3)).len(), 1);
    }

    #[test]
    fn lookup_derives_prefix_routes() {
        let mut cache = path_cache();
        let now = sim_epoch();
        assert!(cache.add_route(route(&[1, 2, 3, 4], now + Duration::seconds(10)), now));
        let sub = cache.lookup_route(addr(3), now).expect("No route derived");
        assert_eq!(sub.path, vec![addr(1), addr(2), addr(3)]);
        assert_eq!(sub.destination, addr(3));
        assert!(cache.lookup_route(addr(7), now).is_none());
    }

    #[test]
    fn broken_links_truncate_routes() {
        let mut cache = path_cache();
        let now = sim_epoch();
        let later = now + Duration::seconds(10);
        assert!(cache.add_route(route(&[1, 2, 3, 4], later), now));
        assert!(cache.add_route(route(&[1, 5, 4], later), now));
        cache.delete_all_routes_include_link(addr(2), addr(3), addr(1), now);

        let to_four: Vec<Vec<Ipv4Addr>> = cache
            .routes_to(addr(4))
            .iter()
            .map(|r| r.path.clone())
            .collect();
        assert_eq!(to_four, vec![vec![addr(1), addr(5), addr(4)]]);
        // The part before the broken link stays usable
        assert_eq!(cache.routes_to(addr(2))[0].path, vec![addr(1), addr(2)]);
    }

    #[test]
    fn broken_links_without_sub_routes() {
        let mut settings = DsrConfig::default();
        settings.enable_sub_route = Some(false);
        let config = Config::from(&settings);
        let mut cache = RouteCache::new(addr(1), &config, logging::create_discard_logger());
        let now = sim_epoch();
        assert!(cache.add_route(route(&[1, 2, 3, 4], now + Duration::seconds(10)), now));
        cache.delete_all_routes_include_link(addr(2), addr(3), addr(1), now);
        assert!(cache.is_empty());
    }

    #[test]
    fn link_cache_finds_shortest_paths() {
        let mut cache = link_cache(StabilityPolicyKind::StabilityWeighted);
        let now = sim_epoch();
        assert!(cache.add_route_link(&[addr(1), addr(2), addr(3), addr(4)], addr(1), now));
        assert!(cache.add_route_link(&[addr(1), addr(5), addr(4)], addr(1), now));
        let best = cache.lookup_route(addr(4), now).expect("No route");
        assert_eq!(best.path, vec![addr(1), addr(5), addr(4)]);

        cache.delete_all_routes_include_link(addr(5), addr(4), addr(1), now);
        let best = cache.lookup_route(addr(4), now).expect("No route");
        assert_eq!(best.path, vec![addr(1), addr(2), addr(3), addr(4)]);
    }

    #[test]
    fn link_cache_tie_break_follows_the_policy() {
        let now = sim_epoch();
        for policy in &[StabilityPolicyKind::StabilityWeighted, StabilityPolicyKind::ShortestHop] {
            let mut cache = link_cache(*policy);
            assert!(cache.add_route_link(&[addr(1), addr(2), addr(4)], addr(1), now));
            assert!(cache.add_route_link(&[addr(1), addr(3), addr(4)], addr(1), now));
            // Make the link through node 3 the more stable one
            cache.use_extends(&[addr(1), addr(3), addr(4)], now);
            let best = cache.lookup_route(addr(4), now).expect("No route");
            match policy {
                StabilityPolicyKind::StabilityWeighted => {
                    assert_eq!(best.path, vec![addr(1), addr(3), addr(4)])
                }
                StabilityPolicyKind::ShortestHop => {
                    assert_eq!(best.path, vec![addr(1), addr(2), addr(4)])
                }
            }
        }
    }

    #[test]
    fn link_stability_tracks_usage() {
        let mut cache = link_cache(StabilityPolicyKind::StabilityWeighted);
        let now = sim_epoch();
        assert!(cache.add_route_link(&[addr(1), addr(2)], addr(1), now));
        let init = cache.node_stab(addr(2)).expect("Node not registered").expire - now;
        assert_eq!(init, Duration::seconds(25));

        cache.inc_stability(addr(2), now);
        assert_eq!(cache.node_stab(addr(2)).map(|s| s.expire - now), Some(Duration::seconds(100)));
        cache.dec_stability(addr(2), now);
        assert_eq!(cache.node_stab(addr(2)).map(|s| s.expire - now), Some(Duration::seconds(50)));

        // Links expire with their stability
        let link_expire = cache.link_stability(addr(1), addr(2)).expect("Link missing").expire;
        assert!(cache.lookup_route(addr(2), now).is_some());
        assert!(cache.lookup_route(addr(2), link_expire + Duration::milliseconds(1)).is_none());
    }

    #[test]
    fn stability_growth_is_bounded() {
        let mut cache = link_cache(StabilityPolicyKind::StabilityWeighted);
        let now = sim_epoch();
        assert!(cache.add_route_link(&[addr(1), addr(2)], addr(1), now));
        for _ in 0..100 {
            cache.inc_stability(addr(2), now);
        }
        assert_eq!(
            cache.node_stab(addr(2)).map(|s| s.expire - now),
            Some(Duration::seconds(300))
        );
        // Links built on a capped node stay representable
        assert!(cache.add_route_link(&[addr(2), addr(3)], addr(1), now));
        assert!(cache.lookup_route(addr(3), now).is_some());
    }

    #[test]
    fn derived_routes_respect_the_cache_bounds() {
        let mut settings = DsrConfig::default();
        settings.max_cache_len = Some(2);
        let config = Config::from(&settings);
        let mut cache = RouteCache::new(addr(1), &config, logging::create_discard_logger());
        let now = sim_epoch();
        assert!(cache.add_route(route(&[1, 2, 3, 4, 5], now + Duration::seconds(10)), now));
        assert!(cache.add_route(route(&[1, 6], now + Duration::seconds(20)), now));

        assert!(cache.lookup_route(addr(2), now).is_some());
        assert!(cache.lookup_route(addr(3), now).is_some());
        assert!(cache.lookup_route(addr(4), now).is_some());
        assert!(cache.len() <= 2);
    }

    #[test]
    fn neighbours_close_on_tx_errors() {
        let mut cache = path_cache();
        let now = sim_epoch();
        cache.add_neighbor(addr(2), Duration::seconds(5), now);
        assert!(cache.is_neighbor(addr(2), now));
        assert_eq!(
            cache.neighbor_mac(addr(2)).map(|m| m.to_string()),
            Some(String::from("02:00:0a:00:00:02"))
        );
        cache.process_tx_error(addr(2));
        assert!(!cache.is_neighbor(addr(2), now));
        cache.purge_mac(now);
        assert!(cache.neighbor_mac(addr(2)).is_none());
    }

    #[test]
    fn ack_ids_are_per_next_hop() {
        let mut cache = path_cache();
        assert_eq!(cache.check_unique_ack_id(addr(2)), 1);
        assert_eq!(cache.check_unique_ack_id(addr(2)), 2);
        assert_eq!(cache.check_unique_ack_id(addr(3)), 1);
    }
}
