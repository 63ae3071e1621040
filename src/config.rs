//! This module defines the configuration structs of the DSR engine and of the scenarios it runs in.
//! Both deserialize from TOML files, so a scenario can be described once and handed to `dsr_cli`.
use crate::{DsrError, DsrErrorKind};
use std::fs::File;
use std::io::{Read, Write};
use std::net::Ipv4Addr;
use std::path::Path;

/// Storage strategy of the route cache.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum CacheType {
    /// Bounded set of complete routes per destination.
    PathCache,
    /// Link-state graph from which routes are computed.
    LinkCache,
}

/// Tie-break and stability update rule used by the link cache.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq, Clone, Copy)]
pub enum StabilityPolicyKind {
    /// Among equally short paths prefer the one through the more stable link.
    StabilityWeighted,
    /// Plain hop count; the first path found wins.
    ShortestHop,
}

/// Protocol parameters. Every field is optional and falls back to the protocol default.
/// Durations are expressed in milliseconds.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone, Default)]
pub struct DsrConfig {
    pub max_send_buff_len: Option<usize>,
    pub send_buff_timeout: Option<i64>,
    pub max_maint_len: Option<usize>,
    pub max_maint_time: Option<i64>,
    pub max_cache_len: Option<usize>,
    pub route_cache_timeout: Option<i64>,
    pub max_entries_each_dst: Option<usize>,
    pub send_buff_interval: Option<i64>,
    pub node_traversal_time: Option<i64>,
    pub rreq_retries: Option<u32>,
    pub maintenance_retries: Option<u32>,
    pub request_table_size: Option<usize>,
    pub request_id_size: Option<usize>,
    pub non_prop_request_timeout: Option<i64>,
    pub discovery_hop_limit: Option<u8>,
    pub max_salvage_count: Option<u8>,
    pub blacklist_timeout: Option<i64>,
    pub grat_reply_holdoff: Option<i64>,
    pub broadcast_jitter: Option<i64>,
    pub link_ack_timeout: Option<i64>,
    pub try_link_acks: Option<u32>,
    pub passive_ack_timeout: Option<i64>,
    pub try_passive_acks: Option<u32>,
    pub request_period: Option<i64>,
    pub max_request_period: Option<i64>,
    pub grat_reply_table_size: Option<usize>,
    pub cache_type: Option<CacheType>,
    pub stability_decr_factor: Option<u32>,
    pub stability_incr_factor: Option<u32>,
    pub init_stability: Option<i64>,
    pub min_life_time: Option<i64>,
    pub use_extends: Option<i64>,
    pub enable_sub_route: Option<bool>,
    pub retrans_incr: Option<i64>,
    pub max_network_queue_size: Option<usize>,
    pub max_network_queue_delay: Option<i64>,
    pub link_acknowledgment: Option<bool>,
    pub received_rreq_timeout: Option<i64>,
    pub stability_policy: Option<StabilityPolicyKind>,
}

/// Upper bound accepted for any protocol or link duration (one day, in ms).
pub const MAX_DURATION_MS: i64 = 86_400_000;

impl DsrConfig {
    ///Checks that every configured duration is non-negative and at most `MAX_DURATION_MS`.
    pub fn validate(&self) -> Result<(), DsrError> {
        let durations = [
            ("send_buff_timeout", self.send_buff_timeout),
            ("max_maint_time", self.max_maint_time),
            ("route_cache_timeout", self.route_cache_timeout),
            ("send_buff_interval", self.send_buff_interval),
            ("node_traversal_time", self.node_traversal_time),
            ("non_prop_request_timeout", self.non_prop_request_timeout),
            ("blacklist_timeout", self.blacklist_timeout),
            ("grat_reply_holdoff", self.grat_reply_holdoff),
            ("broadcast_jitter", self.broadcast_jitter),
            ("link_ack_timeout", self.link_ack_timeout),
            ("passive_ack_timeout", self.passive_ack_timeout),
            ("request_period", self.request_period),
            ("max_request_period", self.max_request_period),
            ("init_stability", self.init_stability),
            ("min_life_time", self.min_life_time),
            ("use_extends", self.use_extends),
            ("retrans_incr", self.retrans_incr),
            ("max_network_queue_delay", self.max_network_queue_delay),
            ("received_rreq_timeout", self.received_rreq_timeout),
        ];
        for (name, value) in durations.iter() {
            if let Some(ms) = value {
                check_duration(name, *ms)?;
            }
        }
        Ok(())
    }
}

fn check_duration(name: &str, ms: i64) -> Result<(), DsrError> {
    if ms < 0 || ms > MAX_DURATION_MS {
        let err_msg = format!(
            "{} must be between 0 and {} ms, got {}",
            name, MAX_DURATION_MS, ms
        );
        return Err(DsrError::from(DsrErrorKind::Configuration(err_msg)));
    }
    Ok(())
}

///A bidirectional link between two nodes of a scenario.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LinkConfig {
    pub a: Ipv4Addr,
    pub b: Ipv4Addr,
}

///A link going up or down at a given time (ms from the start of the run).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct LinkEvent {
    pub at: i64,
    pub a: Ipv4Addr,
    pub b: Ipv4Addr,
    pub up: bool,
}

///Constant bit-rate traffic between two nodes.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct TrafficConfig {
    ///Start time (ms from the start of the run).
    pub start: i64,
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub packets: usize,
    ///Time between packets (ms).
    pub interval: i64,
    pub payload_size: usize,
}

/// Configuration of a simulated run: topology, traffic and protocol parameters.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct SimulationConfig {
    ///Random seed used for all RNG operations.
    pub random_seed: u64,
    ///Length of the run (ms).
    pub duration: i64,
    ///Time a frame takes to cross a link (ms).
    pub transmission_delay: Option<i64>,
    ///Directory for logs and results. Must have RW access to it.
    pub work_dir: Option<String>,
    ///Log to the terminal as well as the log file.
    pub term_log: Option<bool>,
    ///Addresses of the nodes in the scenario.
    pub nodes: Vec<Ipv4Addr>,
    ///NOTE: Due to the way serde_toml works, the table fields must be kept last in the structure.
    ///This is because they are interpreted as TOML tables, and those are always placed at the end of structures.
    #[serde(default)]
    pub protocol: DsrConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<LinkConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub link_events: Vec<LinkEvent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub traffic: Vec<TrafficConfig>,
}

impl SimulationConfig {
    ///Creates a three-node line scenario with default settings.
    pub fn new() -> SimulationConfig {
        let n1 = Ipv4Addr::new(10, 0, 0, 1);
        let n2 = Ipv4Addr::new(10, 0, 0, 2);
        let n3 = Ipv4Addr::new(10, 0, 0, 3);
        SimulationConfig {
            random_seed: 0,
            duration: 10_000,
            transmission_delay: None,
            work_dir: None,
            term_log: None,
            nodes: vec![n1, n2, n3],
            protocol: DsrConfig::default(),
            links: vec![LinkConfig { a: n1, b: n2 }, LinkConfig { a: n2, b: n3 }],
            link_events: vec![],
            traffic: vec![TrafficConfig {
                start: 1_000,
                source: n1,
                destination: n3,
                packets: 1,
                interval: 0,
                payload_size: 64,
            }],
        }
    }

    ///Loads a scenario from a TOML file.
    pub fn from_file<P: AsRef<Path>>(file_path: P) -> Result<SimulationConfig, DsrError> {
        let mut file_content = String::new();
        let mut file = File::open(file_path).map_err(|e| {
            let err_msg = String::from("Failed to open configuration file");
            DsrError {
                kind: DsrErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        file.read_to_string(&mut file_content).map_err(|e| {
            let err_msg = String::from("Failed to read configuration file");
            DsrError {
                kind: DsrErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        let config: SimulationConfig = toml::from_str(&file_content).map_err(|e| {
            let err_msg = String::from("Failed to deserialize configuration file");
            DsrError {
                kind: DsrErrorKind::Serialization(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        config.validate()?;

        Ok(config)
    }

    ///Checks that links, events and traffic only reference declared nodes, and that every
    ///duration is in range.
    pub fn validate(&self) -> Result<(), DsrError> {
        let known = |a: &Ipv4Addr| self.nodes.contains(a);
        let link_ok = self.links.iter().all(|l| known(&l.a) && known(&l.b));
        let events_ok = self.link_events.iter().all(|l| known(&l.a) && known(&l.b));
        let traffic_ok = self
            .traffic
            .iter()
            .all(|t| known(&t.source) && known(&t.destination));
        if !(link_ok && events_ok && traffic_ok) {
            let err_msg = String::from("Scenario references an undeclared node");
            return Err(DsrError::from(DsrErrorKind::Configuration(err_msg)));
        }
        if self.duration <= 0 {
            let err_msg = String::from("Scenario duration must be positive");
            return Err(DsrError::from(DsrErrorKind::Configuration(err_msg)));
        }
        if let Some(delay) = self.transmission_delay {
            check_duration("transmission_delay", delay)?;
        }
        let times_ok = self.link_events.iter().all(|e| e.at >= 0)
            && self.traffic.iter().all(|t| t.start >= 0 && t.interval >= 0);
        if !times_ok {
            let err_msg = String::from("Scenario event times must not be negative");
            return Err(DsrError::from(DsrErrorKind::Configuration(err_msg)));
        }
        self.protocol.validate()
    }

    ///Writes the current configuration object to a formatted configuration file, that can be passed to
    ///the dsr_cli binary.
    pub fn write_to_file<P: AsRef<Path>>(&self, file_path: P) -> Result<(), DsrError> {
        let data = toml::to_string(self).map_err(|e| {
            let err_msg = String::from("Error writing configuration to file");
            DsrError {
                kind: DsrErrorKind::Serialization(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
        let mut file = File::create(&file_path)?;
        write!(file, "{}", data)?;

        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig::new()
    }
}
