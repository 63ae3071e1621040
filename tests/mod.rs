extern crate assert_cli;
extern crate chrono;
extern crate mesh_dsr;

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

use self::chrono::prelude::*;
use self::chrono::Duration;
use self::mesh_dsr::config::*;
use self::mesh_dsr::logging;
use self::mesh_dsr::simulation::*;
use std::env;
use std::fs;
use std::net::Ipv4Addr;
use std::path::PathBuf;

mod integration;
mod unit;

/***********************************************/
/**************** Helper functions *************/
/***********************************************/

//DSR_TEST_DIR can point to a directory where test results should be kept.
fn get_tests_root() -> PathBuf {
    env::var("DSR_TEST_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir())
}

/// Creates a fresh directory for the results of a test.
pub fn create_test_dir(test_name: &str) -> String {
    let now: DateTime<Utc> = Utc::now();
    let mut test_dir = get_tests_root();
    test_dir.push(format!("{}_{}", test_name, now.timestamp_nanos()));
    fs::create_dir_all(&test_dir).expect("Unable to create test results directory");
    test_dir.to_string_lossy().into_owned()
}

pub fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, last)
}

/// Builds a network of nodes `10.0.0.n` connected by the given links.
pub fn build_network(nodes: &[u8], links: &[(u8, u8)], settings: DsrConfig) -> SimNetwork {
    let mut net = SimNetwork::new(
        settings,
        1,
        Duration::milliseconds(1),
        logging::create_discard_logger(),
    );
    for n in nodes {
        net.add_node(addr(*n)).expect("Could not add node");
    }
    for (a, b) in links {
        net.connect(addr(*a), addr(*b));
    }
    net
}

/// Sequence numbers of the packets delivered at `node`, in arrival order.
pub fn delivered_sequences(net: &SimNetwork, node: u8) -> Vec<u32> {
    net.node(addr(node))
        .expect("Unknown node")
        .delivered
        .iter()
        .filter_map(|p| payload_sequence(&p.payload))
        .collect()
}
