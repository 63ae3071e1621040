use super::super::*;
use mesh_dsr::dsr::route_cache::RouteCacheEntry;
use mesh_dsr::dsr::{DiscoveryState, ReceiveStatus, SendStatus};

#[test]
fn test_discovery_over_a_line() {
    let mut net = build_network(&[1, 2, 3], &[(1, 2), (2, 3)], DsrConfig::default());

    let status = net
        .send_now(addr(1), addr(3), packet_payload(0, 32))
        .expect("Send failed");
    assert_eq!(status, SendStatus::Buffered);
    assert_eq!(
        net.node(addr(1)).unwrap().routing.discovery_state(addr(3)),
        DiscoveryState::Requesting
    );

    net.run_for(Duration::seconds(1)).expect("Run failed");

    assert_eq!(delivered_sequences(&net, 3), vec![0]);
    let source = net.node(addr(1)).unwrap();
    assert_eq!(
        source.routing.discovery_state(addr(3)),
        DiscoveryState::Replied
    );
    assert!(source.routing.send_buffer().is_empty());
    assert!(source.routing.maintain_buffer().is_empty());
    assert_eq!(
        source.routing.route_cache().routes_to(addr(3))[0].path,
        vec![addr(1), addr(2), addr(3)]
    );
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_cached_route_is_reused() {
    let mut net = build_network(&[1, 2, 3], &[(1, 2), (2, 3)], DsrConfig::default());
    net.send_now(addr(1), addr(3), packet_payload(0, 32))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    let status = net
        .send_now(addr(1), addr(3), packet_payload(1, 32))
        .expect("Send failed");
    assert_eq!(status, SendStatus::Sent);
    net.run_for(Duration::seconds(1)).expect("Run failed");

    assert_eq!(delivered_sequences(&net, 3), vec![0, 1]);
    // Every hop-by-hop confirmation was received
    for node in net.nodes() {
        assert!(node.routing.maintain_buffer().is_empty());
    }
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_intermediate_node_learns_both_directions() {
    let mut net = build_network(&[1, 2, 3], &[(1, 2), (2, 3)], DsrConfig::default());
    net.send_now(addr(1), addr(3), packet_payload(0, 32))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    let relay = net.node(addr(2)).unwrap();
    assert!(!relay.routing.route_cache().routes_to(addr(1)).is_empty());
    assert!(!relay.routing.route_cache().routes_to(addr(3)).is_empty());
    // The one-hop request stops at the first relay
    assert!(relay.statuses.contains(&ReceiveStatus::Dropped(
        mesh_dsr::dsr::DropReason::HopLimitReached
    )));
    assert!(relay.statuses.contains(&ReceiveStatus::Forwarded));
}

#[test]
fn test_send_to_self_is_delivered_locally() {
    let mut net = build_network(&[1, 2], &[(1, 2)], DsrConfig::default());
    let status = net
        .send_now(addr(1), addr(1), packet_payload(7, 8))
        .expect("Send failed");
    assert_eq!(status, SendStatus::Delivered);
    assert_eq!(delivered_sequences(&net, 1), vec![7]);
}

#[test]
fn test_intermediate_node_replies_from_its_cache() {
    let mut settings = DsrConfig::default();
    settings.node_traversal_time = Some(40);
    // Keeps the flooded request out of the picture
    settings.non_prop_request_timeout = Some(1000);
    let mut net = build_network(&[1, 2, 3, 4], &[(1, 2), (2, 3), (3, 4)], settings);
    let start = net.now();
    {
        let relay = net.node_mut(addr(2)).unwrap();
        assert!(relay.routing.route_cache_mut().add_route(
            RouteCacheEntry::new(vec![addr(2), addr(3), addr(4)], start + Duration::seconds(10)),
            start
        ));
    }

    net.send_now(addr(1), addr(4), packet_payload(0, 32))
        .expect("Send failed");
    // The cached reply waits at least two node traversal times per extra hop
    net.run_for(Duration::milliseconds(70)).expect("Run failed");
    assert!(delivered_sequences(&net, 4).is_empty());
    assert_eq!(
        net.node(addr(2)).unwrap().statuses,
        vec![ReceiveStatus::Processed]
    );

    net.run_for(Duration::milliseconds(500)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 4), vec![0]);
    let arrival = net.node(addr(4)).unwrap().delivered[0].at;
    assert!(arrival - start >= Duration::milliseconds(80));

    let source = net.node(addr(1)).unwrap();
    assert_eq!(
        source.routing.discovery_state(addr(4)),
        DiscoveryState::Replied
    );
    assert_eq!(
        source.routing.route_cache().routes_to(addr(4))[0].path,
        vec![addr(1), addr(2), addr(3), addr(4)]
    );
    // Only the data packet reached the target, so no request went past node 2
    assert_eq!(
        net.node(addr(4)).unwrap().statuses,
        vec![ReceiveStatus::Delivered]
    );
    assert_eq!(net.stale_timer_events(), 0);
}
