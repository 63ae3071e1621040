use super::super::*;
use mesh_dsr::dsr::route_cache::RouteCacheEntry;
use mesh_dsr::dsr::SendStatus;

// 1 uses 1-2-3-4 although 3 can hear 1 directly.
#[test]
fn test_overhearing_node_offers_a_shorter_route() {
    let mut net = build_network(
        &[1, 2, 3, 4],
        &[(1, 2), (2, 3), (3, 4), (1, 3)],
        DsrConfig::default(),
    );
    let now = net.now();
    let source = net.node_mut(addr(1)).unwrap();
    assert!(source.routing.route_cache_mut().add_route(
        RouteCacheEntry::new(
            vec![addr(1), addr(2), addr(3), addr(4)],
            now + Duration::seconds(10)
        ),
        now
    ));

    let status = net
        .send_now(addr(1), addr(4), packet_payload(0, 16))
        .expect("Send failed");
    assert_eq!(status, SendStatus::Sent);
    net.run_for(Duration::seconds(1)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 4), vec![0]);
    assert_eq!(
        net.node(addr(1)).unwrap().routing.route_cache().routes_to(addr(4))[0].path,
        vec![addr(1), addr(3), addr(4)]
    );

    net.send_now(addr(1), addr(4), packet_payload(1, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 4), vec![0, 1]);
    assert!(net
        .node(addr(2))
        .unwrap()
        .routing
        .maintain_buffer()
        .is_empty());
    assert_eq!(net.stale_timer_events(), 0);
}
