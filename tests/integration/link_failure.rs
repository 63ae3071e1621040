use super::super::*;
use mesh_dsr::dsr::route_cache::RouteCacheEntry;
use mesh_dsr::network::RouteErrorCode;

fn uses_link(path: &[Ipv4Addr], a: Ipv4Addr, b: Ipv4Addr) -> bool {
    path.windows(2).any(|w| w[0] == a && w[1] == b)
}

// 1-2-3 breaks at 2-3 while 1-4-3 comes up.
#[test]
fn test_broken_link_is_reported_and_avoided() {
    let mut net = build_network(&[1, 2, 3, 4], &[(1, 2), (2, 3), (1, 4)], DsrConfig::default());
    net.send_now(addr(1), addr(3), packet_payload(0, 16))
        .expect("Send failed");
    net.schedule_link_change(Duration::seconds(2), addr(2), addr(3), false);
    net.schedule_link_change(Duration::seconds(2), addr(4), addr(3), true);
    net.schedule_send(Duration::seconds(3), addr(1), addr(3), packet_payload(1, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(4)).expect("Run failed");

    let source = net.node(addr(1)).unwrap();
    assert_eq!(
        source.route_errors,
        vec![(addr(3), RouteErrorCode::LinkBroken)]
    );
    for route in source.routing.route_cache().routes_to(addr(3)) {
        assert!(!uses_link(&route.path, addr(2), addr(3)));
    }
    // The relay had no other way to 3
    assert_eq!(delivered_sequences(&net, 3), vec![0]);

    net.schedule_send(Duration::seconds(4), addr(1), addr(3), packet_payload(2, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 3), vec![0, 2]);
    assert_eq!(
        net.node(addr(1)).unwrap().routing.route_cache().routes_to(addr(3))[0].path,
        vec![addr(1), addr(4), addr(3)]
    );
    assert_eq!(net.stale_timer_events(), 0);
}

fn salvage_network(settings: DsrConfig) -> SimNetwork {
    let mut net = build_network(&[1, 2, 3, 5], &[(1, 2), (2, 3), (2, 5), (5, 3)], settings);
    net.send_now(addr(1), addr(3), packet_payload(0, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    // Give the relay a second, less fresh route to 3
    let now = net.now();
    let relay = net.node_mut(addr(2)).unwrap();
    assert!(relay.routing.route_cache_mut().add_route(
        RouteCacheEntry::new(vec![addr(2), addr(5), addr(3)], now + Duration::seconds(100)),
        now
    ));
    net.disconnect(addr(2), addr(3));
    net
}

#[test]
fn test_relay_salvages_over_an_alternate_route() {
    let mut net = salvage_network(DsrConfig::default());
    net.send_now(addr(1), addr(3), packet_payload(1, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(2)).expect("Run failed");

    assert_eq!(delivered_sequences(&net, 3), vec![0, 1]);
    let source = net.node(addr(1)).unwrap();
    assert_eq!(
        source.route_errors,
        vec![(addr(3), RouteErrorCode::LinkBroken)]
    );
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_salvage_is_bounded() {
    let mut settings = DsrConfig::default();
    settings.max_salvage_count = Some(0);
    let mut net = salvage_network(settings);
    net.send_now(addr(1), addr(3), packet_payload(1, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(2)).expect("Run failed");

    assert_eq!(delivered_sequences(&net, 3), vec![0]);
    assert_eq!(net.stale_timer_events(), 0);
}
