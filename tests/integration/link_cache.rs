use super::super::*;
use mesh_dsr::dsr::SendStatus;

fn link_cache_settings() -> DsrConfig {
    let mut settings = DsrConfig::default();
    settings.cache_type = Some(CacheType::LinkCache);
    settings
}

#[test]
fn test_discovery_with_link_cache() {
    let mut net = build_network(&[1, 2, 3], &[(1, 2), (2, 3)], link_cache_settings());
    net.send_now(addr(1), addr(3), packet_payload(0, 32))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 3), vec![0]);

    let status = net
        .send_now(addr(1), addr(3), packet_payload(1, 32))
        .expect("Send failed");
    assert_eq!(status, SendStatus::Sent);
    net.run_for(Duration::seconds(1)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 3), vec![0, 1]);

    let source = net.node(addr(1)).unwrap();
    assert!(source.routing.route_cache().is_link_cache());
    assert!(source.routing.route_cache().len() >= 2);
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_link_cache_recovers_from_a_broken_link() {
    let mut net = build_network(&[1, 2, 3, 4], &[(1, 2), (2, 3), (1, 4)], link_cache_settings());
    net.send_now(addr(1), addr(3), packet_payload(0, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    net.disconnect(addr(2), addr(3));
    net.connect(addr(4), addr(3));
    net.send_now(addr(1), addr(3), packet_payload(1, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(2)).expect("Run failed");

    net.send_now(addr(1), addr(3), packet_payload(2, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");
    assert_eq!(delivered_sequences(&net, 3), vec![0, 2]);
    assert_eq!(net.stale_timer_events(), 0);
}
