use super::super::*;

fn flow_of(net: &mut SimNetwork, packets: u32, interval: Duration) {
    for seq in 0..packets {
        net.schedule_send(interval * seq as i32, addr(1), addr(3), packet_payload(seq, 64))
            .expect("Could not schedule send");
    }
}

#[test]
fn test_long_flow_over_a_path_cache() {
    let mut net = build_network(&[1, 2, 3], &[(1, 2), (2, 3)], DsrConfig::default());
    flow_of(&mut net, 40, Duration::milliseconds(50));
    net.run_for(Duration::seconds(5)).expect("Run failed");

    assert_eq!(delivered_sequences(&net, 3), (0..40).collect::<Vec<u32>>());
    for node in net.nodes() {
        assert!(node.routing.maintain_buffer().is_empty());
        assert!(node.routing.send_buffer().is_empty());
    }
    assert_eq!(net.report().packets_sent, 40);
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_long_flow_over_a_link_cache() {
    let mut settings = DsrConfig::default();
    settings.cache_type = Some(CacheType::LinkCache);
    let mut net = build_network(&[1, 2, 3], &[(1, 2), (2, 3)], settings);
    flow_of(&mut net, 40, Duration::milliseconds(50));
    net.run_for(Duration::seconds(5)).expect("Run failed");

    assert_eq!(delivered_sequences(&net, 3), (0..40).collect::<Vec<u32>>());
    let source = net.node(addr(1)).unwrap();
    assert!(source.routing.route_cache().is_link_cache());
    assert!(source.routing.maintain_buffer().is_empty());
    assert_eq!(net.stale_timer_events(), 0);
}
