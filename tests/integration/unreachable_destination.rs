use super::super::*;
use mesh_dsr::dsr::DiscoveryState;
use mesh_dsr::network::RouteErrorCode;

#[test]
fn test_discovery_gives_up_after_max_retries() {
    let mut settings = DsrConfig::default();
    settings.rreq_retries = Some(3);
    // Node 3 has no links at all
    let mut net = build_network(&[1, 2, 3], &[(1, 2)], settings);
    net.send_now(addr(1), addr(3), packet_payload(0, 16))
        .expect("Send failed");
    net.send_now(addr(1), addr(3), packet_payload(1, 16))
        .expect("Send failed");

    // Attempts at 0, 30ms and 2.03s; the third flood times out at 6.53s
    net.run_for(Duration::seconds(6)).expect("Run failed");
    let source = net.node(addr(1)).unwrap();
    assert!(source.route_errors.is_empty());
    assert_eq!(source.routing.send_buffer().len(), 2);

    net.run_for(Duration::seconds(4)).expect("Run failed");
    let source = net.node(addr(1)).unwrap();
    assert_eq!(
        source.route_errors,
        vec![(addr(3), RouteErrorCode::RouteNotFound)]
    );
    assert!(source.routing.send_buffer().is_empty());
    assert_eq!(
        source.routing.discovery_state(addr(3)),
        DiscoveryState::Failed
    );
    assert_eq!(source.routing.rreq_table().get_rreq_cnt(addr(3)), 0);
    assert!(delivered_sequences(&net, 3).is_empty());
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_retry_backoff_is_capped() {
    let mut settings = DsrConfig::default();
    settings.rreq_retries = Some(5);
    settings.max_request_period = Some(3_000);
    let mut net = build_network(&[1, 2], &[(1, 2)], settings);
    net.send_now(addr(1), addr(9), packet_payload(0, 16))
        .expect("Send failed");

    // Gives up at 30ms + 2s + 3s + 3s + 3s with the cap, instead of 30ms + 2s + 4.5s + 8s + 10s
    net.run_for(Duration::milliseconds(11_000)).expect("Run failed");
    assert!(net.node(addr(1)).unwrap().route_errors.is_empty());
    net.run_for(Duration::milliseconds(500)).expect("Run failed");
    let source = net.node(addr(1)).unwrap();
    assert_eq!(
        source.route_errors,
        vec![(addr(9), RouteErrorCode::RouteNotFound)]
    );
    assert_eq!(net.stale_timer_events(), 0);
}
