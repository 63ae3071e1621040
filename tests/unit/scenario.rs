use super::super::*;

//Unit test for: SimulationConfig::write_to_file
#[test]
fn test_scenario_file_round_trip() {
    let work_dir = create_test_dir("scenario_round_trip");
    let file = format!("{}{}scenario.toml", &work_dir, std::path::MAIN_SEPARATOR);
    let mut scenario = SimulationConfig::new();
    scenario.protocol.cache_type = Some(CacheType::LinkCache);
    scenario.link_events.push(LinkEvent {
        at: 500,
        a: addr(2),
        b: addr(3),
        up: false,
    });
    scenario.write_to_file(&file).expect("Could not write scenario");

    let loaded = SimulationConfig::from_file(&file).expect("Could not load scenario");
    assert_eq!(loaded, scenario);
}

//Unit test for: SimulationConfig::validate
#[test]
fn test_scenario_with_unknown_node_is_rejected() {
    let mut scenario = SimulationConfig::new();
    scenario.traffic[0].destination = addr(200);
    assert!(scenario.validate().is_err());
    assert!(SimNetwork::from_config(&scenario, logging::create_discard_logger()).is_err());
}

//Unit test for: run_simulation
#[test]
fn test_default_scenario_delivers_its_packet() {
    let scenario = SimulationConfig::new();
    let report = run_simulation(&scenario, logging::create_discard_logger())
        .expect("Simulation failed");

    assert_eq!(report.packets_sent, 1);
    assert_eq!(report.packets_delivered, 1);
    assert_eq!(report.route_errors, 0);
    assert_eq!(report.stale_timer_events, 0);
    assert!((report.delivery_ratio() - 1.0).abs() < std::f64::EPSILON);
}

//Unit test for: SimNetwork::from_config
#[test]
fn test_link_events_are_applied() {
    let mut scenario = SimulationConfig::new();
    scenario.link_events.push(LinkEvent {
        at: 500,
        a: addr(2),
        b: addr(3),
        up: false,
    });
    let mut net = SimNetwork::from_config(&scenario, logging::create_discard_logger())
        .expect("Could not build network");
    assert!(net.is_connected(addr(2), addr(3)));

    net.run_for(Duration::milliseconds(2_000)).expect("Run failed");
    assert!(!net.is_connected(addr(2), addr(3)));
    let report = net.report();
    assert_eq!(report.packets_sent, 1);
    assert_eq!(report.packets_delivered, 0);
    assert_eq!(report.stale_timer_events, 0);
}
