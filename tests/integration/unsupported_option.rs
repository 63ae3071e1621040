use super::super::*;
use mesh_dsr::dsr::wire::{node_id, DsrOption, DsrPacket};
use mesh_dsr::dsr::{DropReason, ReceiveStatus};
use mesh_dsr::network::{Frame, IpHeader};
use mesh_dsr::DSR_PROTOCOL_NUMBER;

fn frame_with_option(from: u8, to: u8, option: DsrOption) -> Frame {
    let mut packet = DsrPacket::control(node_id(addr(from)), node_id(addr(to)));
    packet.add_option(option);
    Frame {
        header: IpHeader {
            source: addr(from),
            destination: addr(to),
            ttl: 1,
            protocol: DSR_PROTOCOL_NUMBER,
        },
        payload: packet.serialize().expect("Could not encode packet"),
    }
}

#[test]
fn test_unknown_option_is_reported_to_the_source() {
    let mut net = build_network(&[1, 2], &[(1, 2)], DsrConfig::default());
    let frame = frame_with_option(
        1,
        2,
        DsrOption::Unknown {
            option_type: 77,
            data: vec![0xAB, 0xCD],
        },
    );
    net.inject_frame(addr(1), addr(2), frame)
        .expect("Could not inject frame");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    let receiver = net.node(addr(2)).unwrap();
    assert_eq!(
        receiver.statuses[0],
        ReceiveStatus::Dropped(DropReason::UnsupportedOption(77))
    );
    assert!(receiver.delivered.is_empty());

    // The route error came back and was consumed by the source
    let source = net.node(addr(1)).unwrap();
    assert_eq!(source.statuses, vec![ReceiveStatus::Processed]);
    assert!(source.route_errors.is_empty());
    assert!(receiver.routing.maintain_buffer().is_empty());
    assert_eq!(net.stale_timer_events(), 0);
}

#[test]
fn test_unknown_option_without_a_way_back_is_only_dropped() {
    let mut net = build_network(&[1, 2, 3], &[(2, 3)], DsrConfig::default());
    // Node 2 hears a packet relayed on behalf of 1, which it has no route to
    let mut frame = frame_with_option(
        1,
        2,
        DsrOption::Unknown {
            option_type: 77,
            data: vec![],
        },
    );
    frame.header.source = addr(3);
    net.inject_frame(addr(3), addr(2), frame)
        .expect("Could not inject frame");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    assert_eq!(
        net.node(addr(2)).unwrap().statuses,
        vec![ReceiveStatus::Dropped(DropReason::UnsupportedOption(77))]
    );
    assert!(net.node(addr(1)).unwrap().statuses.is_empty());
    assert!(net.node(addr(3)).unwrap().statuses.is_empty());
    assert_eq!(net.stale_timer_events(), 0);
}
