use super::super::*;
use mesh_dsr::dsr::{DropReason, ReceiveStatus};

fn count(net: &SimNetwork, node: u8, wanted: ReceiveStatus) -> usize {
    net.node(addr(node))
        .expect("Unknown node")
        .statuses
        .iter()
        .filter(|s| **s == wanted)
        .count()
}

// 1 reaches 4 through both 2 and 3, so 4 hears the same request twice.
#[test]
fn test_second_copy_of_a_request_is_suppressed() {
    let mut net = build_network(
        &[1, 2, 3, 4],
        &[(1, 2), (1, 3), (2, 4), (3, 4)],
        DsrConfig::default(),
    );
    net.send_now(addr(1), addr(4), packet_payload(0, 16))
        .expect("Send failed");
    net.run_for(Duration::seconds(1)).expect("Run failed");

    assert_eq!(
        count(&net, 4, ReceiveStatus::Dropped(DropReason::DuplicateSuppressed)),
        1
    );
    // Both relays flood, the source ignores its own request coming back
    assert_eq!(count(&net, 2, ReceiveStatus::Forwarded) >= 1, true);
    assert_eq!(count(&net, 3, ReceiveStatus::Forwarded) >= 1, true);
    assert_eq!(
        count(&net, 1, ReceiveStatus::Dropped(DropReason::OwnRequest)),
        2
    );
    assert_eq!(delivered_sequences(&net, 4), vec![0]);
    assert_eq!(net.stale_timer_events(), 0);
}
