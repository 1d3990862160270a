//! End-to-end scenarios driven through a scripted host.

use ringnet_abi::{
    ADDR_BROADCAST, ADDR_BROADCAST_BLOCKING, ADDR_LOCAL_NIC, ApiError, BcdReport, ConfigMsg,
    MemCmd, NsFailure, OpType, PrgFunc, PrgResult, ResultCode, RouteState, Script, SdReport,
    SessionType, TxStatus,
};
use ringnet_core::Config;
use ringnet_net::msg::{
    FB_DIAG, FB_NIC, FID_BC_ENABLE_TX, FID_CABLE_LINK_DIAG, FID_ENABLE_PORT, FID_HELLO,
    FID_MEM_SESSION_CLOSE, FID_MEM_SESSION_OPEN, FID_NIC_BC_DIAG, FID_NIC_BC_DIAG_END,
    FID_NIC_SYS_DIAG, FID_NIC_SYS_DIAG_END, FID_PHY_TEST, FID_PHY_TEST_RESULT, FID_WELCOME,
};
use ringnet_route::model::{Endpoint, EndpointKind, Node, Route};
use ringnet_tests::{
    Rig, bc_probe_result, hello_status, msg, network_status, signature, welcome_result,
};

/// S1 — linear three-node walk: master with two ports, one neighbor
/// down branch 0 with a dead segment behind it, one neighbor on
/// branch 1.
#[test]
fn sysdiag_linear_three_node_walk() {
    let mut rig = Rig::default();
    let master = signature(ADDR_LOCAL_NIC, 2, 1, 0x1111);
    let node2 = signature(0x0101, 2, 2, 0x2222);
    let node3 = signature(0x0102, 1, 3, 0x3333);

    rig.engine.start_system_diagnosis().unwrap();
    rig.drain();
    let tx = rig.take_tx();
    assert_eq!(tx.len(), 1);
    assert_eq!(tx[0].id.function_id, FID_NIC_SYS_DIAG);
    assert_eq!(tx[0].destination, ADDR_LOCAL_NIC);

    // diagnosis mode entered; segment 0 welcomes the controller itself
    rig.rx(&msg(FB_NIC, FID_NIC_SYS_DIAG, OpType::Result, &[]));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_HELLO);
    assert_eq!(tx[0].destination, ADDR_BROADCAST_BLOCKING);

    rig.rx(&hello_status(&master));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_WELCOME);
    assert_eq!(tx[0].destination, ADDR_LOCAL_NIC);
    assert_eq!(&tx[0].payload[0..2], &[0x05, 0x00]);

    rig.rx(&welcome_result(0, &master));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_ENABLE_PORT);
    assert_eq!(tx[0].payload.as_slice(), &[0, 1]);

    // branch 0, segment 1: node2 answers
    rig.rx(&msg(FB_DIAG, FID_ENABLE_PORT, OpType::Result, &[]));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_HELLO);

    rig.rx(&hello_status(&node2));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_WELCOME);
    assert_eq!(tx[0].destination, 0x0401);
    assert_eq!(&tx[0].payload[0..2], &[0x05, 0x01]);

    rig.rx(&welcome_result(0, &node2));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_ENABLE_PORT);
    assert_eq!(tx[0].destination, 0x0401);
    assert_eq!(tx[0].payload.as_slice(), &[1, 1]);

    // branch 0, segment 2: nobody answers; the hello retry budget
    // drains, then the dead segment goes to cable-link diagnosis
    rig.rx(&msg(FB_DIAG, FID_ENABLE_PORT, OpType::Result, &[]));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_HELLO);
    for _ in 0..10 {
        rig.advance(150);
        let tx = rig.take_tx();
        assert_eq!(tx[0].id.function_id, FID_HELLO, "hello retry expected");
    }
    rig.advance(150);
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_CABLE_LINK_DIAG);
    assert_eq!(tx[0].destination, 0x0401);
    assert_eq!(tx[0].payload.as_slice(), &[1]);

    rig.rx(&msg(FB_DIAG, FID_CABLE_LINK_DIAG, OpType::Result, &[1, 0x04]));
    // branch switch: disable the dead branch port, enable the
    // master's next port
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_ENABLE_PORT);
    assert_eq!(tx[0].destination, 0x0501);
    assert_eq!(tx[0].payload.as_slice(), &[1, 0]);

    rig.rx(&msg(FB_DIAG, FID_ENABLE_PORT, OpType::Result, &[]));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_ENABLE_PORT);
    assert_eq!(tx[0].destination, ADDR_LOCAL_NIC);
    assert_eq!(tx[0].payload.as_slice(), &[1, 1]);

    // branch 1, segment 1: node3 answers and the walk completes
    rig.rx(&msg(FB_DIAG, FID_ENABLE_PORT, OpType::Result, &[]));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_HELLO);

    rig.rx(&hello_status(&node3));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_WELCOME);

    rig.rx(&welcome_result(0, &node3));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_NIC_SYS_DIAG_END);

    rig.rx(&msg(FB_NIC, FID_NIC_SYS_DIAG_END, OpType::Result, &[]));

    let reports = rig.state.borrow().sd_reports.clone();
    assert_eq!(reports.len(), 4, "unexpected reports: {reports:?}");
    match &reports[0] {
        SdReport::TargetFound(seg) => {
            assert_eq!((seg.branch, seg.num), (0, 1));
            assert_eq!(seg.source, master);
            assert_eq!(seg.target, node2);
        }
        other => panic!("expected TargetFound, got {other:?}"),
    }
    match &reports[1] {
        SdReport::CableLink { segment, quality } => {
            assert_eq!((segment.branch, segment.num), (0, 2));
            assert_eq!(*quality, 0x04);
        }
        other => panic!("expected CableLink, got {other:?}"),
    }
    match &reports[2] {
        SdReport::TargetFound(seg) => {
            assert_eq!((seg.branch, seg.num), (1, 1));
            assert_eq!(seg.source, master);
            assert_eq!(seg.target, node3);
        }
        other => panic!("expected TargetFound, got {other:?}"),
    }
    assert_eq!(reports[3], SdReport::Finished);
    assert_eq!(rig.engine.timers_pending(), 0);
    assert_eq!(rig.engine.tx_in_use(), 0);
}

/// S2 — memory programming against a node that still has a session
/// open: the engine recovers the foreign handle, closes the session,
/// restarts the device and reports the open error exactly once.
#[test]
fn programming_recovers_active_session() {
    let mut rig = Rig::default();
    rig.rx(&network_status(true, 0x0100, 3));

    let sig = signature(0x0101, 1, 0x10, 0x4444);
    let mut cmd = MemCmd {
        mem_id: 1,
        address: 0,
        unit_len: 2,
        ..MemCmd::default()
    };
    cmd.data.extend_from_slice(&[0xDE, 0xAD]).unwrap();
    let commands = [cmd, MemCmd::default()];

    rig.engine
        .program_node(0x0410, &sig, SessionType::CfgWrite, &commands)
        .unwrap();
    rig.drain();
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_WELCOME);
    assert_eq!(tx[0].destination, 0x0410);
    assert_eq!(&tx[0].payload[0..2], &[0x0F, 0x10]);

    rig.rx(&welcome_result(0, &sig));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_MEM_SESSION_OPEN);
    assert_eq!(tx[0].destination, 0x0F10);
    assert_eq!(tx[0].payload.as_slice(), &[SessionType::CfgWrite as u8]);

    // session already active elsewhere; its handle rides in the error
    rig.rx(&msg(
        FB_DIAG,
        FID_MEM_SESSION_OPEN,
        OpType::Error,
        &[0x11, 0x01, 0x20, 0x12, 0x34],
    ));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_MEM_SESSION_CLOSE);
    assert_eq!(tx[0].payload.as_slice(), &[0x12, 0x34]);

    rig.rx(&msg(FB_DIAG, FID_MEM_SESSION_CLOSE, OpType::Result, &[0x00]));
    let tx = rig.take_tx();
    assert_eq!(
        tx[0].id.function_id,
        ringnet_net::msg::FID_DEVICE_INIT,
        "device restart expected after the recovery close"
    );

    let reports = rig.state.borrow().prg_reports.clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].code, PrgResult::FktAsync);
    assert_eq!(reports[0].function, PrgFunc::MemOpen);
    assert_eq!(reports[0].parm.as_slice(), &[0x11, 0x01, 0x20, 0x12, 0x34]);
}

/// S3 — a script step whose expected reply never arrives fails with a
/// target-script timeout after the reply guard expires.
#[test]
fn script_reply_guard_times_out() {
    let mut rig = Rig::default();
    let script = Script {
        pause_ms: 0,
        send_cmd: ConfigMsg::new(2, 0, 0x6C1, OpType::Start, &[0x00, 0x40]).unwrap(),
        expected_reply: Some(ConfigMsg::new(2, 0, 0x6C1, OpType::Status, &[]).unwrap()),
    };

    rig.engine.run_script(0x0110, &[script]).unwrap();
    rig.drain();
    let tx = rig.take_tx();
    // device sync first, then the script command itself
    assert_eq!(tx[0].id.function_id, ringnet_net::msg::FID_DEVICE_INIT);
    assert_eq!(tx[1].id.fblock_id, 2);
    assert_eq!(tx[1].id.function_id, 0x6C1);
    assert_eq!(tx[1].destination, 0x0110);

    rig.advance(5200);

    let reports = rig.state.borrow().script_reports.clone();
    assert_eq!(reports.len(), 1);
    let (target, result) = &reports[0];
    assert_eq!(*target, 0x0110);
    assert!(!result.success);
    assert_eq!(result.failure, NsFailure::TargetScript);
    assert_eq!(result.nic_result.code, ResultCode::Timeout);
    assert_eq!(rig.engine.timers_pending(), 0);
}

/// S4 — the network drops mid-walk: every machine closes out in one
/// pass, no timer stays armed and the tx pool is empty.
#[test]
fn net_off_closes_running_diagnosis() {
    let mut rig = Rig::default();
    rig.rx(&network_status(true, 0x0100, 3));

    let master = signature(ADDR_LOCAL_NIC, 2, 1, 0x1111);
    let node2 = signature(0x0101, 2, 2, 0x2222);

    rig.engine.start_system_diagnosis().unwrap();
    rig.drain();
    rig.take_tx();
    rig.rx(&msg(FB_NIC, FID_NIC_SYS_DIAG, OpType::Result, &[]));
    rig.rx(&hello_status(&master));
    rig.rx(&welcome_result(0, &master));
    rig.rx(&msg(FB_DIAG, FID_ENABLE_PORT, OpType::Result, &[]));
    rig.rx(&hello_status(&node2));
    rig.rx(&welcome_result(0, &node2));
    rig.take_tx();
    assert_eq!(rig.state.borrow().sd_reports.len(), 1, "one segment found");

    rig.rx(&network_status(false, 0x0100, 3));

    let reports = rig.state.borrow().sd_reports.clone();
    assert!(
        matches!(reports.last(), Some(SdReport::Finished)),
        "walk must close out: {reports:?}"
    );
    assert_eq!(rig.engine.timers_pending(), 0);
    assert_eq!(rig.engine.tx_in_use(), 0);
}

/// S5 — back-channel diagnosis over a ring broken behind segment 3.
#[test]
fn bc_diagnosis_locates_ring_break() {
    let mut rig = Rig::default();

    rig.engine.start_bc_diagnosis().unwrap();
    rig.drain();
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_NIC_BC_DIAG);

    rig.rx(&msg(FB_NIC, FID_NIC_BC_DIAG, OpType::Result, &[]));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_BC_ENABLE_TX);
    assert_eq!(tx[0].destination, ADDR_BROADCAST_BLOCKING);

    // segment 1 answers as slave
    rig.rx(&msg(FB_DIAG, FID_BC_ENABLE_TX, OpType::Result, &[]));
    rig.advance(140); // light propagation
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, ringnet_net::msg::FID_BC_DIAG);
    assert_eq!(tx[0].payload[0], 1);
    rig.rx(&bc_probe_result(0x01, 0x0F01));

    // segment 2 answers as slave
    rig.advance(100);
    rig.take_tx();
    rig.rx(&msg(FB_DIAG, FID_BC_ENABLE_TX, OpType::Result, &[]));
    rig.advance(160);
    let tx = rig.take_tx();
    assert_eq!(tx[0].payload[0], 2);
    rig.rx(&bc_probe_result(0x01, 0x0F02));

    // segment 3: nobody answers — the break is located
    rig.advance(100);
    rig.take_tx();
    rig.rx(&msg(FB_DIAG, FID_BC_ENABLE_TX, OpType::Result, &[]));
    rig.advance(180);
    let tx = rig.take_tx();
    assert_eq!(tx[0].payload[0], 3);
    rig.rx(&bc_probe_result(0x03, 0x0F03));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_NIC_BC_DIAG_END);
    rig.rx(&msg(FB_NIC, FID_NIC_BC_DIAG_END, OpType::Result, &[]));

    let reports = rig.state.borrow().bcd_reports.clone();
    assert_eq!(
        reports,
        vec![
            BcdReport::Success { segment: 1 },
            BcdReport::Success { segment: 2 },
            BcdReport::RingBreak { segment: 3 },
            BcdReport::End,
        ]
    );
}

/// S6 — two back-to-back result polls: the second is rejected
/// synchronously, and the unanswered first is resolved by the lock
/// countdown with a synthetic timeout.
#[test]
fn api_lock_timeout_unblocks_poll() {
    let mut rig = Rig::default();

    rig.engine.start_phy_test(1, 0, 0x10, 1000, 0x10).unwrap();
    rig.drain();
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_PHY_TEST);

    rig.engine.request_phy_test_result().unwrap();
    rig.drain();
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_PHY_TEST_RESULT);

    assert_eq!(
        rig.engine.request_phy_test_result(),
        Err(ApiError::ApiLocked)
    );

    rig.advance(1000);
    let failures = rig.state.borrow().phy_failures.clone();
    assert_eq!(failures, vec![ResultCode::Timeout]);

    // the expired lock frees the channel for the next poll
    rig.engine.request_phy_test_result().unwrap();
    rig.drain();
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_PHY_TEST_RESULT);
}

/// Manager mode: on network-available the engine discovers, welcomes
/// the configured nodes at their configured addresses and builds the
/// route once both ends are available.
#[test]
fn manager_mode_builds_route_from_discovery() {
    let mut cfg = Config::default();
    cfg.mgr.enabled = true;
    let sig_a = signature(0x0101, 1, 1, 0x5555);
    let sig_b = signature(0x0102, 1, 2, 0x6666);
    cfg.nodes.push(Node::new(sig_a)).unwrap();
    cfg.nodes.push(Node::new(sig_b)).unwrap();
    cfg.routes
        .push(Route::new(
            1,
            Endpoint::new(EndpointKind::Source, 0x0101),
            Endpoint::new(EndpointKind::Sink, 0x0102),
        ))
        .unwrap();
    let mut rig = Rig::new(cfg);

    rig.rx(&network_status(true, 0x0100, 2));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_HELLO);
    assert_eq!(tx[0].destination, ADDR_BROADCAST);

    // node A discovered and welcomed at its configured address
    rig.rx(&hello_status(&sig_a));
    let tx = rig.take_tx();
    assert_eq!(tx[0].id.function_id, FID_WELCOME);
    assert_eq!(&tx[0].payload[0..2], &[0x01, 0x01]);
    rig.rx(&welcome_result(0, &sig_a));
    assert!(rig.state.borrow().route_reports.is_empty());

    // node B completes the route
    rig.rx(&hello_status(&sig_b));
    rig.take_tx();
    rig.rx(&welcome_result(0, &sig_b));

    let routes = rig.state.borrow().route_reports.clone();
    assert_eq!(routes, vec![(1, RouteState::Built)]);
}

/// The link driver reporting a transmit failure fails the script run
/// with the tx status attached.
#[test]
fn script_tx_failure_reported() {
    let mut rig = Rig::default();
    let script = Script {
        pause_ms: 0,
        send_cmd: ConfigMsg::new(2, 0, 0x700, OpType::Start, &[]).unwrap(),
        expected_reply: Some(ConfigMsg::new(2, 0, 0x700, OpType::Status, &[]).unwrap()),
    };
    rig.engine.run_script(0x0120, &[script]).unwrap();
    rig.drain();
    rig.take_tx();

    // the sync frame completes, the script frame fails
    rig.engine.tx_complete(TxStatus::Ok);
    rig.engine.tx_complete(TxStatus::Failed);
    rig.drain();

    let reports = rig.state.borrow().script_reports.clone();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].1.failure, NsFailure::Tx);
    assert_eq!(reports[0].1.tx_status, TxStatus::Failed);
}
