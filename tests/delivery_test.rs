use std::sync::atomic::Ordering;
use std::sync::{Arc, Once};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time;

use lansim::{
    announce_local_rules, setup_local_tracing, DeviceRuntime, Firewall, FirewallRules, Frame, Hac,
    MemorySink, NodeLogic, PortId, RuntimeSettings, SwitchLogic, TrafficEntry,
};

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| setup_local_tracing(0));
}

fn settings(port_base: u16) -> RuntimeSettings {
    RuntimeSettings {
        ip: "127.0.0.1".to_string(),
        port_base,
        accept_timeout: Duration::from_millis(200),
        connect_timeout: Duration::from_millis(500),
        poll_interval: Duration::from_millis(2),
        max_frame_size: 512,
        // keep the wire clean so the assertions are deterministic
        corrupt_probability: 0.0,
    }
}

async fn wait_finished(flag: Arc<std::sync::atomic::AtomicBool>, what: &str) {
    time::timeout(Duration::from_secs(15), async {
        while !flag.load(Ordering::Acquire) {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{} did not finish in time", what));
}

/// Node A (0_1) sends "hi" to node B (1_1) through a cold switch: the switch
/// floods the frame, B sinks "1: hi" and acknowledges, A clears its pending
/// map and reports FINISHED.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reliable_delivery_end_to_end() {
    init_tracing();
    let s = settings(43710);
    let a_addr = Hac::new(0, 1).unwrap();
    let b_addr = Hac::new(1, 1).unwrap();
    let (a_listen, a_gateway) = (PortId(0), PortId(1));
    let (b_listen, b_gateway) = (PortId(2), PortId(3));
    let pairs = [(a_gateway, a_listen), (b_gateway, b_listen)];

    let (notify_shutdown, _) = broadcast::channel(1);
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let switch_runtime = DeviceRuntime::new(
        "switch1",
        vec![a_gateway, b_gateway],
        vec![a_listen, b_listen],
        None,
        s.clone(),
    );
    let switch = SwitchLogic::new("switch1", &pairs, Duration::from_secs(8));

    let a_runtime = DeviceRuntime::new("node1", vec![a_listen], vec![a_gateway], None, s.clone());
    let a_sink = MemorySink::new();
    let a = NodeLogic::new(
        "node1",
        a_addr,
        a_gateway,
        vec![TrafficEntry {
            dest: b_addr,
            payload: "hi".to_string(),
        }],
        false,
        Box::new(a_sink.clone()),
        &a_runtime.outbound(),
    )
    .unwrap();
    let a_finished = a.finished_flag();

    let b_runtime = DeviceRuntime::new("node2", vec![b_listen], vec![b_gateway], None, s.clone());
    let b_sink = MemorySink::new();
    let b = NodeLogic::new(
        "node2",
        b_addr,
        b_gateway,
        Vec::new(),
        false,
        Box::new(b_sink.clone()),
        &b_runtime.outbound(),
    )
    .unwrap();
    assert!(b.is_finished());

    switch_runtime
        .start(switch, &notify_shutdown, &done_tx)
        .await
        .unwrap();
    a_runtime.start(a, &notify_shutdown, &done_tx).await.unwrap();
    b_runtime.start(b, &notify_shutdown, &done_tx).await.unwrap();
    drop(done_tx);

    wait_finished(a_finished, "node1").await;

    assert_eq!(b_sink.records(), vec!["1: hi".to_string()]);
    assert!(a_sink.records().is_empty());

    let _ = notify_shutdown.send(());
    // all loop tasks drop their completion sender on exit
    assert!(done_rx.recv().await.is_none());
}

/// A firewalled switch turns a locally blocked send into a FIREWALL_NACK:
/// the blocked frame never reaches its destination, but the NACK travels
/// back and settles the sender's pending entry.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn firewall_block_nacks_the_sender() {
    init_tracing();
    let s = settings(43810);
    let a_addr = Hac::new(1, 2).unwrap();
    let b_addr = Hac::new(1, 5).unwrap();
    let (a_listen, a_gateway) = (PortId(0), PortId(1));
    let (b_listen, b_gateway) = (PortId(2), PortId(3));
    let pairs = [(a_gateway, a_listen), (b_gateway, b_listen)];

    let (notify_shutdown, _) = broadcast::channel(1);
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let rules = FirewallRules::parse("1_5: blocked host").unwrap();
    let firewall = Arc::new(Firewall::new(&rules));
    let switch_runtime = DeviceRuntime::new(
        "switch1",
        vec![a_gateway, b_gateway],
        vec![a_listen, b_listen],
        Some(firewall),
        s.clone(),
    );
    announce_local_rules(&rules, &[a_listen, b_listen], &switch_runtime.outbound());
    let switch = SwitchLogic::new("switch1", &pairs, Duration::from_secs(8));

    let a_runtime = DeviceRuntime::new("node1", vec![a_listen], vec![a_gateway], None, s.clone());
    let a = NodeLogic::new(
        "node1",
        a_addr,
        a_gateway,
        vec![TrafficEntry {
            dest: b_addr,
            payload: "should not pass".to_string(),
        }],
        false,
        Box::new(MemorySink::new()),
        &a_runtime.outbound(),
    )
    .unwrap();
    let a_finished = a.finished_flag();

    let b_runtime = DeviceRuntime::new("node2", vec![b_listen], vec![b_gateway], None, s.clone());
    let b_sink = MemorySink::new();
    let b = NodeLogic::new(
        "node2",
        b_addr,
        b_gateway,
        Vec::new(),
        false,
        Box::new(b_sink.clone()),
        &b_runtime.outbound(),
    )
    .unwrap();

    switch_runtime
        .start(switch, &notify_shutdown, &done_tx)
        .await
        .unwrap();
    a_runtime.start(a, &notify_shutdown, &done_tx).await.unwrap();
    b_runtime.start(b, &notify_shutdown, &done_tx).await.unwrap();
    drop(done_tx);

    // the FIREWALL_NACK settles A's only pending send
    wait_finished(a_finished, "node1").await;
    // and the blocked payload never reached B
    assert!(b_sink.records().is_empty());

    let _ = notify_shutdown.send(());
    assert!(done_rx.recv().await.is_none());
}

/// A switch that starts with an empty firewall still absorbs a peer's
/// announced local rule over the wire and enforces it afterwards.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn announced_rule_is_absorbed_across_the_wire() {
    init_tracing();
    let s = settings(43910);
    let ttl = Duration::from_secs(8);
    let (core_in, trunk) = (PortId(9), PortId(0));
    let edge_out = PortId(1);

    let (notify_shutdown, _) = broadcast::channel(1);
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);

    let rules = FirewallRules::parse("1_5: blocked host").unwrap();
    let core_runtime = DeviceRuntime::new(
        "core",
        vec![core_in],
        vec![trunk],
        Some(Arc::new(Firewall::new(&rules))),
        s.clone(),
    );
    announce_local_rules(&rules, &[trunk], &core_runtime.outbound());
    let core = SwitchLogic::new("core", &[(core_in, trunk)], ttl);

    let edge_firewall = Arc::new(Firewall::default());
    let edge_runtime = DeviceRuntime::new(
        "edge",
        vec![trunk],
        vec![edge_out],
        Some(edge_firewall.clone()),
        s.clone(),
    );
    let edge = SwitchLogic::new("edge", &[(trunk, edge_out)], ttl);

    core_runtime
        .start(core, &notify_shutdown, &done_tx)
        .await
        .unwrap();
    edge_runtime
        .start(edge, &notify_shutdown, &done_tx)
        .await
        .unwrap();
    drop(done_tx);

    let frame = Frame::data(
        Hac::new(1, 2).unwrap(),
        Hac::new(1, 5).unwrap(),
        0,
        0,
        "local traffic",
    );
    time::timeout(Duration::from_secs(15), async {
        while !edge_firewall.is_blocked(&frame) {
            time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("the edge switch never absorbed the announced rule");

    let _ = notify_shutdown.send(());
    assert!(done_rx.recv().await.is_none());
}
