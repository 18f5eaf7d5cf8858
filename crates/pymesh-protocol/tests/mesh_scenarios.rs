//! Multi-node scenarios over the in-memory mesh
//!
//! Every node runs its own engine; the tests drive ticks by hand and move a
//! shared manual clock.

use std::collections::BTreeSet;
use std::net::Ipv6Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use pymesh_core::{Clock, LookupError, ManualClock, MeshTransport, MockMesh, NodeRole};
use pymesh_messaging::{MeshagingConfig, MessageState};
use pymesh_protocol::{BorderRouterDelivery, EngineConfig, MeshProtocolEngine};

fn engine_for(mesh: &MockMesh, mac: u64, clock: &Arc<ManualClock>) -> MeshProtocolEngine {
    let transport = mesh.transport(mac).unwrap();
    MeshProtocolEngine::new(
        transport as Arc<dyn MeshTransport>,
        Arc::clone(clock) as Arc<dyn Clock>,
        EngineConfig::default(),
        MeshagingConfig::default(),
    )
}

#[tokio::test]
async fn test_two_node_message_and_ack() {
    let mesh = MockMesh::new();
    let a = mesh.add_node(0x0020, 0x0400);
    let b = mesh.add_node(0x0010, 0x0800);
    a.set_role(NodeRole::Router);
    b.set_role(NodeRole::Router);
    mesh.connect(0x0020, 0x0010, -50);
    mesh.elect_leader(0x0010);

    let clock = Arc::new(ManualClock::new());
    let mut node_a = engine_for(&mesh, 0x0020, &clock);
    let mut node_b = engine_for(&mesh, 0x0010, &clock);
    node_a.tick().await;
    node_b.tick().await;

    assert!(node_a.send_message(0x0010, b"hi".to_vec(), 999).await);
    assert_eq!(
        node_a.messaging().outbound(0x0010).unwrap().state,
        MessageState::Sent
    );
    assert!(!node_a.messaging().was_acked(0x0010, 999));

    // B receives, ACKs and stores
    node_b.tick().await;
    let received = node_b.messaging_mut().take_received().unwrap();
    assert_eq!(received.mac, 0x0020);
    assert_eq!(received.id, 999);
    assert_eq!(received.payload, b"hi");

    // A picks up the ACK
    node_a.tick().await;
    assert!(node_a.messaging().was_acked(0x0010, 999));
    assert!(!node_a.messaging().was_acked(0x0010, 998));
}

#[tokio::test]
async fn test_leader_aggregates_two_routers() {
    let mesh = MockMesh::new();
    mesh.add_node(0x10, 0x0c00);
    let r1 = mesh.add_node(0x20, 0x0400);
    let r2 = mesh.add_node(0x30, 0x0800);
    let c1 = mesh.add_node(0x40, 0x0401);
    let c2 = mesh.add_node(0x41, 0x0801);
    r1.set_role(NodeRole::Router);
    r2.set_role(NodeRole::Router);
    c1.set_role(NodeRole::Child);
    c2.set_role(NodeRole::Child);

    mesh.connect(0x10, 0x20, -40);
    mesh.connect(0x10, 0x30, -45);
    mesh.connect(0x20, 0x40, -60);
    mesh.connect(0x30, 0x41, -65);
    mesh.elect_leader(0x10);

    let clock = Arc::new(ManualClock::new());
    let mut leader = engine_for(&mesh, 0x10, &clock);
    let mut router1 = engine_for(&mesh, 0x20, &clock);
    let mut router2 = engine_for(&mesh, 0x30, &clock);

    // bind routers before the leader's first probe round
    router1.tick().await;
    router2.tick().await;
    let summary = leader.tick().await;
    assert_eq!(summary.probes_sent, 2);

    router1.tick().await;
    router2.tick().await;
    leader.tick().await;

    let data = leader.leader_data().unwrap();
    assert_eq!(data.router_count(), 3);
    assert_eq!(data.router(0x20).unwrap().neighbors.len(), 2);
    assert_eq!(data.router(0x30).unwrap().neighbors.len(), 2);

    let expected: BTreeSet<u64> = [0x10, 0x20, 0x30, 0x40, 0x41].into_iter().collect();
    assert_eq!(data.all_macs(), expected);
    assert_eq!(leader.mesh_macs(), expected);

    let info = leader.node_info(0x41).await.unwrap();
    assert_eq!(info.role, NodeRole::Child);
    assert_eq!(info.rloc16, 0x0801);
    assert!(matches!(
        leader.node_info(0x99).await,
        Err(LookupError::NotFound(0x99))
    ));

    // routers refresh their copy once the query interval has passed
    clock.advance(Duration::from_secs(60));
    router1.tick().await;
    leader.tick().await;
    router1.tick().await;
    assert_eq!(router1.mesh_macs(), expected);
    assert!(!router1.mesh_connections().is_empty());

    // per-mac details: miss asks the leader, answer lands a tick later
    assert!(matches!(
        router1.node_info(0x41).await,
        Err(LookupError::NotFound(0x41))
    ));
    leader.tick().await;
    router1.tick().await;
    let info = router1.node_info(0x41).await.unwrap();
    assert_eq!(info.role, NodeRole::Child);
}

#[tokio::test]
async fn test_leader_aggregates_wide_macs_once() {
    let leader_mac: u64 = 0x70b3_d549_9000_0010;
    let router_mac: u64 = 0x70b3_d549_9000_0020;

    let mesh = MockMesh::new();
    mesh.add_node(leader_mac, 0x0c00);
    let r = mesh.add_node(router_mac, 0x0400);
    r.set_role(NodeRole::Router);
    mesh.connect(leader_mac, router_mac, -40);
    mesh.elect_leader(leader_mac);

    let clock = Arc::new(ManualClock::new());
    let mut leader = engine_for(&mesh, leader_mac, &clock);
    let mut router = engine_for(&mesh, router_mac, &clock);

    for _ in 0..2 {
        router.tick().await;
        leader.tick().await;
    }

    let expected: BTreeSet<u64> = [0x10, 0x20].into_iter().collect();
    assert_eq!(leader.mesh_macs(), expected);
    assert_eq!(leader.mesh_connections().len(), 1);

    let info = leader.node_info(router_mac).await.unwrap();
    assert_eq!(info.role, NodeRole::Router);
    assert_eq!(info.rloc16, 0x0400);
    assert_eq!(leader.node_info(leader_mac).await.unwrap().role, NodeRole::Leader);
}

#[tokio::test]
async fn test_leader_table_mirrored_on_request() {
    let mesh = MockMesh::new();
    mesh.add_node(0x10, 0x0c00);
    let r1 = mesh.add_node(0x20, 0x0400);
    r1.set_role(NodeRole::Router);
    mesh.connect(0x10, 0x20, -40);
    mesh.elect_leader(0x10);

    let clock = Arc::new(ManualClock::new());
    let mut leader = engine_for(&mesh, 0x10, &clock);
    let mut router = engine_for(&mesh, 0x20, &clock);
    router.tick().await;
    leader.tick().await;
    router.tick().await;
    leader.tick().await;

    router.request_leader_data().await.unwrap();
    leader.tick().await;
    router.tick().await;

    let mirrored = router.mirrored_leader_data().unwrap();
    assert_eq!(mirrored.mac, 0x10);
    assert!(mirrored.router(0x20).is_some());
}

#[tokio::test]
async fn test_external_traffic_through_border_router() {
    let mesh = MockMesh::new();
    let a = mesh.add_node(0x20, 0x0400);
    let br = mesh.add_node(0x30, 0x0800);
    a.set_role(NodeRole::Router);
    br.set_role(NodeRole::Router);
    mesh.connect(0x20, 0x30, -50);
    mesh.elect_leader(0x30);

    let clock = Arc::new(ManualClock::new());
    let mut node_a = engine_for(&mesh, 0x20, &clock);
    let mut border = engine_for(&mesh, 0x30, &clock);
    node_a.tick().await;
    border.tick().await;

    let delivered = Arc::new(Mutex::new(Vec::<BorderRouterDelivery>::new()));
    let sink = Arc::clone(&delivered);
    border
        .border_router_set(
            true,
            2,
            Some(Box::new(move |delivery: BorderRouterDelivery| {
                sink.lock().unwrap().push(delivery);
            })),
        )
        .unwrap();

    let dest: Ipv6Addr = "2001:db8::7".parse().unwrap();
    node_a
        .send_external(dest, 5683, b"reading".to_vec(), 11)
        .await
        .unwrap();
    border.tick().await;

    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].dest, dest);
    assert_eq!(delivered[0].port, 5683);
    let message = delivered[0].message().unwrap();
    assert_eq!(message.mac, 0x20);
    assert_eq!(message.id, 11);
    assert_eq!(message.payload, b"reading");
}
