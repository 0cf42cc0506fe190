use crate::{ChannelTransport, ClientRequestResult, NodeConfig, RaftNode, RecordingStateMachine};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn cluster(n: usize, dir: &tempfile::TempDir) -> Vec<Arc<RaftNode>> {
    let transport = Arc::new(ChannelTransport::new());
    let ids: Vec<String> = (0..n).map(|i| format!("node-{i}")).collect();
    ids.iter()
        .map(|id| {
            let peers: Vec<String> = ids.iter().filter(|p| *p != id).cloned().collect();
            let config = NodeConfig {
                node_id: id.clone(),
                peers,
                election_timeout_min: Duration::from_millis(80),
                election_timeout_max: Duration::from_millis(150),
                heartbeat_interval: Duration::from_millis(20),
                client_request_timeout: Duration::from_secs(2),
            };
            let node_dir = dir.path().join(id);
            RaftNode::new(
                config,
                &node_dir,
                transport.clone(),
                Box::new(RecordingStateMachine::default()),
            )
            .unwrap()
        })
        .collect()
}

fn wait_for_leader(nodes: &[Arc<RaftNode>], timeout: Duration) -> Option<Arc<RaftNode>> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(leader) = nodes.iter().find(|n| n.is_leader()) {
            return Some(leader.clone());
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

#[test]
fn a_three_node_cluster_elects_exactly_one_leader() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = cluster(3, &dir);
    for n in &nodes {
        n.start();
    }

    let leader = wait_for_leader(&nodes, Duration::from_secs(3));
    assert!(leader.is_some(), "no leader elected within timeout");

    std::thread::sleep(Duration::from_millis(300));
    let leader_count = nodes.iter().filter(|n| n.is_leader()).count();
    assert_eq!(leader_count, 1);

    for n in &nodes {
        n.stop();
    }
}

#[test]
fn a_command_submitted_to_the_leader_commits_and_applies() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = cluster(3, &dir);
    for n in &nodes {
        n.start();
    }
    let leader = wait_for_leader(&nodes, Duration::from_secs(3)).expect("leader elected");

    let response = leader.submit("req-1".to_string(), b"set a 1".to_vec());
    assert_eq!(response.result, ClientRequestResult::Success);
    assert_eq!(response.response_data, b"set a 1");

    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline && leader.commit_index() < 1 {
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(leader.commit_index() >= 1);

    for n in &nodes {
        n.stop();
    }
}

#[test]
fn submitting_to_a_follower_returns_not_leader_with_a_hint() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = cluster(3, &dir);
    for n in &nodes {
        n.start();
    }
    wait_for_leader(&nodes, Duration::from_secs(3)).expect("leader elected");
    std::thread::sleep(Duration::from_millis(100));

    let follower = nodes.iter().find(|n| !n.is_leader()).unwrap();
    let response = follower.submit("req-2".to_string(), b"noop".to_vec());
    assert_eq!(response.result, ClientRequestResult::NotLeader);

    for n in &nodes {
        n.stop();
    }
}

#[test]
fn a_single_node_cluster_is_its_own_leader_and_commits_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let nodes = cluster(1, &dir);
    nodes[0].start();

    let leader = wait_for_leader(&nodes, Duration::from_secs(2)).expect("single node becomes leader");
    let response = leader.submit("solo".to_string(), b"ping".to_vec());
    assert_eq!(response.result, ClientRequestResult::Success);

    nodes[0].stop();
}
