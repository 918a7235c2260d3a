//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::broadcast;

use portcullis::{Node, NodeConfig};
use portcullis_core::{Clock, Identity, Keypair, ManualClock};
use portcullis_log::{MemoryNetwork, MemoryRuntime};
use portcullis_perms::CoordinatorEvent;

/// Fixed start time for fixtures: 2025-01-14T16:00:00Z.
pub const EPOCH_MILLIS: i64 = 1_736_870_400_000;

/// How long helpers wait for asynchronous notifications.
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// An in-process network of peers sharing one manual clock.
pub struct TestNetwork {
    pub network: Arc<MemoryNetwork>,
    pub clock: Arc<ManualClock>,
    pub config: NodeConfig,
}

impl TestNetwork {
    /// Create an empty network with the clock at [`EPOCH_MILLIS`].
    pub fn new() -> Self {
        Self::with_config(NodeConfig::default())
    }

    /// Create an empty network whose peers use `config`.
    pub fn with_config(config: NodeConfig) -> Self {
        Self {
            network: MemoryNetwork::new(),
            clock: Arc::new(ManualClock::new(EPOCH_MILLIS)),
            config,
        }
    }

    /// Create a peer with a deterministic keypair and start it.
    pub async fn peer(&self, seed: u8) -> TestPeer {
        self.peer_with_keypair(Keypair::from_seed(&[seed; 32])).await
    }

    /// Create a peer with a random keypair and start it.
    pub async fn random_peer(&self) -> TestPeer {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        self.peer_with_keypair(Keypair::from_seed(&seed)).await
    }

    /// Create a stopped peer with a deterministic keypair.
    pub fn stopped_peer(&self, seed: u8) -> TestPeer {
        let keypair = Keypair::from_seed(&[seed; 32]);
        let clock: Arc<dyn Clock> = self.clock.clone();
        let runtime = self.network.runtime(keypair.clone(), Arc::clone(&clock));
        TestPeer {
            node: Node::new(runtime, clock, self.config.clone()),
            keypair,
        }
    }

    async fn peer_with_keypair(&self, keypair: Keypair) -> TestPeer {
        let clock: Arc<dyn Clock> = self.clock.clone();
        let runtime = self.network.runtime(keypair.clone(), Arc::clone(&clock));
        let node = Node::new(runtime, clock, self.config.clone());
        node.start().await.expect("node failed to start");
        TestPeer { keypair, node }
    }

    /// Move the shared clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Current reading of the shared clock.
    pub fn now(&self) -> i64 {
        self.clock.now_millis()
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// A started node plus its keypair.
pub struct TestPeer {
    pub keypair: Keypair,
    pub node: Node<MemoryRuntime>,
}

impl TestPeer {
    /// The peer's identity.
    pub fn identity(&self) -> Identity {
        self.keypair.identity()
    }
}

/// A network with `n` started peers, seeded 1..=n.
pub async fn multi_peer_fixtures(n: u8) -> (TestNetwork, Vec<TestPeer>) {
    let net = TestNetwork::new();
    let mut peers = Vec::with_capacity(n as usize);
    for seed in 1..=n {
        peers.push(net.peer(seed).await);
    }
    (net, peers)
}

/// Wait for the first event matching `pred`, skipping others.
///
/// Returns `None` if nothing matches within [`EVENT_TIMEOUT`].
pub async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<CoordinatorEvent>,
    pred: F,
) -> Option<CoordinatorEvent>
where
    F: Fn(&CoordinatorEvent) -> bool,
{
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_multi_peer_fixtures() {
        let (net, peers) = multi_peer_fixtures(3).await;
        assert_eq!(peers.len(), 3);
        assert_ne!(peers[0].identity(), peers[1].identity());
        assert!(peers.iter().all(|p| p.node.coordinator().is_running()));
        assert_eq!(net.now(), EPOCH_MILLIS);
    }

    #[tokio::test]
    async fn test_random_peers_are_distinct() {
        let net = TestNetwork::new();
        let a = net.random_peer().await;
        let b = net.random_peer().await;
        assert_ne!(a.identity(), b.identity());
        assert!(a.node.coordinator().is_running());
    }

    #[tokio::test]
    async fn test_stopped_peer_starts_on_demand() {
        let net = TestNetwork::new();
        let peer = net.stopped_peer(1);
        assert!(!peer.node.coordinator().is_running());
        peer.node.start().await.unwrap();
        assert!(peer.node.coordinator().is_running());
    }

    #[tokio::test]
    async fn test_clock_is_shared() {
        let net = TestNetwork::new();
        let peer = net.peer(1).await;
        net.advance(Duration::from_secs(10));
        assert_eq!(peer.node.registry().now(), EPOCH_MILLIS + 10_000);
    }
}
