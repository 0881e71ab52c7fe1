#![allow(dead_code)]

use std::time::Duration;

use ipfs_interop::topology::{self, Topology};
use ipfs_interop::{Factory, ForeignNode, NodeKind, SpawnOptions};
use tracing_subscriber::EnvFilter;

/// Upper bound of a whole scenario, daemon startup included.
pub const SCENARIO_TIMEOUT: Duration = Duration::from_secs(180);

/// Upper bound of a single step, such as receiving a pubsub message.
pub const TIMEOUT: Duration = Duration::from_secs(30);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn factory() -> Factory {
    init_tracing();
    Factory::from_env()
}

/// Returns early from the test when a kind it needs is not configured.
#[macro_export]
macro_rules! skip_unless_enabled {
    ($factory:expr, $($kind:expr),+ $(,)?) => {
        for kind in [$($kind),+] {
            if !$factory.config().is_enabled(kind) {
                eprintln!("Skipping test: no {kind} daemon configured");
                return;
            }
        }
    };
}

/// Generates one test per ordered pair of implementations running `$scenario(factory, a, b)`.
#[macro_export]
macro_rules! pair_tests {
    ($($scenario:ident),+ $(,)?) => {
        $(
            mod $scenario {
                use ipfs_interop::NodeKind;

                async fn run(a: NodeKind, b: NodeKind) {
                    use futures_timeout::TimeoutExt;

                    let factory = $crate::common::factory();
                    $crate::skip_unless_enabled!(factory, a, b);
                    super::$scenario(&factory, a, b)
                        .timeout($crate::common::SCENARIO_TIMEOUT)
                        .await
                        .expect("scenario timed out");
                }

                #[tokio::test]
                async fn go_go() {
                    run(NodeKind::Go, NodeKind::Go).await
                }

                #[tokio::test]
                async fn go_js() {
                    run(NodeKind::Go, NodeKind::Js).await
                }

                #[tokio::test]
                async fn js_go() {
                    run(NodeKind::Js, NodeKind::Go).await
                }

                #[tokio::test]
                async fn js_js() {
                    run(NodeKind::Js, NodeKind::Js).await
                }
            }
        )+
    };
}

pub async fn spawn(factory: &Factory, kind: NodeKind) -> ForeignNode {
    spawn_with(factory, SpawnOptions::new(kind)).await
}

pub async fn spawn_with(factory: &Factory, options: SpawnOptions) -> ForeignNode {
    let kind = options.kind;
    factory
        .spawn(options)
        .await
        .unwrap_or_else(|e| panic!("failed to spawn {kind} node: {e}"))
}

/// Spawns a node per kind and connects them according to `topology`.
pub async fn spawn_nodes(
    factory: &Factory,
    kinds: &[NodeKind],
    topology: Topology,
) -> Vec<ForeignNode> {
    let mut nodes = Vec::with_capacity(kinds.len());
    for kind in kinds {
        nodes.push(spawn(factory, *kind).await);
    }

    let refs = nodes.iter().collect::<Vec<_>>();
    topology::connect(&refs, topology).await.unwrap();

    nodes
}

/// Deterministic pseudo random bytes.
pub fn data(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state as u8
        })
        .collect()
}
