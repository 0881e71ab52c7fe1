#[macro_use]
mod common;

use futures_timeout::TimeoutExt;
use ipfs_interop::api::{AddEntry, AddOptions, CatOptions};
use ipfs_interop::topology::{self, Topology};
use ipfs_interop::{Cid, Factory, NodeKind, Transport};

use common::{data, spawn, TIMEOUT};

const KIB: usize = 1024;
const MIB: usize = 1024 * KIB;

pair_tests!(
    sizes_and_cid_versions,
    fetch_with_the_other_cid_version,
    raw_leaves_and_chunker,
    directory_tree,
    ranged_reads,
);

/// Adds `content` on `from` and fetches it by cid on `to`.
async fn exchange(
    from: &ipfs_interop::ForeignNode,
    to: &ipfs_interop::ForeignNode,
    content: &[u8],
    options: &AddOptions,
) {
    let added = from.add(content.to_vec(), options).await.unwrap();
    assert!(added.size as usize >= content.len());

    let fetched = to
        .cat(added.cid, CatOptions::default())
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();

    assert_eq!(
        fetched.len(),
        content.len(),
        "{} bytes added on {} came back as {} bytes on {}",
        content.len(),
        from.label(),
        fetched.len(),
        to.label()
    );
    assert!(fetched == content, "content differs for {}", added.cid);
}

async fn connected_pair(
    factory: &Factory,
    a: NodeKind,
    b: NodeKind,
) -> (ipfs_interop::ForeignNode, ipfs_interop::ForeignNode) {
    let node_a = spawn(factory, a).await;
    let node_b = spawn(factory, b).await;
    topology::connect(&[&node_a, &node_b], Topology::Line)
        .await
        .unwrap();
    (node_a, node_b)
}

// Content added on one node must come back byte for byte on the other, whatever the cid version.
async fn sizes_and_cid_versions(factory: &Factory, a: NodeKind, b: NodeKind) {
    let (node_a, node_b) = connected_pair(factory, a, b).await;

    let sizes = [1, 256, 4 * KIB, 256 * KIB + 1, MIB, 3 * MIB + 7];
    for (seed, size) in sizes.into_iter().enumerate() {
        let content = data(size, seed as u64);
        for version in [0, 1] {
            let options = AddOptions::default().cid_version(version);
            exchange(&node_a, &node_b, &content, &options).await;
        }
    }
}

const DAG_PB: u64 = 0x70;

async fn cat(node: &ipfs_interop::ForeignNode, cid: Cid) -> Vec<u8> {
    node.cat(cid, CatOptions::default())
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap()
        .to_vec()
}

// The same dag-pb root under the other cid version names the same content.
async fn fetch_with_the_other_cid_version(factory: &Factory, a: NodeKind, b: NodeKind) {
    let (node_a, node_b) = connected_pair(factory, a, b).await;
    let content = data(300 * KIB, 7);

    let v0 = node_a
        .add(content.clone(), &AddOptions::default().cid_version(0))
        .await
        .unwrap()
        .cid;
    assert_eq!(v0.version(), ipld_core::cid::Version::V0);
    let as_v1 = Cid::new_v1(DAG_PB, *v0.hash());
    assert!(cat(&node_b, as_v1).await == content);

    // v1 with dag-pb leaves is the only v1 form that has a v0 spelling
    let v1 = node_b
        .add(
            content.clone(),
            &AddOptions::default().cid_version(1).raw_leaves(false),
        )
        .await
        .unwrap()
        .cid;
    assert_eq!(v1.codec(), DAG_PB);
    let as_v0 = Cid::new_v0(*v1.hash()).unwrap();
    assert_eq!(as_v0, v0);
    assert!(cat(&node_a, as_v0).await == content);
}

async fn raw_leaves_and_chunker(factory: &Factory, a: NodeKind, b: NodeKind) {
    let (node_a, node_b) = connected_pair(factory, a, b).await;
    let content = data(2 * MIB, 42);

    for options in [
        AddOptions::default().cid_version(1).raw_leaves(true),
        AddOptions::default().cid_version(1).raw_leaves(false),
        AddOptions::default().chunker("size-65536"),
    ] {
        exchange(&node_a, &node_b, &content, &options).await;
        exchange(&node_b, &node_a, &content, &options).await;
    }
}

async fn directory_tree(factory: &Factory, a: NodeKind, b: NodeKind) {
    let (node_a, node_b) = connected_pair(factory, a, b).await;

    let small = data(10, 1);
    let large = data(MIB + 3, 2);
    let entries = vec![
        AddEntry::dir("root"),
        AddEntry::file("root/small.bin", small.clone()),
        AddEntry::dir("root/nested"),
        AddEntry::file("root/nested/large.bin", large.clone()),
    ];

    let added = node_a
        .add_all(entries, &AddOptions::default().cid_version(1))
        .await
        .unwrap();
    let root = added.last().expect("add returned nothing");
    assert_eq!(root.name, "root");

    let fetched = node_b
        .cat(format!("/ipfs/{}/small.bin", root.cid), CatOptions::default())
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();
    assert_eq!(fetched.as_ref(), small.as_slice());

    let fetched = node_b
        .cat(
            format!("/ipfs/{}/nested/large.bin", root.cid),
            CatOptions::default(),
        )
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();
    assert!(fetched.as_ref() == large.as_slice());
}

async fn ranged_reads(factory: &Factory, a: NodeKind, b: NodeKind) {
    let (node_a, node_b) = connected_pair(factory, a, b).await;
    let content = data(MIB, 7);
    let added = node_a.add(content.clone(), &AddOptions::default()).await.unwrap();

    let options = CatOptions {
        offset: Some(1000),
        length: Some(300 * KIB as u64),
    };
    let fetched = node_b
        .cat(added.cid, options)
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();
    assert!(fetched.as_ref() == &content[1000..1000 + 300 * KIB]);
}

// a > b > c: content added on a reaches c, which is not connected to it.
#[tokio::test]
async fn three_node_line() {
    let factory = common::factory();
    skip_unless_enabled!(factory, NodeKind::Go, NodeKind::Js);

    for kinds in [
        [NodeKind::Go, NodeKind::Js, NodeKind::Go],
        [NodeKind::Js, NodeKind::Go, NodeKind::Js],
    ] {
        let nodes = common::spawn_nodes(&factory, &kinds, Topology::Line).await;
        let content = data(MIB / 2, 3);
        exchange(&nodes[0], &nodes[2], &content, &AddOptions::default()).await;
    }
}

// Identical content and options give identical cids everywhere.
#[tokio::test]
async fn cids_are_deterministic() {
    let factory = common::factory();
    skip_unless_enabled!(factory, NodeKind::Go, NodeKind::Js);

    let go = spawn(&factory, NodeKind::Go).await;
    let js = spawn(&factory, NodeKind::Js).await;
    let content = data(MIB + 1, 9);

    for options in [
        AddOptions::default(),
        AddOptions::default().cid_version(1),
        AddOptions::default().cid_version(1).raw_leaves(true),
    ] {
        let from_go = go.add(content.clone(), &options).await.unwrap();
        let from_js = js.add(content.clone(), &options).await.unwrap();
        assert_eq!(from_go.cid, from_js.cid, "{options:?}");
    }
}

#[tokio::test]
async fn websocket_exchange() {
    let factory = common::factory();
    skip_unless_enabled!(factory, NodeKind::Go, NodeKind::Js);

    let go = spawn(&factory, NodeKind::Go).await;
    let js = spawn(&factory, NodeKind::Js).await;
    topology::connect_with(&[&js, &go], Topology::Line, Transport::WebSocket)
        .await
        .unwrap();

    exchange(&go, &js, &data(300 * KIB, 11), &AddOptions::default()).await;
}
