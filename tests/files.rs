#[macro_use]
mod common;

use futures_timeout::TimeoutExt;
use ipfs_interop::api::{AddOptions, CatOptions, FileType, FilesWriteOptions};
use ipfs_interop::topology::{self, Topology};
use ipfs_interop::{Factory, NodeKind};

use common::{data, spawn, TIMEOUT};

pair_tests!(mfs_write_then_cat_remotely, copy_remote_content_into_mfs,);

async fn mfs_write_then_cat_remotely(factory: &Factory, a: NodeKind, b: NodeKind) {
    let node_a = spawn(factory, a).await;
    let node_b = spawn(factory, b).await;
    topology::connect(&[&node_b, &node_a], Topology::Line)
        .await
        .unwrap();

    let content = data(512 * 1024 + 3, 23);
    let options = FilesWriteOptions::default().parents();
    node_a
        .files()
        .write("/interop/nested/file.bin", content.clone(), &options)
        .await
        .unwrap();

    let stat = node_a.files().stat("/interop/nested/file.bin").await.unwrap();
    assert_eq!(stat.kind, FileType::File);
    assert_eq!(stat.size, content.len() as u64);

    let root = node_a.files().flush("/interop").await.unwrap();
    assert_eq!(node_a.files().stat("/interop").await.unwrap().hash, root);

    let fetched = node_b
        .cat(stat.hash, CatOptions::default())
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();
    assert!(fetched == content);

    let fetched = node_b
        .cat(format!("/ipfs/{root}/nested/file.bin"), CatOptions::default())
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();
    assert!(fetched == content);
}

async fn copy_remote_content_into_mfs(factory: &Factory, a: NodeKind, b: NodeKind) {
    let node_a = spawn(factory, a).await;
    let node_b = spawn(factory, b).await;
    topology::connect(&[&node_b, &node_a], Topology::Line)
        .await
        .unwrap();

    let content = data(100 * 1024, 29);
    let added = node_a
        .add(content.clone(), &AddOptions::default())
        .await
        .unwrap();

    node_b
        .files()
        .cp(&format!("/ipfs/{}", added.cid), "/copied.bin", false)
        .timeout(TIMEOUT)
        .await
        .expect("timeout")
        .unwrap();

    let stat = node_b.files().stat("/copied.bin").await.unwrap();
    assert_eq!(stat.hash, added.cid);

    let read = node_b
        .files()
        .read("/copied.bin", Some(10), Some(20))
        .await
        .unwrap();
    assert_eq!(read.as_ref(), &content[10..30]);
}

// Both implementations store the same bytes written the same way under the same cid.
#[tokio::test]
async fn identical_file_cids() {
    let factory = common::factory();
    skip_unless_enabled!(factory, NodeKind::Go, NodeKind::Js);

    let mut cids = Vec::new();
    for kind in NodeKind::ALL {
        let node = spawn(&factory, kind).await;
        let files = node.files();
        let options = FilesWriteOptions::default().parents().cid_version(1);

        files.mkdir("/tree/empty", true).await.unwrap();
        files
            .write("/tree/a.txt", "first", &options)
            .await
            .unwrap();
        files
            .write("/tree/sub/b.txt", data(300 * 1024, 31), &options)
            .await
            .unwrap();
        // overwrite the middle of the first file
        files
            .write("/tree/a.txt", "X", &options.clone().offset(2))
            .await
            .unwrap();
        assert_eq!(files.read("/tree/a.txt", None, None).await.unwrap().as_ref(), b"fiXst");

        files.flush("/tree").await.unwrap();
        cids.push(files.stat("/tree/sub/b.txt").await.unwrap().hash);
    }

    assert_eq!(cids[0], cids[1]);
}

#[tokio::test]
async fn directory_operations() {
    let factory = common::factory();

    for kind in NodeKind::ALL {
        if !factory.config().is_enabled(kind) {
            continue;
        }
        let node = spawn(&factory, kind).await;
        let files = node.files();

        files.mkdir("/ops/one", true).await.unwrap();
        files
            .write("/ops/one/f", "content", &FilesWriteOptions::default())
            .await
            .unwrap();
        files.cp("/ops/one", "/ops/two", false).await.unwrap();
        files.mv("/ops/one/f", "/ops/one/g").await.unwrap();

        let names = |entries: Vec<ipfs_interop::api::FilesEntry>| {
            entries
                .into_iter()
                .map(|e| (e.name, e.kind))
                .collect::<Vec<_>>()
        };

        assert_eq!(
            names(files.ls("/ops").await.unwrap()),
            vec![
                ("one".to_string(), FileType::Directory),
                ("two".to_string(), FileType::Directory)
            ]
        );
        assert_eq!(
            names(files.ls("/ops/one").await.unwrap()),
            vec![("g".to_string(), FileType::File)]
        );
        assert_eq!(
            names(files.ls("/ops/two").await.unwrap()),
            vec![("f".to_string(), FileType::File)]
        );

        assert!(files.rm("/ops/two", false, false).await.is_err(), "{kind}");
        files.rm("/ops/two", true, false).await.unwrap();
        assert!(files.stat("/ops/two").await.is_err());

        let dir = files.stat("/ops").await.unwrap();
        assert_eq!(dir.kind, FileType::Directory);
    }
}
