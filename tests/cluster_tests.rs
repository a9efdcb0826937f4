/// Cluster tests
///
/// Tests for invalidation delivery between repositories sharing one database
/// Run with: cargo test --test cluster_tests


use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use docstore::mapper::{ConnectionTarget, Mapper};
use docstore::{
    Credentials, Id, Invalidations, Repository, RepositoryConfig, RepositoryManagement, Value,
};
use tempfile::tempdir;
use test_utils::model;

fn node(path: &std::path::Path, node_id: &str) -> Repository {
    let config = RepositoryConfig::new("default").file(path).cluster_node(node_id);
    Repository::open(config, model()).unwrap()
}

#[test]
fn test_invalidations_cross_nodes_on_poll() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cluster.db");
    let first = node(&path, "node-1");
    let second = node(&path, "node-2");

    let mut writer = first.session(&Credentials::system()).unwrap();
    let reader = second.session(&Credentials::system()).unwrap();
    assert_eq!(
        writer.get_root_node().unwrap().id(),
        reader.get_root_node().unwrap().id()
    );

    let root = writer.get_root_node().unwrap();
    let doc = writer.add_child_node(&root, "doc", "Note").unwrap();
    writer.set_single_property(&doc, "dc:title", Value::from("v1")).unwrap();
    writer.save().unwrap();
    reader.process_invalidations().unwrap();
    assert_eq!(reader.get_single_property(&doc, "dc:title").unwrap(), Value::from("v1"));

    writer.set_single_property(&doc, "dc:title", Value::from("v2")).unwrap();
    writer.save().unwrap();
    // still served from the reader's cache until it polls
    assert_eq!(reader.get_single_property(&doc, "dc:title").unwrap(), Value::from("v1"));
    reader.process_invalidations().unwrap();
    assert_eq!(reader.get_single_property(&doc, "dc:title").unwrap(), Value::from("v2"));
}

#[test]
fn test_polling_session_relays_to_its_siblings() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("relay.db");
    let first = node(&path, "node-1");
    let second = node(&path, "node-2");

    let mut writer = first.session(&Credentials::system()).unwrap();
    let root = writer.get_root_node().unwrap();
    let doc = writer.add_child_node(&root, "doc", "Note").unwrap();
    writer.set_single_property(&doc, "dc:title", Value::from("v1")).unwrap();
    writer.save().unwrap();

    let poller = second.session(&Credentials::system()).unwrap();
    let sibling = second.session(&Credentials::system()).unwrap();
    poller.process_invalidations().unwrap();
    assert_eq!(sibling.get_single_property(&doc, "dc:title").unwrap(), Value::from("v1"));
    assert!(sibling.get_node_by_id(doc.id()).unwrap().is_some());

    writer.remove_node(&doc).unwrap();
    writer.save().unwrap();
    poller.process_invalidations().unwrap();
    assert!(sibling.get_node_by_id(doc.id()).unwrap().is_none());
    assert_eq!(second.active_sessions_count().unwrap(), 2);
}

#[test]
fn test_closed_node_receives_nothing() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("closed.db");
    let first = node(&path, "node-1");
    let second = node(&path, "node-2");
    second.close().unwrap();

    let mut writer = first.session(&Credentials::system()).unwrap();
    let root = writer.get_root_node().unwrap();
    writer.add_child_node(&root, "doc", "Note").unwrap();
    writer.save().unwrap();

    let rejoined = node(&path, "node-2");
    let session = rejoined.session(&Credentials::system()).unwrap();
    session.process_invalidations().unwrap();
    assert!(session.get_node_by_path("/doc").unwrap().is_some());
}

#[test]
fn test_drain_loses_nothing_posted_concurrently() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("drain.db");
    let first = node(&path, "node-1");
    let second = node(&path, "node-2");
    let open = |repo: &Repository| {
        Mapper::open(
            ConnectionTarget::File(path.clone()),
            repo.model().clone(),
            repo.sql_info().clone(),
        )
        .unwrap()
    };
    let poster = open(&first);
    let poller = open(&second);
    let done = Arc::new(AtomicBool::new(false));

    let posting = {
        let done = done.clone();
        thread::spawn(move || {
            let mut posted = BTreeSet::new();
            for i in 0..200 {
                let id = Id::from(format!("doc-{}", i).as_str());
                let mut inv = Invalidations::new();
                inv.add_modified("misc", id.clone());
                assert_eq!(poster.insert_cluster_invalidations("node-1", &inv).unwrap(), 1);
                posted.insert(id);
            }
            done.store(true, Ordering::SeqCst);
            posted
        })
    };

    let mut received = BTreeSet::new();
    let mut collect = |inv: Invalidations| {
        for ids in inv.modified.into_values() {
            received.extend(ids);
        }
    };
    while !done.load(Ordering::SeqCst) {
        collect(poller.get_cluster_invalidations("node-2").unwrap());
    }
    let posted = posting.join().unwrap();
    collect(poller.get_cluster_invalidations("node-2").unwrap());

    assert_eq!(received, posted);
    assert!(poller.get_cluster_invalidations("node-2").unwrap().is_empty());
}
