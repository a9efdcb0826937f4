/// Query tests
///
/// Tests for NXQL queries run through a session against SQLite
/// Run with: cargo test --test query_tests


use docstore::query::Expr;
use docstore::{
    Credentials, FacetFilter, Id, Query, QueryFilter, Repository, RepositoryConfig, Session,
    StorageError, Value,
};
use test_utils::{admin_session, memory_repository, model};

/// Builds /ws/{a,b,c,d} notes plus a folder and a file, returns the notes in
/// title order.
fn populate(session: &mut Session) -> Vec<Id> {
    let root = session.get_root_node().unwrap();
    let ws = session.add_child_node(&root, "ws", "Folder").unwrap();
    let mut ids = Vec::new();
    for (name, subject) in [("c", "x"), ("a", "y"), ("d", "x"), ("b", "z")] {
        let note = session.add_child_node(&ws, name, "Note").unwrap();
        session.set_single_property(&note, "dc:title", Value::from(name)).unwrap();
        session
            .set_collection_property(&note, "dc:subjects", vec![Value::from(subject)])
            .unwrap();
        ids.push((name, note.id().clone()));
    }
    let other = session.add_child_node(&root, "other", "Folder").unwrap();
    let file = session.add_child_node(&other, "f", "File").unwrap();
    session.set_single_property(&file, "dc:title", Value::from("a")).unwrap();
    ids.sort();
    ids.into_iter().map(|(_, id)| id).collect()
}

#[test]
fn test_order_offset_limit_and_total() {
    let repo = memory_repository("paging");
    let mut session = admin_session(&repo);
    let notes = populate(&mut session);
    let all = QueryFilter::unrestricted();

    let result = session
        .query_text("SELECT * FROM Note ORDER BY dc:title", &all, true)
        .unwrap();
    assert_eq!(result.ids, notes);
    assert_eq!(result.total_size, Some(4));

    let query = Query::from_type("Note").order_by("dc:title", true).offset(1).limit(2);
    let page = session.query(&query, &all, true).unwrap();
    assert_eq!(page.ids, vec![notes[2].clone(), notes[1].clone()]);
    assert_eq!(page.total_size, Some(4));

    let page = session.query(&query, &all, false).unwrap();
    assert_eq!(page.total_size, None);
}

#[test]
fn test_predicates() {
    let repo = memory_repository("predicates");
    let mut session = admin_session(&repo);
    let notes = populate(&mut session);
    let all = QueryFilter::unrestricted();
    let ids = |text: &str| session.query_text(text, &all, false).unwrap().ids;

    assert_eq!(ids("SELECT * FROM Note WHERE dc:title = 'b'"), vec![notes[1].clone()]);
    assert_eq!(
        ids("SELECT * FROM Note WHERE dc:title IN ('a', 'd') ORDER BY dc:title"),
        vec![notes[0].clone(), notes[3].clone()]
    );
    assert_eq!(
        ids("SELECT * FROM Note WHERE dc:subjects = 'x' ORDER BY dc:title"),
        vec![notes[2].clone(), notes[3].clone()]
    );
    assert_eq!(
        ids("SELECT * FROM Note WHERE dc:title LIKE 'a%' OR dc:title = 'c' ORDER BY dc:title"),
        vec![notes[0].clone(), notes[2].clone()]
    );
    assert_eq!(ids("SELECT * FROM Document WHERE dc:title = 'a'").len(), 2);
    assert_eq!(ids("SELECT * FROM File WHERE dc:title = 'a'").len(), 1);
    assert_eq!(ids("SELECT * FROM Note WHERE ecm:name = 'd'"), vec![notes[3].clone()]);
}

#[test]
fn test_paths() {
    let repo = memory_repository("paths");
    let mut session = admin_session(&repo);
    let notes = populate(&mut session);
    let all = QueryFilter::unrestricted();

    let result = session
        .query_text(
            "SELECT * FROM Document WHERE ecm:path STARTSWITH '/ws' ORDER BY dc:title",
            &all,
            false,
        )
        .unwrap();
    assert_eq!(result.ids, notes);

    let nowhere = session
        .query_text("SELECT * FROM Document WHERE ecm:path STARTSWITH '/missing'", &all, true)
        .unwrap();
    assert!(nowhere.is_empty());
    assert_eq!(nowhere.total_size, Some(0));
}

#[test]
fn test_facet_filter() {
    let repo = memory_repository("facets");
    let mut session = admin_session(&repo);
    populate(&mut session);
    let folderish = QueryFilter::unrestricted().with_facet_filter(FacetFilter::allow_all().require("Folderish"));
    let result = session.query_text("SELECT * FROM Document", &folderish, true).unwrap();
    assert_eq!(result.total_size, Some(2));

    let not_folderish =
        QueryFilter::unrestricted().with_facet_filter(FacetFilter::allow_all().exclude("Folderish"));
    let result = session.query_text("SELECT * FROM Document", &not_folderish, true).unwrap();
    assert_eq!(result.total_size, Some(5));
}

#[test]
fn test_queries_see_unsaved_changes() {
    let repo = memory_repository("autoflush");
    let mut session = admin_session(&repo);
    let root = session.get_root_node().unwrap();
    let note = session.add_child_node(&root, "n", "Note").unwrap();
    session.set_single_property(&note, "dc:title", Value::from("fresh")).unwrap();

    let query = Query::from_type("Note").filter(Expr::reference("dc:title").eq(Expr::string("fresh")));
    let result = session.query(&query, &QueryFilter::unrestricted(), false).unwrap();
    assert_eq!(result.ids, vec![note.id().clone()]);
    assert!(!session.has_changes().unwrap());
}

#[test]
fn test_results_are_deterministic() {
    let repo = memory_repository("determinism");
    let mut session = admin_session(&repo);
    populate(&mut session);
    let filter = session.query_filter(&["Read"]);
    let text = "SELECT * FROM Document WHERE ecm:path STARTSWITH '/ws' ORDER BY ecm:name";
    let first = session.query_text(text, &filter, true).unwrap();
    for _ in 0..3 {
        assert_eq!(session.query_text(text, &filter, true).unwrap(), first);
    }
}

#[test]
fn test_proxies_only_when_asked() {
    let config = RepositoryConfig::new("no-proxies").proxies_in_queries(false);
    let repo = Repository::open(config, model()).unwrap();
    let mut session = repo.session(&Credentials::system()).unwrap();
    let root = session.get_root_node().unwrap();
    let doc = session.add_child_node(&root, "doc", "Note").unwrap();
    let section = session.add_child_node(&root, "section", "Folder").unwrap();
    let version = session.check_in(&doc, None, None).unwrap();
    let proxy = session.add_proxy(&version, &section, "doc").unwrap();
    let all = QueryFilter::unrestricted();

    let live = session
        .query_text("SELECT * FROM Note WHERE ecm:isCheckedInVersion = 0", &all, false)
        .unwrap();
    assert_eq!(live.ids, vec![doc.id().clone()]);

    let proxies = session
        .query_text("SELECT * FROM Note WHERE ecm:isProxy = 1", &all, false)
        .unwrap();
    assert_eq!(proxies.ids, vec![proxy.id().clone()]);
}

#[test]
fn test_query_errors() {
    let repo = memory_repository("errors");
    let session = admin_session(&repo);
    let all = QueryFilter::unrestricted();
    for text in [
        "SELECT FROM",
        "SELECT * FROM Nope",
        "SELECT * FROM Note WHERE dc:nope = 1",
        "SELECT * FROM Note ORDER BY ecm:path",
    ] {
        assert!(
            matches!(session.query_text(text, &all, false), Err(StorageError::Query(_))),
            "{}",
            text
        );
    }
}

#[test]
fn test_versions_are_not_in_the_tree_of_their_document() {
    let repo = memory_repository("version-tree");
    let mut session = admin_session(&repo);
    let root = session.get_root_node().unwrap();
    let folder = session.add_child_node(&root, "a", "Folder").unwrap();
    let doc = session.add_child_node(&folder, "doc", "Note").unwrap();
    let child = session.add_child_node(&doc, "child", "Note").unwrap();
    let version = session.check_in(&doc, Some("1.0"), None).unwrap();
    session.save().unwrap();
    let all = QueryFilter::unrestricted();

    let under_folder = session
        .query_text("SELECT * FROM Note WHERE ecm:path STARTSWITH '/a'", &all, false)
        .unwrap();
    assert!(!under_folder.ids.contains(version.id()));
    assert!(under_folder.ids.contains(doc.id()));
    assert!(under_folder.ids.contains(child.id()));

    let under_doc = session
        .query_text("SELECT * FROM Note WHERE ecm:path STARTSWITH '/a/doc'", &all, false)
        .unwrap();
    assert_eq!(under_doc.ids, vec![child.id().clone()]);
}
