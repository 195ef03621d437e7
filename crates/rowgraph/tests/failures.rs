mod common;

use common::{field, fixture, related, seed};
use rowgraph::prelude::*;
use rowgraph::{Fault, QueryErrorKind};
use std::error::Error as _;
use std::sync::Arc;

#[test]
fn unbreakable_cycle_fails_before_any_statement() {
    common::init_tracing();
    let schema = Schema::new([
        SchemaEntry::new("a", "a")
            .columns(["id", "b_id"])
            .relation(RelationDefinition::belongs_to("b", "b")),
        SchemaEntry::new("b", "b")
            .columns(["id", "a_id"])
            .relation(RelationDefinition::belongs_to("a", "a")),
    ])
    .unwrap();
    let db = Arc::new(MemoryConnection::new());
    db.create_table(Table::new("a").serial("id").columns(["b_id"]));
    db.create_table(Table::new("b").serial("id").columns(["a_id"]));
    let orm = Orm::new(schema, Sources::new().with("default", db.clone())).unwrap();

    let mut heap = Heap::new();
    let a = heap.create(Entity::new("a"));
    let b = heap.create(Entity::new("b"));
    heap.entity_mut(a).unwrap().set_one("b", Some(b));
    heap.entity_mut(b).unwrap().set_one("a", Some(a));

    let err = Transaction::new(&orm).persist(a).run(&mut heap).unwrap_err();
    match &err {
        Error::CommandCycle { members } => {
            assert!(members.contains(&"a".to_string()));
            assert!(members.contains(&"b".to_string()));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!err.is_configuration());
    assert!(db.statements().is_empty());
    assert!(!db.in_transaction());
    assert!(heap.state_of(a).is_none());
}

#[test]
fn failed_write_rolls_back_and_leaves_heap_untouched() {
    let f = fixture();
    f.db.fail_on(Fault::Table("comment".into()));

    let mut heap = Heap::new();
    let user = heap.create(Entity::new("user").with("email", "a@x"));
    let comment = heap.create(Entity::new("comment").with("message", "hi"));
    heap.entity_mut(user).unwrap().push("comments", comment);

    let err = Transaction::new(&f.orm).persist(user).run(&mut heap).unwrap_err();
    let Error::TransactionFailed { source } = &err else {
        panic!("unexpected {err:?}");
    };
    assert!(matches!(
        source.as_ref(),
        Error::Query(q) if q.kind == QueryErrorKind::Database
    ));
    assert!(err.source().is_some());

    assert!(f.db.rows("user").is_empty());
    assert!(f.db.rows("comment").is_empty());
    assert!(!f.db.in_transaction());
    assert!(heap.state_of(user).is_none());
    assert!(heap.state_of(comment).is_none());
    assert!(field(&heap, user, "id").is_null());
    assert!(field(&heap, comment, "user_id").is_null());

    f.db.clear_fault();
    let summary = Transaction::new(&f.orm).persist(user).run(&mut heap).unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(f.db.rows("comment").len(), 1);
}

#[test]
fn constraint_violation_surfaces_as_transaction_failure() {
    let f = fixture();
    let mut heap = Heap::new();
    let user = heap.create(Entity::new("user").with("email", "a@x"));
    let comment = heap.create(Entity::new("comment"));
    heap.entity_mut(user).unwrap().push("comments", comment);

    let err = Transaction::new(&f.orm).persist(user).run(&mut heap).unwrap_err();
    let Error::TransactionFailed { source } = &err else {
        panic!("unexpected {err:?}");
    };
    let Error::Query(query) = source.as_ref() else {
        panic!("unexpected source {source:?}");
    };
    assert_eq!(query.kind, QueryErrorKind::Constraint);
    assert_eq!(query.table.as_deref(), Some("comment"));
    assert!(err.to_string().contains("NOT NULL"));
    assert!(f.db.rows("user").is_empty());
}

#[test]
fn failed_update_keeps_previous_snapshot_for_retry() {
    let f = fixture();
    let user = seed(&f.db, "user", &[("email", "a@x".into())]);
    seed(&f.db, "comment", &[("user_id", user.clone()), ("message", "m".into())]);

    let mut heap = Heap::new();
    let mut selector = Selector::new(&f.orm, "user").unwrap();
    selector.where_pk(user.clone()).unwrap().load("comments").unwrap();
    let id = selector.fetch_one(&mut heap).unwrap().unwrap();
    let comment = related(&heap, id, "comments")[0];
    heap.entity_mut(id).unwrap().set("email", "b@x");
    heap.entity_mut(comment).unwrap().set("message", "edited");

    f.db.fail_on(Fault::NthWrite(2));
    assert!(Transaction::new(&f.orm).persist(id).run(&mut heap).is_err());
    let snapshot = &heap.state_of(id).unwrap().snapshot;
    assert_eq!(snapshot.get("email"), Some(&Value::from("a@x")));
    assert_eq!(f.db.rows("user")[0].get_by_name("email"), Some(&Value::from("a@x")));
    assert_eq!(f.db.rows("comment")[0].get_by_name("message"), Some(&Value::from("m")));

    f.db.clear_fault();
    f.db.reset_log();
    let summary = Transaction::new(&f.orm).persist(id).run(&mut heap).unwrap();
    assert_eq!(summary.updated, 2);
    assert_eq!(f.db.rows("user")[0].get_by_name("email"), Some(&Value::from("b@x")));
}

/// Users in "default", notes in "archive".
fn two_databases() -> (Orm, Arc<MemoryConnection>, Arc<MemoryConnection>) {
    common::init_tracing();
    let schema = Schema::new([
        SchemaEntry::new("user", "user").columns(["id", "email"]),
        SchemaEntry::new("note", "note")
            .database("archive")
            .columns(["id", "body"]),
    ])
    .unwrap();
    let main = Arc::new(MemoryConnection::named("default"));
    main.create_table(Table::new("user").serial("id").columns(["email"]));
    let archive = Arc::new(MemoryConnection::named("archive"));
    archive.create_table(Table::new("note").serial("id").columns(["body"]));
    let sources = Sources::new()
        .with("default", main.clone())
        .with("archive", archive.clone());
    let orm = Orm::new(schema, sources).unwrap();
    (orm, main, archive)
}

#[test]
fn failure_in_one_database_rolls_back_all_of_them() {
    let (orm, main, archive) = two_databases();
    archive.fail_on(Fault::Table("note".into()));

    let mut heap = Heap::new();
    let user = heap.create(Entity::new("user").with("email", "a@x"));
    let note = heap.create(Entity::new("note").with("body", "text"));
    let err = Transaction::new(&orm)
        .persist(user)
        .persist(note)
        .run(&mut heap)
        .unwrap_err();

    assert!(matches!(err, Error::TransactionFailed { .. }));
    assert!(main.rows("user").is_empty());
    assert!(archive.rows("note").is_empty());
    assert!(!main.in_transaction());
    assert!(!archive.in_transaction());
    assert!(heap.state_of(user).is_none());
}

#[test]
fn failed_first_commit_rolls_back_every_database() {
    let (orm, main, archive) = two_databases();
    // "archive" commits first.
    archive.fail_on(Fault::Commit);

    let mut heap = Heap::new();
    let user = heap.create(Entity::new("user").with("email", "a@x"));
    let note = heap.create(Entity::new("note").with("body", "text"));
    let err = Transaction::new(&orm)
        .persist(user)
        .persist(note)
        .run(&mut heap)
        .unwrap_err();

    let Error::TransactionFailed { source } = &err else {
        panic!("unexpected {err:?}");
    };
    assert!(matches!(source.as_ref(), Error::Query(q) if q.kind == QueryErrorKind::Transaction));
    assert!(main.rows("user").is_empty());
    assert!(archive.rows("note").is_empty());
    assert!(!main.in_transaction());
    assert!(heap.state_of(user).is_none());
    assert!(heap.state_of(note).is_none());
}

#[test]
fn commit_failing_after_another_database_committed_is_partial() {
    let (orm, main, archive) = two_databases();
    main.fail_on(Fault::Commit);

    let mut heap = Heap::new();
    let user = heap.create(Entity::new("user").with("email", "a@x"));
    let note = heap.create(Entity::new("note").with("body", "text"));
    let mut tx = Transaction::new(&orm);
    tx.persist(user).persist(note);
    let err = tx.run(&mut heap).unwrap_err();

    match &err {
        Error::PartialCommit {
            committed, failed, ..
        } => {
            assert_eq!(committed, &vec!["archive".to_string()]);
            assert_eq!(failed, "default");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(err.source().is_some());
    assert_eq!(archive.rows("note").len(), 1);
    assert!(main.rows("user").is_empty());
    assert!(!main.in_transaction());
    assert!(!archive.in_transaction());

    // The heap follows what is durable.
    assert_eq!(heap.state_of(note).unwrap().status, Status::Managed);
    assert_eq!(field(&heap, note, "id"), Value::BigInt(1));
    assert!(heap.state_of(user).is_none());
    assert!(field(&heap, user, "id").is_null());

    main.clear_fault();
    archive.reset_log();
    let summary = tx.run(&mut heap).unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(archive.write_count(), 0);
    assert_eq!(main.rows("user").len(), 1);
    assert_eq!(archive.rows("note").len(), 1);
}

#[test]
fn failed_insert_discards_generated_values() {
    let f = fixture();
    f.db.fail_on(Fault::Table("post".into()));
    let mut heap = Heap::new();
    let post = heap.create(Entity::new("post").with("title", "draft"));

    assert!(Transaction::new(&f.orm).persist(post).run(&mut heap).is_err());
    assert!(heap.state_of(post).is_none());
    assert!(field(&heap, post, "created_at").is_null());

    f.db.clear_fault();
    Transaction::new(&f.orm).persist(post).run(&mut heap).unwrap();
    assert!(heap.state_of(post).unwrap().overrides.is_empty());
    assert!(matches!(field(&heap, post, "created_at"), Value::Timestamp(_)));
}

#[test]
fn configuration_errors_are_reported_before_loading() {
    let f = fixture();
    assert!(matches!(
        Selector::new(&f.orm, "ghost"),
        Err(Error::UnknownRole(role)) if role == "ghost"
    ));

    let mut selector = Selector::new(&f.orm, "user").unwrap();
    let err = selector.load("comments.author").unwrap_err();
    assert!(err.is_configuration());
    assert_eq!(f.db.query_count(), 0);
}
