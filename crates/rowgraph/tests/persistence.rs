mod common;

use common::{column, field, fixture, related, seed};
use rowgraph::prelude::*;
use rowgraph::{Connection, EntityMapper, Mapper, MemoryConnection, Row, Statement, Update};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

fn writes(db: &MemoryConnection) -> Vec<Statement> {
    db.statements().into_iter().filter(Statement::is_write).collect()
}

#[test]
fn new_user_with_comment_inserts_user_first() {
    let f = fixture();
    let mut heap = Heap::new();
    let user = heap.create(
        Entity::new("user")
            .with("email", "hello@world.com")
            .with("balance", 100i64),
    );
    let comment = heap.create(Entity::new("comment").with("message", "first"));
    heap.entity_mut(user).unwrap().push("comments", comment);

    let summary = Transaction::new(&f.orm).persist(user).run(&mut heap).unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.total(), 2);

    let statements = writes(&f.db);
    let [Statement::Insert(first), Statement::Insert(second)] = &statements[..] else {
        panic!("unexpected statements {statements:?}");
    };
    assert_eq!(first.table, "user");
    assert_eq!(first.returning, vec!["id".to_string()]);
    assert_eq!(second.table, "comment");

    let user_id = field(&heap, user, "id");
    assert_eq!(user_id, Value::BigInt(1));
    assert!(second.values["user_id"].same_as(&user_id));
    assert!(field(&heap, comment, "user_id").same_as(&user_id));
    assert_eq!(field(&heap, user, "balance"), Value::Double(100.0));
    assert_eq!(heap.state_of(user).unwrap().status, Status::Managed);
    assert_eq!(heap.get("comment", &Key::from(1i64)), Some(comment));
}

#[test]
fn child_persist_inserts_its_new_parent() {
    let f = fixture();
    let mut heap = Heap::new();
    let user = heap.create(Entity::new("user").with("email", "a@x"));
    let comment = heap.create(Entity::new("comment").with("message", "hi"));
    heap.entity_mut(comment).unwrap().set_one("user", Some(user));

    Transaction::new(&f.orm).persist(comment).run(&mut heap).unwrap();

    let tables: Vec<String> = writes(&f.db).iter().map(|s| s.table().to_string()).collect();
    assert_eq!(tables, vec!["user", "comment"]);
    let comment_id = field(&heap, comment, "id");
    assert!(column(&f.db, "comment", &comment_id, "user_id").same_as(&field(&heap, user, "id")));
}

#[test]
fn unchanged_graph_produces_no_writes() {
    let f = fixture();
    let user = seed(&f.db, "user", &[("email", "a@x".into()), ("address_city", "Oslo".into())]);
    let post = seed(&f.db, "post", &[("user_id", user.clone()), ("title", "t".into())]);
    let comment = seed(
        &f.db,
        "comment",
        &[
            ("user_id", user.clone()),
            ("post_id", post.clone()),
            ("message", "m".into()),
        ],
    );
    let tag = seed(&f.db, "tag", &[("name", "rust".into())]);
    seed(&f.db, "user_tag", &[("user_id", user.clone()), ("tag_id", tag)]);
    seed(
        &f.db,
        "image",
        &[
            ("owner_id", user.clone()),
            ("owner_type", "user".into()),
            ("url", "a.png".into()),
        ],
    );
    f.db.update(&Update {
        table: "user".into(),
        set: [("last_comment_id".to_string(), comment)].into_iter().collect(),
        filter: Condition::eq("id", user.clone()),
    })
    .unwrap();

    let mut heap = Heap::new();
    let mut selector = Selector::new(&f.orm, "user").unwrap();
    for path in ["comments", "posts.comments", "tags", "images", "last_comment.user"] {
        selector.load(path).unwrap();
    }
    let users = selector.fetch_all(&mut heap).unwrap();
    f.db.reset_log();

    let mut tx = Transaction::new(&f.orm);
    for &id in &users {
        tx.persist(id);
    }
    let summary = tx.run(&mut heap).unwrap();
    assert_eq!(summary.total(), 0);
    assert_eq!(f.db.write_count(), 0);
    assert!(!f.db.in_transaction());
}

#[test]
fn refetch_with_fresh_heap_returns_written_values() {
    let f = fixture();
    let mut heap = Heap::new();
    let address = heap.create(Entity::new("address").with("city", "Lyon"));
    let user = heap.create(
        Entity::new("user")
            .with("email", "a@x")
            .with("balance", 12.5),
    );
    let post = heap.create(Entity::new("post").with("title", "first"));
    {
        let entity = heap.entity_mut(user).unwrap();
        entity.set_one("address", Some(address));
        entity.push("posts", post);
    }
    Transaction::new(&f.orm).persist(user).run(&mut heap).unwrap();

    let mut fresh = Heap::new();
    let mut selector = Selector::new(&f.orm, "user").unwrap();
    selector.where_pk(field(&heap, user, "id")).unwrap().load("posts").unwrap();
    let loaded = selector.fetch_one(&mut fresh).unwrap().unwrap();

    for name in ["id", "email", "balance", "last_comment_id"] {
        assert_eq!(field(&fresh, loaded, name), field(&heap, user, name), "{name}");
    }
    let posts = related(&fresh, loaded, "posts");
    assert_eq!(posts.len(), 1);
    for name in ["id", "user_id", "title", "created_at"] {
        assert!(field(&fresh, posts[0], name).same_as(&field(&heap, post, name)), "{name}");
    }
    let address = related(&fresh, loaded, "address");
    assert_eq!(field(&fresh, address[0], "city"), Value::from("Lyon"));
    assert!(field(&fresh, address[0], "street").is_null());
}

#[test]
fn updates_carry_only_changed_columns() {
    let f = fixture();
    let user = seed(&f.db, "user", &[("email", "a@x".into()), ("balance", 1i64.into())]);

    let mut heap = Heap::new();
    let mut selector = Selector::new(&f.orm, "user").unwrap();
    selector.where_pk(user.clone()).unwrap();
    let id = selector.fetch_one(&mut heap).unwrap().unwrap();
    heap.entity_mut(id).unwrap().set("email", "b@x");
    f.db.reset_log();

    let summary = Transaction::new(&f.orm).persist(id).run(&mut heap).unwrap();
    assert_eq!(summary.updated, 1);
    let statements = writes(&f.db);
    let [Statement::Update(update)] = &statements[..] else {
        panic!("unexpected statements {statements:?}");
    };
    assert_eq!(update.set.keys().collect::<Vec<_>>(), vec!["email"]);
    assert_eq!(column(&f.db, "user", &user, "email"), Value::from("b@x"));
    assert_eq!(
        heap.state_of(id).unwrap().snapshot.get("email"),
        Some(&Value::from("b@x"))
    );
}

#[test]
fn generated_fields_are_stamped_on_insert_and_update() {
    let f = fixture();
    let mut heap = Heap::new();
    let post = heap.create(Entity::new("post").with("title", "draft"));
    Transaction::new(&f.orm).persist(post).run(&mut heap).unwrap();

    let created = field(&heap, post, "created_at");
    assert!(matches!(created, Value::Timestamp(_)));
    assert!(field(&heap, post, "updated_at").is_null());
    let id = field(&heap, post, "id");
    assert_eq!(column(&f.db, "post", &id, "created_at"), created);

    heap.entity_mut(post).unwrap().set("title", "final");
    f.db.reset_log();
    let summary = Transaction::new(&f.orm).persist(post).run(&mut heap).unwrap();
    assert_eq!(summary.updated, 1);
    let updated = field(&heap, post, "updated_at");
    assert!(matches!(updated, Value::Timestamp(_)));
    assert_eq!(column(&f.db, "post", &id, "updated_at"), updated);
    assert_eq!(field(&heap, post, "created_at"), created);

    f.db.reset_log();
    Transaction::new(&f.orm).persist(post).run(&mut heap).unwrap();
    assert_eq!(f.db.write_count(), 0);
}

#[test]
fn embedded_changes_update_the_owner_row() {
    let f = fixture();
    let user = seed(
        &f.db,
        "user",
        &[("email", "a@x".into()), ("address_city", "Rome".into())],
    );

    let mut heap = Heap::new();
    let mut selector = Selector::new(&f.orm, "user").unwrap();
    selector.where_pk(user.clone()).unwrap();
    let id = selector.fetch_one(&mut heap).unwrap().unwrap();
    let address = related(&heap, id, "address")[0];
    heap.entity_mut(address).unwrap().set("street", "Via Appia");
    f.db.reset_log();

    Transaction::new(&f.orm).persist(id).run(&mut heap).unwrap();
    let statements = writes(&f.db);
    let [Statement::Update(update)] = &statements[..] else {
        panic!("unexpected statements {statements:?}");
    };
    assert_eq!(update.table, "user");
    assert_eq!(update.set.keys().collect::<Vec<_>>(), vec!["address_street"]);
    assert_eq!(column(&f.db, "user", &user, "address_city"), Value::from("Rome"));
    assert_eq!(column(&f.db, "user", &user, "address_street"), Value::from("Via Appia"));

    f.db.reset_log();
    Transaction::new(&f.orm).persist(id).run(&mut heap).unwrap();
    assert_eq!(f.db.write_count(), 0);
}

/// Hands out text keys instead of relying on a serial column.
struct TokenMapper {
    next: AtomicI64,
}

impl Mapper for TokenMapper {
    fn hydrate(&self, entry: &SchemaEntry, row: &Row) -> Result<Entity> {
        EntityMapper.hydrate(entry, row)
    }

    fn extract(
        &self,
        entry: &SchemaEntry,
        entity: &Entity,
    ) -> Result<std::collections::BTreeMap<String, Value>> {
        EntityMapper.extract(entry, entity)
    }

    fn next_primary_key(&self, _entry: &SchemaEntry) -> Option<Key> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        Some(Key::from(format!("tok-{n}")))
    }
}

#[test]
fn client_generated_keys_come_from_the_mapper() {
    common::init_tracing();
    let schema = Schema::new([SchemaEntry::new("token", "token")
        .primary_key("code")
        .columns(["code", "scope"])
        .generated("code", GeneratedField::Client)])
    .unwrap();
    let db = Arc::new(MemoryConnection::new());
    db.create_table(Table::new("token").columns(["code", "scope"]));
    let orm = Orm::new(schema, Sources::new().with("default", db.clone()))
        .unwrap()
        .with_mapper(
            "token",
            Arc::new(TokenMapper {
                next: AtomicI64::new(7),
            }),
        );

    let mut heap = Heap::new();
    let first = heap.create(Entity::new("token").with("scope", "read"));
    let second = heap.create(Entity::new("token").with("code", "given").with("scope", "write"));
    Transaction::new(&orm)
        .persist(first)
        .persist(second)
        .run(&mut heap)
        .unwrap();

    assert_eq!(field(&heap, first, "code"), Value::from("tok-7"));
    assert_eq!(field(&heap, second, "code"), Value::from("given"));
    assert_eq!(heap.get("token", &Key::from("tok-7")), Some(first));
    let statements = db.statements();
    assert!(statements.iter().all(|s| match s {
        Statement::Insert(insert) => insert.returning.is_empty(),
        _ => true,
    }));
    assert_eq!(db.rows("token").len(), 2);
}

#[test]
fn registered_values_are_written_once_then_cleared() {
    let f = fixture();
    let user = seed(&f.db, "user", &[("email", "a@x".into()), ("balance", 1i64.into())]);

    let mut heap = Heap::new();
    let mut selector = Selector::new(&f.orm, "user").unwrap();
    selector.where_pk(user.clone()).unwrap();
    let id = selector.fetch_one(&mut heap).unwrap().unwrap();
    heap.register(id, "balance", Value::Double(7.5));
    assert_eq!(field(&heap, id, "balance"), Value::Double(1.0));
    f.db.reset_log();

    let summary = Transaction::new(&f.orm).persist(id).run(&mut heap).unwrap();
    assert_eq!(summary.updated, 1);
    let statements = writes(&f.db);
    let [Statement::Update(update)] = &statements[..] else {
        panic!("unexpected statements {statements:?}");
    };
    assert_eq!(update.set.keys().collect::<Vec<_>>(), vec!["balance"]);
    assert_eq!(column(&f.db, "user", &user, "balance"), Value::Double(7.5));
    assert_eq!(field(&heap, id, "balance"), Value::Double(7.5));
    assert!(heap.state_of(id).unwrap().overrides.is_empty());

    f.db.reset_log();
    Transaction::new(&f.orm).persist(id).run(&mut heap).unwrap();
    assert_eq!(f.db.write_count(), 0);
}
