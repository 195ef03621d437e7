//! Shared fixture for the integration tests.
//!
//! One blog-like schema covering every relation kind, backed by an in-memory
//! database whose statement log the tests use to count reads and writes.

#![allow(dead_code)]

use rowgraph::{
    EntityId, GeneratedField, Heap, MemoryConnection, Orm, OrmConfig, PivotTable,
    RelationDefinition, RelationValue, Schema, SchemaEntry, Sources, Table, Typecast, Value,
};
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

static INIT_ONCE: Once = Once::new();

/// Install a test subscriber once per binary; `RUST_LOG` selects the level.
pub fn init_tracing() {
    INIT_ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

pub struct Fixture {
    pub orm: Orm,
    pub db: Arc<MemoryConnection>,
}

pub fn schema() -> Schema {
    Schema::new([
        SchemaEntry::new("user", "user")
            .columns(["id", "email", "balance", "last_comment_id"])
            .typecast("balance", Typecast::Float)
            .relation(RelationDefinition::has_many("comments", "comment"))
            .relation(RelationDefinition::has_many("posts", "post"))
            .relation(RelationDefinition::refers_to("last_comment", "comment"))
            .relation(RelationDefinition::many_to_many(
                "tags",
                "tag",
                PivotTable::new("user_tag"),
            ))
            .relation(
                RelationDefinition::morphed_has_many("images", "image", "owner_type")
                    .outer_key("owner_id"),
            )
            .relation(RelationDefinition::embedded("address", "address")),
        SchemaEntry::embeddable("address").columns(["city", "street"]),
        SchemaEntry::new("post", "post")
            .columns(["id", "user_id", "title", "created_at", "updated_at"])
            .generated("created_at", GeneratedField::OnInsert)
            .generated("updated_at", GeneratedField::OnUpdate)
            .relation(RelationDefinition::belongs_to("user", "user"))
            .relation(RelationDefinition::has_many("comments", "comment").nullable(true))
            .relation(
                RelationDefinition::morphed_has_many("images", "image", "owner_type")
                    .outer_key("owner_id"),
            ),
        SchemaEntry::new("comment", "comment")
            .columns(["id", "user_id", "post_id", "message"])
            .relation(RelationDefinition::belongs_to("user", "user")),
        SchemaEntry::new("tag", "tag").columns(["id", "name"]),
        SchemaEntry::new("image", "image").columns(["id", "owner_id", "owner_type", "url"]),
    ])
    .expect("fixture schema")
}

pub fn database() -> Arc<MemoryConnection> {
    let db = Arc::new(MemoryConnection::named("default"));
    db.create_table(Table::new("user").serial("id").columns([
        "email",
        "balance",
        "last_comment_id",
        "address_city",
        "address_street",
    ]));
    db.create_table(
        Table::new("post")
            .serial("id")
            .columns(["user_id", "title", "created_at", "updated_at"]),
    );
    db.create_table(
        Table::new("comment")
            .serial("id")
            .columns(["user_id", "post_id"])
            .not_null("message"),
    );
    db.create_table(Table::new("tag").serial("id").columns(["name"]));
    db.create_table(Table::new("user_tag").columns(["user_id", "tag_id"]));
    db.create_table(
        Table::new("image")
            .serial("id")
            .columns(["owner_id", "owner_type", "url"]),
    );
    db
}

pub fn fixture() -> Fixture {
    fixture_with(OrmConfig::default())
}

pub fn fixture_with(config: OrmConfig) -> Fixture {
    init_tracing();
    let db = database();
    let sources = Sources::new().with("default", db.clone());
    let orm = Orm::new(schema(), sources)
        .expect("fixture orm")
        .with_config(config);
    Fixture { orm, db }
}

/// Insert a row directly and return its `id` (NULL for keyless tables).
pub fn seed(db: &MemoryConnection, table: &str, pairs: &[(&str, Value)]) -> Value {
    let row = db
        .insert_row(table, pairs.iter().map(|(c, v)| (*c, v.clone())))
        .expect("seed row");
    row.get_by_name("id").cloned().unwrap_or(Value::Null)
}

/// Ids held by a loaded relation; empty when not loaded.
pub fn related(heap: &Heap, id: EntityId, relation: &str) -> Vec<EntityId> {
    heap.entity(id)
        .and_then(|e| e.relation(relation))
        .map(RelationValue::ids)
        .unwrap_or_default()
}

pub fn field(heap: &Heap, id: EntityId, name: &str) -> Value {
    heap.entity(id)
        .and_then(|e| e.get(name))
        .cloned()
        .unwrap_or(Value::Null)
}

/// Column value of the only row of `table` matching `id`.
pub fn column(db: &MemoryConnection, table: &str, id: &Value, name: &str) -> Value {
    db.rows(table)
        .into_iter()
        .find(|row| row.get_by_name("id").is_some_and(|v| v.same_as(id)))
        .and_then(|row| row.get_by_name(name).cloned())
        .unwrap_or(Value::Null)
}
