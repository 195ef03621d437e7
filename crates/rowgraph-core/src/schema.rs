//! Schema model: role → table mapping, columns, keys and relations.
//!
//! The schema is supplied fully resolved and is read-only afterwards.

use crate::error::{Error, Result, TypeError};
use crate::relation::{IntoKeyColumns, RelationDefinition, RelationKind};
use crate::statement::Condition;
use crate::value::Value;
use regex::Regex;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Stable identifier of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Role(Arc<str>);

impl Role {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Role {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Role {
    fn from(s: &str) -> Self {
        Role::new(s)
    }
}

impl From<String> for Role {
    fn from(s: String) -> Self {
        Role::new(s)
    }
}

impl From<&Role> for Role {
    fn from(r: &Role) -> Self {
        r.clone()
    }
}

/// Type applied to raw column values on hydration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Typecast {
    Int,
    Float,
    Bool,
    Text,
    Json,
}

impl Typecast {
    /// Cast a raw value; NULL always passes through.
    #[allow(clippy::result_large_err, clippy::cast_possible_truncation)]
    pub fn apply(self, column: &str, value: Value) -> Result<Value> {
        if value.is_null() {
            return Ok(value);
        }
        let cast = match (self, &value) {
            (Typecast::Int, Value::Int(_) | Value::BigInt(_)) => Some(value.clone()),
            (Typecast::Int, Value::Bool(b)) => Some(Value::BigInt(i64::from(*b))),
            (Typecast::Int, Value::Text(s)) => s.trim().parse::<i64>().ok().map(Value::BigInt),
            (Typecast::Int, Value::Double(f)) if f.fract() == 0.0 => Some(Value::BigInt(*f as i64)),
            (Typecast::Float, _) => value.as_f64().map(Value::Double),
            (Typecast::Bool, Value::Text(s)) => match s.as_str() {
                "1" | "true" | "t" => Some(Value::Bool(true)),
                "0" | "false" | "f" => Some(Value::Bool(false)),
                _ => None,
            },
            (Typecast::Bool, _) => value.as_bool().map(Value::Bool),
            (Typecast::Text, Value::Text(_)) => Some(value.clone()),
            (Typecast::Text, Value::Json(_) | Value::Bytes(_)) => None,
            (Typecast::Text, other) => Some(Value::Text(other.to_string())),
            (Typecast::Json, Value::Json(_)) => Some(value.clone()),
            (Typecast::Json, Value::Text(s)) => serde_json::from_str(s).ok().map(Value::Json),
            _ => None,
        };
        cast.ok_or_else(|| {
            Error::Type(TypeError {
                expected: self.name(),
                actual: value.type_name().to_string(),
                column: Some(column.to_string()),
            })
        })
    }

    const fn name(self) -> &'static str {
        match self {
            Typecast::Int => "integer",
            Typecast::Float => "float",
            Typecast::Bool => "boolean",
            Typecast::Text => "text",
            Typecast::Json => "json",
        }
    }
}

/// Who produces a column's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratedField {
    /// Supplied by the caller or the mapper's `next_primary_key`.
    Client,
    /// Filled by the database on insert (serial, default) and read back.
    Database,
    /// Produced by the application when the row is inserted.
    OnInsert,
    /// Produced by the application whenever the row is updated.
    OnUpdate,
    /// Both `OnInsert` and `OnUpdate`.
    OnInsertAndUpdate,
}

impl GeneratedField {
    pub const fn on_insert(self) -> bool {
        matches!(self, GeneratedField::OnInsert | GeneratedField::OnInsertAndUpdate)
    }

    pub const fn on_update(self) -> bool {
        matches!(self, GeneratedField::OnUpdate | GeneratedField::OnInsertAndUpdate)
    }
}

/// Mapping for one role.
#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub role: Role,
    pub database: String,
    pub table: String,
    pub primary_key: Vec<String>,
    pub columns: Vec<String>,
    pub typecast: HashMap<String, Typecast>,
    pub generated: HashMap<String, GeneratedField>,
    pub relations: Vec<RelationDefinition>,
    /// Embeddable roles have no table of their own.
    pub embeddable: bool,
    /// Constraint applied to every read of the role, bare columns refer
    /// to the role's table.
    pub scope: Option<Condition>,
}

impl SchemaEntry {
    pub const DEFAULT_DATABASE: &'static str = "default";

    /// Create an entry with primary key `id` on the default database.
    ///
    /// The primary key defaults to database-generated.
    #[must_use]
    pub fn new(role: impl Into<Role>, table: impl Into<String>) -> Self {
        let mut generated = HashMap::new();
        generated.insert("id".to_string(), GeneratedField::Database);
        Self {
            role: role.into(),
            database: Self::DEFAULT_DATABASE.to_string(),
            table: table.into(),
            primary_key: vec!["id".to_string()],
            columns: Vec::new(),
            typecast: HashMap::new(),
            generated,
            relations: Vec::new(),
            embeddable: false,
            scope: None,
        }
    }

    /// Create an embeddable entry whose columns live inside an owner's row.
    #[must_use]
    pub fn embeddable(role: impl Into<Role>) -> Self {
        Self {
            role: role.into(),
            database: Self::DEFAULT_DATABASE.to_string(),
            table: String::new(),
            primary_key: Vec::new(),
            columns: Vec::new(),
            typecast: HashMap::new(),
            generated: HashMap::new(),
            relations: Vec::new(),
            embeddable: true,
            scope: None,
        }
    }

    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = database.into();
        self
    }

    /// Replace the primary key; previous generation policy for `id` is dropped
    /// if `id` is no longer part of the key.
    #[must_use]
    pub fn primary_key(mut self, key: impl IntoKeyColumns) -> Self {
        self.primary_key = key.into_key_columns();
        if !self.primary_key.iter().any(|c| c == "id") {
            self.generated.remove("id");
        }
        self
    }

    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn typecast(mut self, column: impl Into<String>, cast: Typecast) -> Self {
        self.typecast.insert(column.into(), cast);
        self
    }

    #[must_use]
    pub fn generated(mut self, column: impl Into<String>, field: GeneratedField) -> Self {
        self.generated.insert(column.into(), field);
        self
    }

    #[must_use]
    pub fn relation(mut self, relation: RelationDefinition) -> Self {
        self.relations.push(relation);
        self
    }

    /// Default constraint of every fetch of this role, roots and relations
    /// alike. Repeated calls are combined with AND.
    #[must_use]
    pub fn scope(mut self, condition: Condition) -> Self {
        self.scope = Some(match self.scope.take() {
            Some(existing) => existing.and(condition),
            None => condition,
        });
        self
    }

    /// The scope with its columns qualified by `alias`.
    pub fn scope_for(&self, alias: &str) -> Option<Condition> {
        self.scope.clone().map(|c| c.qualified(alias))
    }

    /// Does the role persist this column?
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    /// Look up a relation by name.
    pub fn relation_named(&self, name: &str) -> Option<&RelationDefinition> {
        self.relations.iter().find(|r| r.name == name)
    }

    /// Generation policy of a column (`Client` when undeclared).
    pub fn generated_field(&self, column: &str) -> GeneratedField {
        self.generated
            .get(column)
            .copied()
            .unwrap_or(GeneratedField::Client)
    }

    fn default_foreign_key(prefix: &str, key: &[String]) -> Vec<String> {
        key.iter().map(|k| format!("{prefix}_{k}")).collect()
    }
}

fn identifier_regex() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap_or_else(|e| panic!("invalid regex: {e}"))
    })
}

fn check_identifier(what: &str, name: &str) -> Result<()> {
    if identifier_regex().is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidSchema(format!("invalid {what} name '{name}'")))
    }
}

/// Read-only lookup of schema entries by role.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    entries: HashMap<Role, Arc<SchemaEntry>>,
    order: Vec<Role>,
}

impl Schema {
    /// Validate `entries` and fill conventional relation keys.
    #[allow(clippy::result_large_err)]
    pub fn new(entries: impl IntoIterator<Item = SchemaEntry>) -> Result<Self> {
        let entries: Vec<SchemaEntry> = entries.into_iter().collect();
        let mut primary_keys: HashMap<Role, Vec<String>> = HashMap::new();
        for entry in &entries {
            if primary_keys
                .insert(entry.role.clone(), entry.primary_key.clone())
                .is_some()
            {
                return Err(Error::InvalidSchema(format!(
                    "role '{}' declared twice",
                    entry.role
                )));
            }
        }

        let mut schema = Schema::default();
        for mut entry in entries {
            Self::validate_entry(&entry)?;
            for rel in &mut entry.relations {
                let target_pk = primary_keys.get(&rel.target).ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "relation '{}.{}' targets unknown role '{}'",
                        entry.role, rel.name, rel.target
                    ))
                })?;
                Self::fill_relation_defaults(&entry.role, &entry.primary_key, target_pk, rel)?;
                tracing::trace!(
                    role = %entry.role,
                    relation = %rel.name,
                    kind = rel.kind.as_str(),
                    "Relation keys resolved"
                );
            }
            schema.order.push(entry.role.clone());
            schema.entries.insert(entry.role.clone(), Arc::new(entry));
        }
        tracing::debug!(roles = schema.len(), "Schema compiled");
        Ok(schema)
    }

    fn validate_entry(entry: &SchemaEntry) -> Result<()> {
        if !entry.embeddable {
            check_identifier("table", &entry.table)?;
            if entry.primary_key.is_empty() {
                return Err(Error::InvalidSchema(format!(
                    "role '{}' has no primary key",
                    entry.role
                )));
            }
        }
        for column in &entry.columns {
            check_identifier("column", column)?;
        }
        for pk in &entry.primary_key {
            if !entry.has_column(pk) {
                return Err(Error::InvalidSchema(format!(
                    "primary key '{}' of role '{}' is not a declared column",
                    pk, entry.role
                )));
            }
        }
        Ok(())
    }

    fn fill_relation_defaults(
        owner: &Role,
        owner_pk: &[String],
        target_pk: &[String],
        rel: &mut RelationDefinition,
    ) -> Result<()> {
        match rel.kind {
            RelationKind::HasOne | RelationKind::HasMany => {
                if rel.inner_key.is_empty() {
                    rel.inner_key = owner_pk.to_vec();
                }
                if rel.outer_key.is_empty() {
                    rel.outer_key = SchemaEntry::default_foreign_key(owner.as_str(), owner_pk);
                }
            }
            RelationKind::MorphedHasOne | RelationKind::MorphedHasMany => {
                if rel.inner_key.is_empty() {
                    rel.inner_key = owner_pk.to_vec();
                }
                if rel.outer_key.is_empty() {
                    rel.outer_key = SchemaEntry::default_foreign_key(&rel.name, owner_pk);
                }
                if rel.morph_key.is_none() {
                    rel.morph_key = Some(format!("{}_role", rel.name));
                }
            }
            RelationKind::BelongsTo | RelationKind::RefersTo => {
                if rel.inner_key.is_empty() {
                    rel.inner_key = SchemaEntry::default_foreign_key(&rel.name, target_pk);
                }
                if rel.outer_key.is_empty() {
                    rel.outer_key = target_pk.to_vec();
                }
            }
            RelationKind::ManyToMany => {
                if rel.inner_key.is_empty() {
                    rel.inner_key = owner_pk.to_vec();
                }
                if rel.outer_key.is_empty() {
                    rel.outer_key = target_pk.to_vec();
                }
                let inner_len = rel.inner_key.len();
                let outer_len = rel.outer_key.len();
                let pivot = rel.through.as_mut().ok_or_else(|| {
                    Error::InvalidSchema(format!(
                        "many-to-many relation '{}.{}' has no pivot table",
                        owner, rel.name
                    ))
                })?;
                check_identifier("pivot table", &pivot.table)?;
                if pivot.inner_key.is_empty() {
                    pivot.inner_key = SchemaEntry::default_foreign_key(owner.as_str(), owner_pk);
                }
                if pivot.outer_key.is_empty() {
                    pivot.outer_key =
                        SchemaEntry::default_foreign_key(rel.target.as_str(), target_pk);
                }
                if pivot.inner_key.len() != inner_len || pivot.outer_key.len() != outer_len {
                    return Err(Error::InvalidSchema(format!(
                        "pivot '{}' key arity does not match relation '{}.{}'",
                        pivot.table, owner, rel.name
                    )));
                }
            }
            RelationKind::Embedded => {
                if rel.prefix.is_empty() {
                    rel.prefix = format!("{}_", rel.name);
                }
            }
        }
        if rel.inner_key.len() != rel.outer_key.len() {
            return Err(Error::InvalidSchema(format!(
                "relation '{}.{}' has mismatched key arity",
                owner, rel.name
            )));
        }
        Ok(())
    }

    /// Entry for `role`, or `UnknownRole`.
    #[allow(clippy::result_large_err)]
    pub fn entry(&self, role: &str) -> Result<&Arc<SchemaEntry>> {
        self.entries
            .get(role)
            .ok_or_else(|| Error::UnknownRole(role.to_string()))
    }

    /// Relation `name` declared on `role`, or `UnknownRelation`.
    #[allow(clippy::result_large_err)]
    pub fn relation(&self, role: &str, name: &str) -> Result<&RelationDefinition> {
        self.entry(role)?
            .relation_named(name)
            .ok_or_else(|| Error::UnknownRelation {
                role: role.to_string(),
                relation: name.to_string(),
            })
    }

    /// Roles in declaration order.
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
