//! Relation metadata.
//!
//! Relations are declared per role as plain data and compiled once into
//! resolvers by the session layer. Keys left empty here are filled with the
//! conventional defaults when the [`Schema`](crate::Schema) is built.

use crate::schema::Role;

/// The kind of relationship between two roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationKind {
    /// Target table holds a key to the owner; single-valued.
    HasOne,
    /// Target table holds a key to the owner; multi-valued.
    HasMany,
    /// Owner table holds a non-nullable key to the target.
    BelongsTo,
    /// Owner table holds a nullable key to the target, settable after both rows exist.
    RefersTo,
    /// Membership through a pivot table.
    ManyToMany,
    /// Like `HasOne`, scoped by a discriminator column holding the owner role.
    MorphedHasOne,
    /// Like `HasMany`, scoped by a discriminator column holding the owner role.
    MorphedHasMany,
    /// Target columns live in the owner's row.
    Embedded,
}

impl RelationKind {
    /// Does the relation hold a list of targets?
    pub const fn is_many(self) -> bool {
        matches!(
            self,
            RelationKind::HasMany | RelationKind::MorphedHasMany | RelationKind::ManyToMany
        )
    }

    /// Is the key stored on the target side (has-* family)?
    pub const fn is_inverse(self) -> bool {
        matches!(
            self,
            RelationKind::HasOne
                | RelationKind::HasMany
                | RelationKind::MorphedHasOne
                | RelationKind::MorphedHasMany
        )
    }

    /// Does the relation need a discriminator column?
    pub const fn is_morphed(self) -> bool {
        matches!(
            self,
            RelationKind::MorphedHasOne | RelationKind::MorphedHasMany
        )
    }

    /// Short lowercase name used in log output.
    pub const fn as_str(self) -> &'static str {
        match self {
            RelationKind::HasOne => "has_one",
            RelationKind::HasMany => "has_many",
            RelationKind::BelongsTo => "belongs_to",
            RelationKind::RefersTo => "refers_to",
            RelationKind::ManyToMany => "many_to_many",
            RelationKind::MorphedHasOne => "morphed_has_one",
            RelationKind::MorphedHasMany => "morphed_has_many",
            RelationKind::Embedded => "embedded",
        }
    }
}

/// How related rows are fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchMethod {
    /// LEFT JOIN into the parent query.
    Join,
    /// One extra query keyed by the parent keys already fetched.
    Separate,
}

/// Pivot (link) table mediating a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotTable {
    /// Pivot table name (e.g., `"user_tag"`).
    pub table: String,

    /// Database holding the pivot; defaults to the owner's database.
    pub database: Option<String>,

    /// Pivot columns matching the owner's inner key.
    pub inner_key: Vec<String>,

    /// Pivot columns matching the target's outer key.
    pub outer_key: Vec<String>,
}

impl PivotTable {
    /// Create a pivot definition with conventional key columns.
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            database: None,
            inner_key: Vec::new(),
            outer_key: Vec::new(),
        }
    }

    /// Pivot column(s) pointing at the owner.
    #[must_use]
    pub fn inner_key(mut self, key: impl IntoKeyColumns) -> Self {
        self.inner_key = key.into_key_columns();
        self
    }

    /// Pivot column(s) pointing at the target.
    #[must_use]
    pub fn outer_key(mut self, key: impl IntoKeyColumns) -> Self {
        self.outer_key = key.into_key_columns();
        self
    }

    /// Database holding the pivot table.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Metadata about one relation declared on a role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationDefinition {
    /// Name of the relation property on the owner.
    pub name: String,

    /// Kind of relationship.
    pub kind: RelationKind,

    /// Target role.
    pub target: Role,

    /// Key column(s) on the owner side.
    pub inner_key: Vec<String>,

    /// Key column(s) on the target side.
    pub outer_key: Vec<String>,

    /// Discriminator column on the target (morphed kinds).
    pub morph_key: Option<String>,

    /// Persist (and delete) related entities together with the owner.
    pub cascade: bool,

    /// Whether the key column accepts NULL.
    pub nullable: bool,

    /// Pivot table (many-to-many).
    pub through: Option<PivotTable>,

    /// Column prefix of embedded columns inside the owner's row.
    pub prefix: String,

    /// Fetch method override; `None` lets the resolver decide.
    pub method: Option<FetchMethod>,
}

impl RelationDefinition {
    /// Create a relation with the kind's default flags.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: RelationKind, target: impl Into<Role>) -> Self {
        Self {
            name: name.into(),
            kind,
            target: target.into(),
            inner_key: Vec::new(),
            outer_key: Vec::new(),
            morph_key: None,
            cascade: true,
            nullable: matches!(kind, RelationKind::RefersTo),
            through: None,
            prefix: String::new(),
            method: None,
        }
    }

    #[must_use]
    pub fn has_one(name: impl Into<String>, target: impl Into<Role>) -> Self {
        Self::new(name, RelationKind::HasOne, target)
    }

    #[must_use]
    pub fn has_many(name: impl Into<String>, target: impl Into<Role>) -> Self {
        Self::new(name, RelationKind::HasMany, target)
    }

    #[must_use]
    pub fn belongs_to(name: impl Into<String>, target: impl Into<Role>) -> Self {
        Self::new(name, RelationKind::BelongsTo, target)
    }

    #[must_use]
    pub fn refers_to(name: impl Into<String>, target: impl Into<Role>) -> Self {
        Self::new(name, RelationKind::RefersTo, target)
    }

    /// Many-to-many through `pivot`.
    #[must_use]
    pub fn many_to_many(
        name: impl Into<String>,
        target: impl Into<Role>,
        pivot: PivotTable,
    ) -> Self {
        let mut rel = Self::new(name, RelationKind::ManyToMany, target);
        rel.through = Some(pivot);
        rel
    }

    /// Morphed has-one discriminated by `morph_key`.
    #[must_use]
    pub fn morphed_has_one(
        name: impl Into<String>,
        target: impl Into<Role>,
        morph_key: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::MorphedHasOne, target).morph_key(morph_key)
    }

    /// Morphed has-many discriminated by `morph_key`.
    #[must_use]
    pub fn morphed_has_many(
        name: impl Into<String>,
        target: impl Into<Role>,
        morph_key: impl Into<String>,
    ) -> Self {
        Self::new(name, RelationKind::MorphedHasMany, target).morph_key(morph_key)
    }

    #[must_use]
    pub fn embedded(name: impl Into<String>, target: impl Into<Role>) -> Self {
        Self::new(name, RelationKind::Embedded, target)
    }

    /// Set the owner-side key column(s).
    #[must_use]
    pub fn inner_key(mut self, key: impl IntoKeyColumns) -> Self {
        self.inner_key = key.into_key_columns();
        self
    }

    /// Set the target-side key column(s).
    #[must_use]
    pub fn outer_key(mut self, key: impl IntoKeyColumns) -> Self {
        self.outer_key = key.into_key_columns();
        self
    }

    /// Set the discriminator column.
    #[must_use]
    pub fn morph_key(mut self, column: impl Into<String>) -> Self {
        self.morph_key = Some(column.into());
        self
    }

    #[must_use]
    pub fn cascade(mut self, value: bool) -> Self {
        self.cascade = value;
        self
    }

    #[must_use]
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }

    /// Set the pivot table (many-to-many).
    #[must_use]
    pub fn through(mut self, pivot: PivotTable) -> Self {
        self.through = Some(pivot);
        self
    }

    /// Column prefix for embedded columns.
    #[must_use]
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Force a fetch method.
    #[must_use]
    pub fn method(mut self, method: FetchMethod) -> Self {
        self.method = Some(method);
        self
    }
}

/// Accepts a single column name or a list of them.
pub trait IntoKeyColumns {
    fn into_key_columns(self) -> Vec<String>;
}

impl IntoKeyColumns for &str {
    fn into_key_columns(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IntoKeyColumns for String {
    fn into_key_columns(self) -> Vec<String> {
        vec![self]
    }
}

impl<const N: usize> IntoKeyColumns for [&str; N] {
    fn into_key_columns(self) -> Vec<String> {
        self.iter().map(|s| (*s).to_string()).collect()
    }
}

impl IntoKeyColumns for Vec<String> {
    fn into_key_columns(self) -> Vec<String> {
        self
    }
}
