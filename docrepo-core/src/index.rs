//! Index descriptors.
//!
//! A descriptor names one or more fields with an [`IndexKind`] each, plus
//! [`IndexOptions`]. Unnamed indexes get the store's conventional name,
//! `field_kind` segments joined by underscores (e.g. `name_1_age_-1`).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexKind {
    Ascending,
    Descending,
    /// Full-text search over string content.
    Text,
    /// Hash of the value, for equality lookups and sharding.
    Hashed,
    /// Planar coordinates.
    Geo2D,
    /// Coordinates on a sphere.
    Geo2DSphere,
    /// Every subpath of the field, or of the whole document when the field is empty.
    Wildcard,
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexKind::Ascending => "1",
            IndexKind::Descending => "-1",
            IndexKind::Text => "text",
            IndexKind::Hashed => "hashed",
            IndexKind::Geo2D => "2d",
            IndexKind::Geo2DSphere => "2dsphere",
            IndexKind::Wildcard => "1",
        })
    }
}

/// One indexed field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexKey {
    pub field: String,
    pub kind: IndexKind,
}

impl IndexKey {
    pub fn new(field: impl Into<String>, kind: IndexKind) -> Self {
        Self { field: field.into(), kind }
    }

    /// The indexed path; wildcard keys cover every subpath of `field`.
    pub fn path(&self) -> String {
        match self.kind {
            IndexKind::Wildcard if self.field.is_empty() => "$**".to_string(),
            IndexKind::Wildcard => format!("{}.$**", self.field),
            _ => self.field.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// Overrides the conventional `field_kind` name.
    pub name: Option<String>,
    /// Rejects writes that would give two documents the same key.
    pub unique: bool,
    /// Skips documents that lack the indexed fields, so a unique index
    /// tolerates any number of them.
    pub sparse: bool,
}

impl IndexOptions {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub keys: Vec<IndexKey>,
    pub options: IndexOptions,
}

impl IndexDescriptor {
    pub fn new(keys: Vec<IndexKey>, options: IndexOptions) -> Self {
        Self { keys, options }
    }

    /// Same kind over every field, in order.
    pub fn uniform<I, S>(fields: I, kind: IndexKind, options: IndexOptions) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            fields.into_iter().map(|f| IndexKey::new(f, kind)).collect(),
            options,
        )
    }

    /// The explicit name, or the generated one.
    pub fn name(&self) -> String {
        self.options.name.clone().unwrap_or_else(|| {
            self.keys
                .iter()
                .map(|key| format!("{}_{}", key.path(), key.kind))
                .collect::<Vec<_>>()
                .join("_")
        })
    }
}
