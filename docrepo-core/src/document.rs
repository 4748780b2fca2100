//! Core traits for entity representation and serialization.
//!
//! This module provides the [`Entity`] trait that every repository-managed
//! record implements, as well as utilities for converting entities to and
//! from BSON.

use bson::{Bson, Document, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    key::Key,
};

/// Name of the store-native identifier field.
pub const ID_FIELD: &str = "_id";

/// Core trait that all repository-managed records must implement.
///
/// An entity exposes exactly one identifier. The repository never looks at
/// any other field. Empty-collection handling and field naming are left to
/// serde attributes on the entity itself.
///
/// # Deriving with `#[derive(Entity)]`
///
/// ```ignore
/// use docrepo::prelude::*;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
/// #[entity(collection = "people")]
/// pub struct User {
///     #[entity(id)]
///     pub user_id: i64,
///     pub name: String,
///     #[serde(default, skip_serializing_if = "Vec::is_empty")]
///     pub tags: Vec<String>,
/// }
/// ```
///
/// # Implementing by hand
///
/// ```ignore
/// impl Entity for User {
///     type Key = i64;
///
///     fn id(&self) -> &i64 { &self.user_id }
///     fn set_id(&mut self, id: i64) { self.user_id = id; }
/// }
/// ```
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// The identifier type.
    type Key: Key;

    /// Returns a reference to this entity's identifier.
    fn id(&self) -> &Self::Key;

    /// Replaces this entity's identifier.
    fn set_id(&mut self, id: Self::Key);

    /// Explicit collection name, taking precedence over the naming convention.
    fn collection_name() -> Option<&'static str> {
        None
    }
}

/// Extension trait providing BSON conversion for entities.
///
/// This trait is automatically implemented for all types that implement [`Entity`].
pub trait EntityExt: Entity {
    /// Converts this entity to a BSON document for storage.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the entity does not
    /// serialize to a document.
    fn to_bson(&self) -> DocumentStoreResult<Bson>;

    /// Creates an entity from a stored BSON document.
    ///
    /// The store-native `_id` field is ignored.
    fn from_bson(bson: Bson) -> DocumentStoreResult<Self>;

    /// Assigns a generated identifier if the current one is unset.
    ///
    /// Returns `true` if an identifier was assigned.
    fn ensure_id(&mut self) -> DocumentStoreResult<bool>;
}

impl<E: Entity> EntityExt for E {
    fn to_bson(&self) -> DocumentStoreResult<Bson> {
        match serialize_to_bson(self)? {
            doc @ Bson::Document(_) => Ok(doc),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "expected a document, got {:?}",
                other.element_type()
            ))),
        }
    }

    fn from_bson(bson: Bson) -> DocumentStoreResult<Self> {
        Ok(deserialize_from_bson(strip_id(bson))?)
    }

    fn ensure_id(&mut self) -> DocumentStoreResult<bool> {
        if !self.id().is_unset() {
            return Ok(false);
        }

        self.set_id(E::Key::generate()?);

        Ok(true)
    }
}

/// Removes the store-native identifier from a document, if present.
pub fn strip_id(bson: Bson) -> Bson {
    match bson {
        Bson::Document(doc) => Bson::Document(
            doc.into_iter()
                .filter(|(k, _)| k != ID_FIELD)
                .collect::<Document>(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: i32,
        body: String,
    }

    impl Entity for Note {
        type Key = i32;

        fn id(&self) -> &i32 {
            &self.id
        }

        fn set_id(&mut self, id: i32) {
            self.id = id;
        }
    }

    #[test]
    fn ensure_id_assigns_only_when_unset() {
        let mut fresh = Note { id: 0, body: "a".into() };
        let mut given = Note { id: 42, body: "b".into() };

        assert!(fresh.ensure_id().unwrap());
        assert_ne!(fresh.id, 0);
        assert!(!given.ensure_id().unwrap());
        assert_eq!(given.id, 42);
    }

    #[test]
    fn from_bson_ignores_store_id() {
        let stored = Bson::Document(doc! { "_id": 9, "id": 9, "body": "x" });

        assert_eq!(
            Note::from_bson(stored).unwrap(),
            Note { id: 9, body: "x".into() }
        );
    }
}
