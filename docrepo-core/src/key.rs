//! Primary-key kinds and identity generation.
//!
//! Every entity key implements [`Key`]. Built-in implementations cover the
//! integer widths, strings, UUIDs and store-native object ids. A key type
//! that reports no [`KeyKind`] can still be used, but callers must supply
//! its values themselves: generation fails with
//! [`DocumentStoreError::UnsupportedKeyKind`].

use std::{any::type_name, fmt::Debug};

use bson::{Bson, Uuid, oid::ObjectId};
use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// The representation of an entity identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Int16,
    Int32,
    Int64,
    String,
    Uuid,
    ObjectId,
}

/// A freshly generated identifier, tagged with its kind.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    String(String),
    Uuid(Uuid),
    ObjectId(ObjectId),
}

impl KeyValue {
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyValue::Int16(_) => KeyKind::Int16,
            KeyValue::Int32(_) => KeyKind::Int32,
            KeyValue::Int64(_) => KeyKind::Int64,
            KeyValue::String(_) => KeyKind::String,
            KeyValue::Uuid(_) => KeyKind::Uuid,
            KeyValue::ObjectId(_) => KeyKind::ObjectId,
        }
    }
}

/// Produces a new identifier of the given kind.
///
/// Integers are drawn uniformly from `[1, MAX)` so they never collide with
/// the unset value `0`. Strings are hyphenated random UUIDs.
pub fn generate_new_id(kind: KeyKind) -> KeyValue {
    let mut rng = rand::thread_rng();

    match kind {
        KeyKind::Int16 => KeyValue::Int16(rng.gen_range(1..i16::MAX)),
        KeyKind::Int32 => KeyValue::Int32(rng.gen_range(1..i32::MAX)),
        KeyKind::Int64 => KeyValue::Int64(rng.gen_range(1..i64::MAX)),
        KeyKind::String => KeyValue::String(uuid::Uuid::new_v4().to_string()),
        KeyKind::Uuid => KeyValue::Uuid(Uuid::new()),
        KeyKind::ObjectId => KeyValue::ObjectId(ObjectId::new()),
    }
}

/// An entity identifier.
///
/// # Example
///
/// ```ignore
/// use docrepo::key::Key;
///
/// let id = i64::generate()?;
/// assert!(!id.is_unset());
/// ```
pub trait Key: Serialize + DeserializeOwned + Clone + PartialEq + Debug + Send + Sync + 'static {
    /// The kind used for generation, or `None` when this type cannot be generated.
    fn kind() -> Option<KeyKind> {
        None
    }

    /// Extracts a value of this type from a generated identifier.
    fn from_key_value(_value: KeyValue) -> Option<Self> {
        None
    }

    /// Returns true when this is the type's default "no id yet" value.
    fn is_unset(&self) -> bool;

    /// Converts the key into the value stored in the `_id` field.
    fn to_bson(&self) -> Bson;

    /// Generates a new identifier for this key type.
    fn generate() -> DocumentStoreResult<Self> {
        Self::kind()
            .map(generate_new_id)
            .and_then(Self::from_key_value)
            .ok_or_else(|| DocumentStoreError::UnsupportedKeyKind(type_name::<Self>().to_string()))
    }
}

macro_rules! impl_integer_key {
    ($ty:ty, $kind:ident, $bson:ident, $wide:ty) => {
        impl Key for $ty {
            fn kind() -> Option<KeyKind> {
                Some(KeyKind::$kind)
            }

            fn from_key_value(value: KeyValue) -> Option<Self> {
                match value {
                    KeyValue::$kind(v) => Some(v),
                    _ => None,
                }
            }

            fn is_unset(&self) -> bool {
                *self == 0
            }

            fn to_bson(&self) -> Bson {
                Bson::$bson(<$wide>::from(*self))
            }
        }
    };
}

impl_integer_key!(i16, Int16, Int32, i32);
impl_integer_key!(i32, Int32, Int32, i32);
impl_integer_key!(i64, Int64, Int64, i64);

impl Key for String {
    fn kind() -> Option<KeyKind> {
        Some(KeyKind::String)
    }

    fn from_key_value(value: KeyValue) -> Option<Self> {
        match value {
            KeyValue::String(v) => Some(v),
            _ => None,
        }
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }

    fn to_bson(&self) -> Bson {
        Bson::String(self.clone())
    }
}

impl Key for Uuid {
    fn kind() -> Option<KeyKind> {
        Some(KeyKind::Uuid)
    }

    fn from_key_value(value: KeyValue) -> Option<Self> {
        match value {
            KeyValue::Uuid(v) => Some(v),
            _ => None,
        }
    }

    fn is_unset(&self) -> bool {
        self.bytes() == [0u8; 16]
    }

    fn to_bson(&self) -> Bson {
        Bson::from(*self)
    }
}

impl Key for ObjectId {
    fn kind() -> Option<KeyKind> {
        Some(KeyKind::ObjectId)
    }

    fn from_key_value(value: KeyValue) -> Option<Self> {
        match value {
            KeyValue::ObjectId(v) => Some(v),
            _ => None,
        }
    }

    fn is_unset(&self) -> bool {
        self.bytes() == [0u8; 12]
    }

    fn to_bson(&self) -> Bson {
        Bson::ObjectId(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sku(String);

    impl Key for Sku {
        fn is_unset(&self) -> bool {
            self.0.is_empty()
        }

        fn to_bson(&self) -> Bson {
            Bson::String(self.0.clone())
        }
    }

    fn any_kind() -> impl Strategy<Value = KeyKind> {
        prop::sample::select(vec![
            KeyKind::Int16,
            KeyKind::Int32,
            KeyKind::Int64,
            KeyKind::String,
            KeyKind::Uuid,
            KeyKind::ObjectId,
        ])
    }

    fn is_unset(value: &KeyValue) -> bool {
        match value {
            KeyValue::Int16(v) => v.is_unset(),
            KeyValue::Int32(v) => v.is_unset(),
            KeyValue::Int64(v) => v.is_unset(),
            KeyValue::String(v) => v.is_unset(),
            KeyValue::Uuid(v) => v.is_unset(),
            KeyValue::ObjectId(v) => v.is_unset(),
        }
    }

    proptest! {
        #[test]
        fn generated_ids_match_kind_and_are_set(kind in any_kind()) {
            let value = generate_new_id(kind);

            prop_assert_eq!(value.kind(), kind);
            prop_assert!(!is_unset(&value));
            match value {
                KeyValue::Int16(v) => prop_assert!(v >= 1),
                KeyValue::Int32(v) => prop_assert!(v >= 1),
                KeyValue::Int64(v) => prop_assert!(v >= 1),
                _ => {}
            }
        }

        #[test]
        fn integer_keys_are_unset_only_at_zero(wide in any::<i64>(), narrow in any::<i16>()) {
            prop_assert_eq!(wide.is_unset(), wide == 0);
            prop_assert_eq!(narrow.is_unset(), narrow == 0);
            prop_assert_eq!(wide.to_bson(), Bson::Int64(wide));
            prop_assert_eq!(narrow.to_bson(), Bson::Int32(i32::from(narrow)));
        }
    }

    #[test]
    fn generate_returns_set_values() {
        assert!(!i16::generate().unwrap().is_unset());
        assert!(!i64::generate().unwrap().is_unset());
        assert!(!String::generate().unwrap().is_unset());
        assert!(!Uuid::generate().unwrap().is_unset());
        assert!(!ObjectId::generate().unwrap().is_unset());
    }

    #[test]
    fn generated_strings_are_hyphenated_uuids() {
        let id = String::generate().unwrap();

        assert_eq!(id.len(), 36);
        assert!(uuid::Uuid::parse_str(&id).is_ok());
    }

    #[test]
    fn custom_key_without_kind_cannot_be_generated() {
        match Sku::generate() {
            Err(DocumentStoreError::UnsupportedKeyKind(name)) => assert!(name.ends_with("Sku")),
            other => panic!("expected UnsupportedKeyKind, got {other:?}"),
        }
    }

    #[test]
    fn default_values_are_unset() {
        assert!(0i16.is_unset());
        assert!(0i32.is_unset());
        assert!(0i64.is_unset());
        assert!(String::new().is_unset());
        assert!(Uuid::from_bytes([0u8; 16]).is_unset());
        assert!(ObjectId::from_bytes([0u8; 12]).is_unset());
    }

    #[test]
    fn small_integers_are_stored_as_int32() {
        assert_eq!(7i16.to_bson(), Bson::Int32(7));
        assert_eq!(7i64.to_bson(), Bson::Int64(7));
    }
}
