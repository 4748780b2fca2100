//! Collection name resolution.
//!
//! An entity's collection name is its explicit override when one is declared
//! (see [`Entity::collection_name`]), otherwise the type's base name run through
//! the resolver's [`NamingConvention`]. Names are memoized per type for the
//! lifetime of the resolver, so changing the convention only affects types
//! that have not been resolved yet.
//!
//! ```ignore
//! use docrepo::naming::{CollectionNameResolver, NamingConvention};
//!
//! CollectionNameResolver::set_default_convention(NamingConvention::PluralLowerCase);
//! let name = CollectionNameResolver::global().resolve::<OrderLine>()?; // "orderlines"
//! ```

use std::any::{TypeId, type_name};

use dashmap::DashMap;
use heck::{ToLowerCamelCase, ToUpperCamelCase};
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::{
    document::Entity,
    error::{DocumentStoreError, DocumentStoreResult},
};

static GLOBAL_RESOLVER: Lazy<CollectionNameResolver> = Lazy::new(CollectionNameResolver::default);

const UNCOUNTABLE: &[&str] = &[
    "data", "equipment", "fish", "information", "metadata", "news", "series", "sheep", "species",
];

const IRREGULAR: &[(&str, &str)] = &[
    ("child", "children"),
    ("foot", "feet"),
    ("goose", "geese"),
    ("man", "men"),
    ("mouse", "mice"),
    ("ox", "oxen"),
    ("person", "people"),
    ("tooth", "teeth"),
    ("woman", "women"),
];

const F_TO_VES: &[&str] = &["calf", "half", "leaf", "loaf", "self", "shelf", "thief", "wolf"];

const FE_TO_VES: &[&str] = &["knife", "life", "wife"];

/// Strategy for deriving a collection name from a type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NamingConvention {
    /// `OrderLine` becomes `orderLines`.
    #[default]
    PluralCamelCase,
    /// `OrderLine` becomes `orderlines`.
    PluralLowerCase,
    /// `OrderLine` becomes `orderLine`.
    SingularCamelCase,
    /// `OrderLine` becomes `orderline`.
    SingularLowerCase,
}

impl NamingConvention {
    /// Applies the convention to a bare type name.
    pub fn apply(&self, base: &str) -> String {
        match self {
            NamingConvention::PluralCamelCase => map_last_word(base, pluralize).to_lower_camel_case(),
            NamingConvention::PluralLowerCase => map_last_word(base, pluralize).to_lowercase(),
            NamingConvention::SingularCamelCase => map_last_word(base, singularize).to_lower_camel_case(),
            NamingConvention::SingularLowerCase => map_last_word(base, singularize).to_lowercase(),
        }
    }
}

/// Maps entity types to collection names, caching each result.
#[derive(Debug, Default)]
pub struct CollectionNameResolver {
    convention: RwLock<NamingConvention>,
    cache: DashMap<TypeId, String>,
}

impl CollectionNameResolver {
    pub fn new(convention: NamingConvention) -> Self {
        Self {
            convention: RwLock::new(convention),
            cache: DashMap::new(),
        }
    }

    /// The process-wide resolver used by [`DocumentContext`](crate::context::DocumentContext).
    pub fn global() -> &'static CollectionNameResolver {
        &GLOBAL_RESOLVER
    }

    /// Replaces the convention of the process-wide resolver.
    pub fn set_default_convention(convention: NamingConvention) {
        Self::global().set_convention(convention);
    }

    pub fn default_convention() -> NamingConvention {
        Self::global().convention()
    }

    pub fn convention(&self) -> NamingConvention {
        *self.convention.read()
    }

    pub fn set_convention(&self, convention: NamingConvention) {
        *self.convention.write() = convention;
    }

    /// Resolves the collection name for `E`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidCollectionName`] if `E` declares a
    /// blank override.
    pub fn resolve<E: Entity>(&self) -> DocumentStoreResult<String> {
        if let Some(name) = self.cache.get(&TypeId::of::<E>()) {
            return Ok(name.clone());
        }

        let name = match E::collection_name() {
            Some(name) if name.trim().is_empty() => {
                return Err(DocumentStoreError::InvalidCollectionName(
                    type_name::<E>().to_string(),
                ));
            }
            Some(name) => name.to_string(),
            None => self.convention().apply(base_type_name(type_name::<E>())),
        };

        // First writer wins when two tasks resolve the same type concurrently.
        Ok(self
            .cache
            .entry(TypeId::of::<E>())
            .or_insert(name)
            .clone())
    }
}

/// Strips the module path and generic arguments from a type name.
fn base_type_name(full: &str) -> &str {
    let without_generics = full.split('<').next().unwrap_or(full);

    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// Applies `f` to the last PascalCase word of `name`.
fn map_last_word(name: &str, f: fn(&str) -> String) -> String {
    let split = name
        .char_indices()
        .filter(|(_, c)| c.is_uppercase())
        .map(|(i, _)| i)
        .last()
        .unwrap_or(0);
    let (head, last) = name.split_at(split);

    format!("{head}{}", f(last))
}

fn with_case_of(template: &str, word: &str) -> String {
    match template.chars().next() {
        Some(first) if first.is_uppercase() => word.to_upper_camel_case(),
        _ => word.to_string(),
    }
}

fn pluralize(word: &str) -> String {
    let lower = word.to_lowercase();

    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return with_case_of(word, plural);
    }
    if F_TO_VES.contains(&lower.as_str()) {
        return format!("{}ves", &word[..word.len() - 1]);
    }
    if FE_TO_VES.iter().any(|s| lower.ends_with(s)) {
        return format!("{}ves", &word[..word.len() - 2]);
    }
    if ["s", "x", "z", "ch", "sh"].iter().any(|s| lower.ends_with(s)) {
        return format!("{word}es");
    }
    if lower.ends_with('y') && !lower[..lower.len() - 1].ends_with(['a', 'e', 'i', 'o', 'u']) {
        return format!("{}ies", &word[..word.len() - 1]);
    }

    format!("{word}s")
}

fn singularize(word: &str) -> String {
    let lower = word.to_lowercase();

    if lower.is_empty() || UNCOUNTABLE.contains(&lower.as_str()) {
        return word.to_string();
    }
    if let Some((singular, _)) = IRREGULAR.iter().find(|(_, plural)| *plural == lower) {
        return with_case_of(word, singular);
    }
    if IRREGULAR.iter().any(|(singular, _)| *singular == lower) {
        return word.to_string();
    }
    if FE_TO_VES.iter().any(|s| lower.ends_with(&format!("{}ves", &s[..s.len() - 2]))) {
        return format!("{}fe", &word[..word.len() - 3]);
    }
    if lower.ends_with("ves") && F_TO_VES.iter().any(|s| format!("{}ves", &s[..s.len() - 1]) == lower) {
        return format!("{}f", &word[..word.len() - 3]);
    }
    if lower.ends_with("ies") && lower.len() > 3 {
        return format!("{}y", &word[..word.len() - 3]);
    }
    if ["sses", "xes", "zes", "ches", "shes", "tuses"].iter().any(|s| lower.ends_with(s)) {
        return word[..word.len() - 2].to_string();
    }
    if ["ss", "us", "is"].iter().any(|s| lower.ends_with(s)) {
        return word.to_string();
    }
    if let Some(stripped) = word.strip_suffix(['s', 'S']) {
        return stripped.to_string();
    }

    word.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct OrderLine {
        id: i64,
    }

    impl Entity for OrderLine {
        type Key = i64;

        fn id(&self) -> &i64 {
            &self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = id;
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Person {
        id: String,
    }

    impl Entity for Person {
        type Key = String;

        fn id(&self) -> &String {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn collection_name() -> Option<&'static str> {
            Some("crew")
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Blank {
        id: String,
    }

    impl Entity for Blank {
        type Key = String;

        fn id(&self) -> &String {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn collection_name() -> Option<&'static str> {
            Some("   ")
        }
    }

    #[test]
    fn conventions_transform_last_word() {
        assert_eq!(NamingConvention::PluralCamelCase.apply("OrderLine"), "orderLines");
        assert_eq!(NamingConvention::PluralLowerCase.apply("OrderLine"), "orderlines");
        assert_eq!(NamingConvention::SingularCamelCase.apply("OrderLines"), "orderLine");
        assert_eq!(NamingConvention::SingularLowerCase.apply("OrderLine"), "orderline");
        assert_eq!(NamingConvention::PluralCamelCase.apply("SalesPerson"), "salesPeople");
        assert_eq!(NamingConvention::SingularCamelCase.apply("HTTPRequests"), "httpRequest");
    }

    #[test]
    fn pluralization_rules() {
        assert_eq!(pluralize("Person"), "People");
        assert_eq!(pluralize("Category"), "Categories");
        assert_eq!(pluralize("Key"), "Keys");
        assert_eq!(pluralize("Address"), "Addresses");
        assert_eq!(pluralize("Box"), "Boxes");
        assert_eq!(pluralize("Knife"), "Knives");
        assert_eq!(pluralize("Shelf"), "Shelves");
        assert_eq!(pluralize("Series"), "Series");
    }

    #[test]
    fn singularization_rules() {
        assert_eq!(singularize("People"), "Person");
        assert_eq!(singularize("Categories"), "Category");
        assert_eq!(singularize("Addresses"), "Address");
        assert_eq!(singularize("Address"), "Address");
        assert_eq!(singularize("Status"), "Status");
        assert_eq!(singularize("Knives"), "Knife");
        assert_eq!(singularize("Shelves"), "Shelf");
        assert_eq!(singularize("Order"), "Order");
    }

    #[test]
    fn base_name_strips_path_and_generics() {
        assert_eq!(base_type_name("app::model::OrderLine"), "OrderLine");
        assert_eq!(base_type_name("app::Envelope<app::Order>"), "Envelope");
        assert_eq!(base_type_name("Order"), "Order");
    }

    #[test]
    fn override_wins_over_convention() {
        let resolver = CollectionNameResolver::new(NamingConvention::PluralLowerCase);

        assert_eq!(resolver.resolve::<Person>().unwrap(), "crew");
    }

    #[test]
    fn blank_override_is_rejected() {
        let resolver = CollectionNameResolver::default();

        assert!(matches!(
            resolver.resolve::<Blank>(),
            Err(DocumentStoreError::InvalidCollectionName(_))
        ));
    }

    #[test]
    fn cached_names_survive_convention_change() {
        let resolver = CollectionNameResolver::default();
        let first = resolver.resolve::<OrderLine>().unwrap();

        resolver.set_convention(NamingConvention::SingularLowerCase);

        assert_eq!(first, "orderLines");
        assert_eq!(resolver.resolve::<OrderLine>().unwrap(), first);
    }
}
