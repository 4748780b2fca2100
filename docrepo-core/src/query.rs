//! Filter expressions, sorting and projection.
//!
//! A filter is a plain [`Expr`] tree. Repositories never interpret it
//! themselves; every backend walks it with a [`QueryVisitor`], so the same
//! expression runs in memory or translates to a store-native query.
//!
//! ```ignore
//! use docrepo::query::{Filter, Query, SortDirection};
//!
//! let adults = Query::builder()
//!     .filter(Filter::between("age", 18, 65).and(Filter::exists("email")))
//!     .sort("last_name", SortDirection::Asc)
//!     .then_sort("first_name", SortDirection::Asc)
//!     .offset(20)
//!     .limit(10)
//!     .build();
//! ```
//!
//! String operators (`starts_with`, `ends_with`, `contains`) compare
//! case-insensitively. `contains` on an array field tests membership instead.

use bson::Bson;

use crate::{document::ID_FIELD, error::DocumentStoreError, key::Key};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Smallest first; missing fields sort before present ones.
    Asc,
    /// Largest first.
    Desc,
}

impl SortDirection {
    pub fn from_ascending(ascending: bool) -> Self {
        match ascending {
            true => SortDirection::Asc,
            false => SortDirection::Desc,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// Dotted path of the field to order by.
    pub field: String,
    pub direction: SortDirection,
}

/// Sort keys in precedence order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec(pub Vec<Sort>);

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(field: impl Into<String>) -> Self {
        Self::new().then_asc(field)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::new().then_desc(field)
    }

    pub fn then_asc(self, field: impl Into<String>) -> Self {
        self.then(field, SortDirection::Asc)
    }

    pub fn then_desc(self, field: impl Into<String>) -> Self {
        self.then(field, SortDirection::Desc)
    }

    pub fn then(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.0.push(Sort { field: field.into(), direction });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sort> {
        self.0.iter()
    }
}

/// Fields to keep in query results. `_id` is always dropped.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub fields: Vec<String>,
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { fields: fields.into_iter().map(Into::into).collect() }
    }
}

/// Comparison applied by an [`Expr::Field`] predicate.
#[derive(Debug, Clone)]
pub enum FieldOp {
    /// Equal; numbers compare by value across widths.
    Eq,
    /// Not equal. Also matches documents missing the field.
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    /// Substring of a string field, or member of an array field.
    Contains,
    /// Negation of [`FieldOp::Contains`].
    NotContains,
    /// Case-insensitive prefix.
    StartsWith,
    /// Case-insensitive suffix.
    EndsWith,
    /// The field equals, or shares an element with, one of the values.
    AnyOf,
    /// Negation of [`FieldOp::AnyOf`].
    NoneOf,
}

/// A filter predicate over documents.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Matches when every operand matches. Empty matches everything.
    And(Vec<Expr>),
    /// Matches when some operand matches. Empty matches nothing.
    Or(Vec<Expr>),
    /// Matches when the operand does not.
    Not(Box<Expr>),
    /// Field presence; `false` matches missing fields.
    Exists(String, bool),
    /// Compares one field against a value.
    Field {
        /// Dotted path; `_id` addresses the store identifier.
        field: String,
        op: FieldOp,
        /// Right-hand operand. An array for the `AnyOf` family.
        value: Bson,
    },
}

impl Expr {
    pub fn field(field: String, op: FieldOp, value: Bson) -> Self {
        Expr::Field { field, op, value }
    }

    /// Conjunction; chains of `and` flatten into one list.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Disjunction; chains of `or` flatten into one list.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// True for the match-everything filter.
    pub fn is_all(&self) -> bool {
        matches!(self, Expr::And(list) if list.is_empty())
    }
}

/// Constructors for [`Expr`].
///
/// ```ignore
/// let expr = Filter::eq("name", "Alice").and(Filter::gt("age", 18));
/// ```
pub struct Filter;

macro_rules! field_filters {
    ($($(#[$meta:meta])* $name:ident => $op:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(field: impl Into<String>, value: impl Into<Bson>) -> Expr {
                Expr::field(field.into(), FieldOp::$op, value.into())
            }
        )*
    };
}

impl Filter {
    field_filters! {
        eq => Eq;
        ne => Ne;
        gt => Gt;
        gte => Gte;
        lt => Lt;
        lte => Lte;
        starts_with => StartsWith;
        ends_with => EndsWith;
        contains => Contains;
        not_contains => NotContains;
        /// `value` is usually an array; a scalar behaves like [`Filter::eq`].
        any_of => AnyOf;
        none_of => NoneOf;
    }

    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Matches when `field` equals one of `values`.
    pub fn is_in<I, V>(field: impl Into<String>, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Bson>,
    {
        let values = values.into_iter().map(Into::into).collect();

        Expr::field(field.into(), FieldOp::AnyOf, Bson::Array(values))
    }

    /// Inclusive range.
    pub fn between(field: impl Into<String>, low: impl Into<Bson>, high: impl Into<Bson>) -> Expr {
        let field = field.into();

        Filter::gte(field.clone(), low).and(Filter::lte(field, high))
    }

    /// Matches every document.
    pub fn all() -> Expr {
        Expr::And(Vec::new())
    }

    pub fn id<K: Key>(key: &K) -> Expr {
        Filter::eq(ID_FIELD, key.to_bson())
    }

    pub fn id_in<'k, K: Key>(keys: impl IntoIterator<Item = &'k K>) -> Expr {
        Filter::is_in(ID_FIELD, keys.into_iter().map(Key::to_bson))
    }
}

/// A filter plus ordering, paging and projection.
///
/// Sorting applies before `offset`, and `offset` before `limit`.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// `None` matches every document.
    pub filter: Option<Expr>,
    /// Maximum number of results.
    pub limit: Option<usize>,
    /// Number of matches to skip.
    pub offset: Option<usize>,
    /// Empty keeps the store's natural order.
    pub sort: SortSpec,
    pub projection: Option<Projection>,
}

impl Query {
    pub fn new() -> Self {
        Query::default()
    }

    pub fn filtered(filter: Expr) -> Self {
        Query { filter: Some(filter), ..Query::default() }
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Replaces any earlier sort keys with `field`.
    pub fn sort(self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort_by(SortSpec::new().then(field, direction))
    }

    pub fn then_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort = self.query.sort.then(field, direction);
        self
    }

    pub fn sort_by(mut self, sort: SortSpec) -> Self {
        self.query.sort = sort;
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.query.projection = Some(projection);
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks an [`Expr`] tree. Backends evaluate or translate filters through
/// an implementation of this trait.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error>;
    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(inner) => self.visit_not(inner),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, op, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn between_expands_to_inclusive_range() {
        let Expr::And(parts) = Filter::between("age", 18, 65) else {
            panic!("expected a conjunction");
        };

        assert!(matches!(&parts[0], Expr::Field { op: FieldOp::Gte, value: Bson::Int32(18), .. }));
        assert!(matches!(&parts[1], Expr::Field { op: FieldOp::Lte, value: Bson::Int32(65), .. }));
    }

    #[test]
    fn and_chains_flatten() {
        let expr = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));

        assert!(matches!(expr, Expr::And(ref parts) if parts.len() == 3));
        assert!(Filter::all().is_all());
        assert!(!expr.is_all());
    }

    #[test]
    fn builder_collects_secondary_sorts() {
        let query = Query::builder()
            .sort("last", SortDirection::Asc)
            .then_sort("first", SortDirection::Desc)
            .project(Projection::include(["last"]))
            .build();

        assert_eq!(query.sort, SortSpec::asc("last").then_desc("first"));
        assert_eq!(query.projection.map(|p| p.fields), Some(vec!["last".to_string()]));
    }

    #[test]
    fn id_filters_target_store_id() {
        assert!(matches!(
            Filter::id(&7i64),
            Expr::Field { ref field, value: Bson::Int64(7), .. } if field == "_id"
        ));

        let Expr::Field { op: FieldOp::AnyOf, value: Bson::Array(ids), .. } = Filter::id_in(&[1i64, 2]) else {
            panic!("expected an id membership filter");
        };
        assert_eq!(ids, vec![Bson::Int64(1), Bson::Int64(2)]);
    }
}
