//! Filter evaluation, sorting and projection over BSON documents.
//!
//! Values are compared through [`Scalar`], a borrowed view that orders mixed
//! types by a fixed type rank. Integers of either width compare exactly;
//! only a comparison against a double goes through floating point.

use std::cmp::Ordering;

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};

use docrepo_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, Projection, QueryVisitor, SortDirection, SortSpec},
};

/// Borrowed, comparable view of a BSON value.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Scalar<'a> {
    Missing,
    Int(i64),
    Float(f64),
    Text(&'a str),
    Nested(&'a Document),
    List(&'a [Bson]),
    Bytes(&'a [u8]),
    Oid(ObjectId),
    Flag(bool),
    Instant(DateTime),
    /// Values no operator can compare, such as regexes or timestamps.
    Opaque,
}

impl<'a> Scalar<'a> {
    pub(crate) fn of(value: Option<&'a Bson>) -> Self {
        let Some(value) = value else {
            return Scalar::Missing;
        };

        match value {
            Bson::Null | Bson::Undefined => Scalar::Missing,
            Bson::Int32(n) => Scalar::Int(i64::from(*n)),
            Bson::Int64(n) => Scalar::Int(*n),
            Bson::Double(n) => Scalar::Float(*n),
            Bson::String(text) => Scalar::Text(text),
            Bson::Document(inner) => Scalar::Nested(inner),
            Bson::Array(items) => Scalar::List(items),
            Bson::Binary(binary) => Scalar::Bytes(&binary.bytes),
            Bson::ObjectId(oid) => Scalar::Oid(*oid),
            Bson::Boolean(flag) => Scalar::Flag(*flag),
            Bson::DateTime(at) => Scalar::Instant(*at),
            _ => Scalar::Opaque,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Scalar::Missing => 0,
            Scalar::Int(_) | Scalar::Float(_) => 1,
            Scalar::Text(_) => 2,
            Scalar::Nested(_) => 3,
            Scalar::List(_) => 4,
            Scalar::Bytes(_) => 5,
            Scalar::Oid(_) => 6,
            Scalar::Flag(_) => 7,
            Scalar::Instant(_) => 8,
            Scalar::Opaque => 9,
        }
    }

    /// Same-type comparison; `None` across types.
    fn compare(&self, other: &Scalar<'_>) -> Option<Ordering> {
        match (self, other) {
            (Scalar::Missing, Scalar::Missing) => Some(Ordering::Equal),
            (Scalar::Int(a), Scalar::Int(b)) => Some(a.cmp(b)),
            (Scalar::Float(a), Scalar::Float(b)) => a.partial_cmp(b),
            (Scalar::Int(a), Scalar::Float(b)) => int_cmp_float(*a, *b),
            (Scalar::Float(a), Scalar::Int(b)) => int_cmp_float(*b, *a).map(Ordering::reverse),
            (Scalar::Text(a), Scalar::Text(b)) => Some(a.cmp(b)),
            (Scalar::Bytes(a), Scalar::Bytes(b)) => Some(a.cmp(b)),
            (Scalar::Oid(a), Scalar::Oid(b)) => Some(a.bytes().cmp(&b.bytes())),
            (Scalar::Flag(a), Scalar::Flag(b)) => Some(a.cmp(b)),
            (Scalar::Instant(a), Scalar::Instant(b)) => a.partial_cmp(b),
            (Scalar::List(a), Scalar::List(b)) => {
                let equal = a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| bson_eq(x, y));
                equal.then_some(Ordering::Equal)
            }
            (Scalar::Nested(a), Scalar::Nested(b)) => {
                let equal = a.len() == b.len()
                    && a.iter().all(|(key, value)| b.get(key).is_some_and(|other| bson_eq(value, other)));
                equal.then_some(Ordering::Equal)
            }
            _ => None,
        }
    }

    fn equals(&self, other: &Scalar<'_>) -> bool {
        self.compare(other) == Some(Ordering::Equal)
    }

    /// Total order for sorting: type rank first, then value.
    pub(crate) fn sort_cmp(&self, other: &Scalar<'_>) -> Ordering {
        self.type_rank()
            .cmp(&other.type_rank())
            .then_with(|| self.compare(other).unwrap_or(Ordering::Equal))
    }

    fn elements(&self) -> Option<&'a [Bson]> {
        match *self {
            Scalar::List(items) => Some(items),
            _ => None,
        }
    }

    fn lowercase(&self) -> Option<String> {
        match self {
            Scalar::Text(text) => Some(text.to_lowercase()),
            _ => None,
        }
    }
}

/// Orders an integer against a double without rounding the integer.
fn int_cmp_float(int: i64, float: f64) -> Option<Ordering> {
    const TWO_POW_63: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return None;
    }
    if float >= TWO_POW_63 {
        return Some(Ordering::Less);
    }
    if float < -TWO_POW_63 {
        return Some(Ordering::Greater);
    }

    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => 0.0_f64.partial_cmp(&(float - whole)),
        ordering => Some(ordering),
    }
}

/// Equality across numeric widths.
pub(crate) fn bson_eq(left: &Bson, right: &Bson) -> bool {
    Scalar::of(Some(left)).equals(&Scalar::of(Some(right)))
}

fn list_has(items: &[Bson], needle: &Scalar<'_>) -> bool {
    items.iter().any(|item| Scalar::of(Some(item)).equals(needle))
}

/// Resolves a dotted path inside a document.
pub(crate) fn get_path<'d>(document: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }

    Some(current)
}

/// Sets a dotted path, creating intermediate documents.
fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
        None => {
            document.insert(path, value);
        }
    }
}

/// Orders documents in place by every sort key in turn.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &SortSpec) {
    if sort.is_empty() {
        return;
    }

    documents.sort_by(|a, b| {
        sort.iter()
            .map(|key| {
                let left = Scalar::of(get_path(a, &key.field));
                let right = Scalar::of(get_path(b, &key.field));

                match key.direction {
                    SortDirection::Asc => left.sort_cmp(&right),
                    SortDirection::Desc => right.sort_cmp(&left),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    });
}

/// Keeps only the projected fields; `_id` is never included.
pub(crate) fn project_document(document: &Document, projection: &Projection) -> Document {
    let mut projected = Document::new();

    for field in &projection.fields {
        if let Some(value) = get_path(document, field) {
            set_path(&mut projected, field, value.clone());
        }
    }

    projected
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Evaluates `expr` against `document`; no filter matches everything.
    pub fn matches(document: &Document, expr: Option<&Expr>) -> DocumentStoreResult<bool> {
        match expr {
            Some(expr) => DocumentEvaluator::new(document).evaluate(expr),
            None => Ok(true),
        }
    }

    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        expr: Option<&Expr>,
    ) -> DocumentStoreResult<Vec<Document>> {
        documents
            .into_iter()
            .filter_map(|doc| match DocumentEvaluator::matches(doc, expr) {
                Ok(true) => Some(Ok(doc.clone())),
                Ok(false) => None,
                Err(err) => Some(Err(err)),
            })
            .collect()
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(get_path(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let Some(found) = get_path(self.document, field) else {
            // Missing fields only satisfy the negative operators.
            return Ok(matches!(op, FieldOp::Ne | FieldOp::NotContains | FieldOp::NoneOf));
        };
        let left = Scalar::of(Some(found));
        let right = Scalar::of(Some(value));

        let outcome = match op {
            FieldOp::Eq => match (left.elements(), right.elements()) {
                (Some(items), None) => list_has(items, &right),
                _ => left.equals(&right),
            },
            FieldOp::Ne => !left.equals(&right),
            FieldOp::Gt => left.compare(&right) == Some(Ordering::Greater),
            FieldOp::Gte => matches!(left.compare(&right), Some(Ordering::Greater | Ordering::Equal)),
            FieldOp::Lt => left.compare(&right) == Some(Ordering::Less),
            FieldOp::Lte => matches!(left.compare(&right), Some(Ordering::Less | Ordering::Equal)),
            FieldOp::Contains => contains(&left, &right),
            FieldOp::NotContains => !contains(&left, &right),
            FieldOp::StartsWith => text_test(&left, &right, |l, r| l.starts_with(r)),
            FieldOp::EndsWith => text_test(&left, &right, |l, r| l.ends_with(r)),
            FieldOp::AnyOf => any_of(&left, &right),
            FieldOp::NoneOf => !any_of(&left, &right),
        };

        Ok(outcome)
    }
}

/// Substring for text, membership for arrays; an array needle requires every element.
fn contains(left: &Scalar<'_>, right: &Scalar<'_>) -> bool {
    match (left.elements(), right.elements()) {
        (Some(items), Some(needles)) => needles.iter().all(|n| list_has(items, &Scalar::of(Some(n)))),
        (Some(items), None) => list_has(items, right),
        _ => text_test(left, right, |l, r| l.contains(r)),
    }
}

fn any_of(left: &Scalar<'_>, right: &Scalar<'_>) -> bool {
    match (left.elements(), right.elements()) {
        (Some(items), Some(candidates)) => candidates.iter().any(|c| list_has(items, &Scalar::of(Some(c)))),
        (Some(items), None) => list_has(items, right),
        (None, Some(candidates)) => list_has(candidates, left),
        (None, None) => left.equals(right),
    }
}

fn text_test(left: &Scalar<'_>, right: &Scalar<'_>, test: impl Fn(&str, &str) -> bool) -> bool {
    match (left.lowercase(), right.lowercase()) {
        (Some(l), Some(r)) => test(&l, &r),
        _ => false,
    }
}
