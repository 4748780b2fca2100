//! Partial update definitions.
//!
//! An [`UpdateDoc`] is an ordered list of field operators applied to every
//! matched document. Backends either translate it into native update syntax
//! or apply it in place with [`UpdateDoc::apply`].
//!
//! ```ignore
//! use docrepo::update::UpdateDoc;
//!
//! let update = UpdateDoc::new()
//!     .set("status", "shipped")
//!     .inc("version", 1)
//!     .push("history", "shipped");
//! ```

use bson::{Bson, Document};

use crate::error::{DocumentStoreError, DocumentStoreResult};

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// Sets the field, creating it if missing.
    Set(String, Bson),
    /// Removes the field.
    Unset(String),
    /// Adds a number to the field; a missing field counts as zero.
    Inc(String, Bson),
    /// Appends to an array field, creating it if missing.
    Push(String, Bson),
    /// Removes every array element equal to the value.
    Pull(String, Bson),
}

impl UpdateOp {
    pub fn field(&self) -> &str {
        match self {
            UpdateOp::Set(f, _)
            | UpdateOp::Unset(f)
            | UpdateOp::Inc(f, _)
            | UpdateOp::Push(f, _)
            | UpdateOp::Pull(f, _) => f,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateDoc {
    ops: Vec<UpdateOp>,
}

impl UpdateDoc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Set(field.into(), value.into()));
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset(field.into()));
        self
    }

    pub fn inc(mut self, field: impl Into<String>, by: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Inc(field.into(), by.into()));
        self
    }

    pub fn push(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Push(field.into(), value.into()));
        self
    }

    pub fn pull(mut self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.ops.push(UpdateOp::Pull(field.into(), value.into()));
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Applies every operator to `doc` in order.
    ///
    /// Dotted field names address nested documents. Intermediate documents
    /// are created for `Set`, `Inc` and `Push`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidDocument`] when an operator meets
    /// a value of the wrong type, e.g. `Inc` on a string.
    pub fn apply(&self, doc: &mut Document) -> DocumentStoreResult<()> {
        for op in &self.ops {
            match op {
                UpdateOp::Set(field, value) => {
                    let (parent, leaf) = parent_mut(doc, field, true)?;
                    if let Some(parent) = parent {
                        parent.insert(leaf, value.clone());
                    }
                }
                UpdateOp::Unset(field) => {
                    if let (Some(parent), leaf) = parent_mut(doc, field, false)? {
                        parent.remove(leaf);
                    }
                }
                UpdateOp::Inc(field, by) => {
                    let (parent, leaf) = parent_mut(doc, field, true)?;
                    if let Some(parent) = parent {
                        let current = parent.get(leaf).cloned().unwrap_or(Bson::Int32(0));
                        parent.insert(leaf, add_numbers(field, &current, by)?);
                    }
                }
                UpdateOp::Push(field, value) => {
                    let (parent, leaf) = parent_mut(doc, field, true)?;
                    if let Some(parent) = parent {
                        match parent.get_mut(leaf) {
                            Some(Bson::Array(items)) => items.push(value.clone()),
                            Some(_) => {
                                return Err(DocumentStoreError::InvalidDocument(format!(
                                    "cannot push to non-array field {field}"
                                )));
                            }
                            None => {
                                parent.insert(leaf, Bson::Array(vec![value.clone()]));
                            }
                        }
                    }
                }
                UpdateOp::Pull(field, value) => {
                    if let (Some(parent), leaf) = parent_mut(doc, field, false)? {
                        if let Some(Bson::Array(items)) = parent.get_mut(leaf) {
                            items.retain(|item| item != value);
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Resolves the document holding the last segment of a dotted path.
fn parent_mut<'d, 'f>(
    doc: &'d mut Document,
    path: &'f str,
    create: bool,
) -> DocumentStoreResult<(Option<&'d mut Document>, &'f str)> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or(path);
    let mut current = doc;

    for segment in segments {
        if !current.contains_key(segment) {
            if !create {
                return Ok((None, leaf));
            }
            current.insert(segment, Document::new());
        }

        current = match current.get_mut(segment) {
            Some(Bson::Document(inner)) => inner,
            Some(_) => {
                return Err(DocumentStoreError::InvalidDocument(format!(
                    "field {segment} of {path} is not a document"
                )));
            }
            None => return Ok((None, leaf)),
        };
    }

    Ok((Some(current), leaf))
}

/// Adds `by` to `current`. Int32 sums that overflow widen to Int64, and an
/// Int64 overflow is an error.
fn add_numbers(field: &str, current: &Bson, by: &Bson) -> DocumentStoreResult<Bson> {
    let add_wide = |a: i64, b: i64| {
        a.checked_add(b).map(Bson::Int64).ok_or_else(|| {
            DocumentStoreError::InvalidDocument(format!("incrementing {field} overflows a 64-bit integer"))
        })
    };

    match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => match a.checked_add(*b) {
            Some(sum) => Ok(Bson::Int32(sum)),
            None => add_wide(i64::from(*a), i64::from(*b)),
        },
        (Bson::Int32(a), Bson::Int64(b)) => add_wide(i64::from(*a), *b),
        (Bson::Int64(a), Bson::Int32(b)) => add_wide(*a, i64::from(*b)),
        (Bson::Int64(a), Bson::Int64(b)) => add_wide(*a, *b),
        (Bson::Double(a), Bson::Double(b)) => Ok(Bson::Double(a + b)),
        (Bson::Double(a), Bson::Int32(b)) => Ok(Bson::Double(a + f64::from(*b))),
        (Bson::Double(a), Bson::Int64(b)) => Ok(Bson::Double(a + *b as f64)),
        (Bson::Int32(a), Bson::Double(b)) => Ok(Bson::Double(f64::from(*a) + b)),
        (Bson::Int64(a), Bson::Double(b)) => Ok(Bson::Double(*a as f64 + b)),
        _ => Err(DocumentStoreError::InvalidDocument(format!(
            "cannot increment non-numeric field {field}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn applies_operators_in_order() {
        let mut doc = doc! { "name": "a", "count": 1, "tags": ["x", "y", "x"] };

        UpdateDoc::new()
            .set("name", "b")
            .inc("count", 2)
            .pull("tags", "x")
            .push("tags", "z")
            .unset("missing")
            .apply(&mut doc)
            .unwrap();

        assert_eq!(doc, doc! { "name": "b", "count": 3, "tags": ["y", "z"] });
    }

    #[test]
    fn dotted_paths_create_intermediate_documents() {
        let mut doc = doc! {};

        UpdateDoc::new()
            .set("address.city", "Oslo")
            .inc("stats.visits", 1)
            .apply(&mut doc)
            .unwrap();

        assert_eq!(doc, doc! { "address": { "city": "Oslo" }, "stats": { "visits": 1 } });
    }

    #[test]
    fn inc_widens_int32_overflow() {
        let mut doc = doc! { "age": i32::MAX, "small": 1 };

        UpdateDoc::new().inc("age", 1).inc("small", 1).apply(&mut doc).unwrap();

        assert_eq!(doc.get("age"), Some(&Bson::Int64(i64::from(i32::MAX) + 1)));
        assert_eq!(doc.get("small"), Some(&Bson::Int32(2)));
    }

    #[test]
    fn inc_rejects_int64_overflow() {
        let mut doc = doc! { "total": i64::MAX };

        assert!(matches!(
            UpdateDoc::new().inc("total", 1).apply(&mut doc),
            Err(DocumentStoreError::InvalidDocument(_))
        ));
        assert!(matches!(
            UpdateDoc::new().inc("total", -1_i64).apply(&mut doc),
            Ok(())
        ));
    }

    #[test]
    fn inc_rejects_strings() {
        let mut doc = doc! { "count": "one" };

        assert!(matches!(
            UpdateDoc::new().inc("count", 1).apply(&mut doc),
            Err(DocumentStoreError::InvalidDocument(_))
        ));
    }
}
