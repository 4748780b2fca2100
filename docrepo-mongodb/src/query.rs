//! Translation from docrepo models to MongoDB syntax.
//!
//! Filters go through [`MongoQueryTranslator`]; sort keys, projections,
//! updates and index keys have plain conversion functions.

use bson::{Document, Bson, doc};

use docrepo_core::{
    query::{QueryVisitor, Expr, FieldOp, SortDirection, SortSpec, Projection},
    error::DocumentStoreError,
    document::ID_FIELD,
    index::{IndexDescriptor, IndexKind},
    update::{UpdateDoc, UpdateOp},
};


/// Translates docrepo query expressions into MongoDB query documents.
///
/// This struct implements the [`QueryVisitor`] trait to convert abstract
/// query expressions into MongoDB's native BSON query syntax. String
/// operators compile to case-insensitive regular expressions over the
/// escaped input.
pub(crate) struct MongoQueryTranslator;

impl MongoQueryTranslator {
    /// Translates an optional filter; no filter matches everything.
    pub(crate) fn translate(filter: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match filter {
            Some(expr) => MongoQueryTranslator.visit_expr(expr),
            None => Ok(doc! {}),
        }
    }

    fn visit_all(&mut self, exprs: &[Expr]) -> Result<Vec<Document>, DocumentStoreError> {
        exprs
            .iter()
            .map(|expr| self.visit_expr(expr))
            .collect()
    }
}

fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());

    for c in value.chars() {
        if "\\^$.|?*+()[]{}".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }

    escaped
}

fn regex(pattern: String) -> Document {
    doc! { "$regex": pattern, "$options": "i" }
}

impl QueryVisitor for MongoQueryTranslator {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        if exprs.is_empty() {
            return Ok(doc! {});
        }

        Ok(doc! {
            "$and": self.visit_all(exprs)?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": self.visit_all(exprs)?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: match op {
                FieldOp::Eq => doc! { "$eq": value },
                FieldOp::Ne => doc! { "$ne": value },
                FieldOp::Gt => doc! { "$gt": value },
                FieldOp::Gte => doc! { "$gte": value },
                FieldOp::Lt => doc! { "$lt": value },
                FieldOp::Lte => doc! { "$lte": value },
                FieldOp::Contains => match value {
                    Bson::String(s) => regex(format!(".*{}.*", escape_regex(s))),
                    Bson::Array(arr) => doc! { "$all": arr },
                    other => doc! { "$all": [other.clone()] },
                },
                FieldOp::NotContains => match value {
                    Bson::String(s) => doc! { "$not": regex(format!(".*{}.*", escape_regex(s))) },
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$nin": [other.clone()] },
                },
                FieldOp::StartsWith => match value {
                    Bson::String(s) => regex(format!("^{}", escape_regex(s))),
                    _ => return Err(DocumentStoreError::Backend("StartsWith operator requires a string value".to_string())),
                },
                FieldOp::EndsWith => match value {
                    Bson::String(s) => regex(format!("{}$", escape_regex(s))),
                    _ => return Err(DocumentStoreError::Backend("EndsWith operator requires a string value".to_string())),
                },
                FieldOp::AnyOf => match value {
                    Bson::Array(arr) => doc! { "$in": arr },
                    other => doc! { "$in": [other.clone()] },
                },
                FieldOp::NoneOf => match value {
                    Bson::Array(arr) => doc! { "$nin": arr },
                    other => doc! { "$nin": [other.clone()] },
                },
            }
        })
    }
}

/// Sort document; `None` when there are no sort keys.
pub(crate) fn sort_document(sort: &SortSpec) -> Option<Document> {
    if sort.is_empty() {
        return None;
    }

    Some(
        sort.iter()
            .map(|key| {
                let direction = match key.direction {
                    SortDirection::Asc => 1,
                    SortDirection::Desc => -1,
                };
                (key.field.clone(), Bson::Int32(direction))
            })
            .collect(),
    )
}

/// Inclusion projection that suppresses `_id`.
pub(crate) fn projection_document(projection: &Projection) -> Document {
    let mut document = doc! { ID_FIELD: 0 };

    for field in projection.fields.iter().filter(|field| field.as_str() != ID_FIELD) {
        document.insert(field.clone(), 1);
    }

    document
}

/// Groups update operators under their `$` keys, preserving order.
pub(crate) fn update_document(update: &UpdateDoc) -> Document {
    let mut document = Document::new();

    for op in update.ops() {
        let (operator, value) = match op {
            UpdateOp::Set(_, value) => ("$set", value.clone()),
            UpdateOp::Unset(_) => ("$unset", Bson::String(String::new())),
            UpdateOp::Inc(_, value) => ("$inc", value.clone()),
            UpdateOp::Push(_, value) => ("$push", value.clone()),
            UpdateOp::Pull(_, value) => ("$pull", value.clone()),
        };

        if !document.contains_key(operator) {
            document.insert(operator, Document::new());
        }
        if let Some(Bson::Document(fields)) = document.get_mut(operator) {
            fields.insert(op.field(), value);
        }
    }

    document
}

/// Key document of an index.
pub(crate) fn index_keys_document(index: &IndexDescriptor) -> Document {
    index
        .keys
        .iter()
        .map(|key| {
            let value = match key.kind {
                IndexKind::Ascending | IndexKind::Wildcard => Bson::Int32(1),
                IndexKind::Descending => Bson::Int32(-1),
                other => Bson::String(other.to_string()),
            };
            (key.path(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use docrepo_core::{
        index::{IndexKey, IndexOptions},
        query::Filter,
    };

    #[test]
    fn empty_and_matches_everything() {
        assert_eq!(MongoQueryTranslator::translate(Some(&Filter::all())).unwrap(), doc! {});
        assert_eq!(MongoQueryTranslator::translate(None).unwrap(), doc! {});
    }

    #[test]
    fn negation_uses_nor() {
        let translated = MongoQueryTranslator::translate(Some(&Filter::eq("a", 1).not())).unwrap();

        assert_eq!(translated, doc! { "$nor": [{ "a": { "$eq": 1 } }] });
    }

    #[test]
    fn string_operators_escape_input() {
        let translated = MongoQueryTranslator::translate(Some(&Filter::starts_with("name", "a.b"))).unwrap();

        assert_eq!(translated, doc! { "name": { "$regex": "^a\\.b", "$options": "i" } });
    }

    #[test]
    fn scalar_any_of_is_wrapped() {
        let translated = MongoQueryTranslator::translate(Some(&Filter::any_of("tag", "x"))).unwrap();

        assert_eq!(translated, doc! { "tag": { "$in": ["x"] } });
    }

    #[test]
    fn sort_keys_keep_order() {
        let sort = SortSpec::asc("b").then_desc("a");

        assert_eq!(sort_document(&sort), Some(doc! { "b": 1, "a": -1 }));
        assert_eq!(sort_document(&SortSpec::new()), None);
    }

    #[test]
    fn projection_hides_id() {
        let projection = Projection::include(["name", "_id"]);

        assert_eq!(projection_document(&projection), doc! { "_id": 0, "name": 1 });
    }

    #[test]
    fn update_groups_operators() {
        let update = UpdateDoc::new()
            .set("a", 1)
            .inc("n", 2)
            .set("b", "x")
            .unset("c");

        assert_eq!(
            update_document(&update),
            doc! {
                "$set": { "a": 1, "b": "x" },
                "$inc": { "n": 2 },
                "$unset": { "c": "" },
            }
        );
    }

    #[test]
    fn index_keys_use_native_kinds() {
        let index = IndexDescriptor::new(
            vec![
                IndexKey::new("title", IndexKind::Text),
                IndexKey::new("loc", IndexKind::Geo2DSphere),
                IndexKey::new("meta", IndexKind::Wildcard),
            ],
            IndexOptions::default(),
        );

        assert_eq!(
            index_keys_document(&index),
            doc! { "title": "text", "loc": "2dsphere", "meta.$**": 1 }
        );
    }
}
