//! Query language: matching, update modifiers, projection.

pub mod matcher;
pub mod modifier;
pub mod projection;

use crate::error::DbResult;
use foliodb_codec::Value;
use std::sync::Arc;

/// A programmatic match predicate, the `$where` of the query language.
pub type WherePredicate = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// A query: a data selector plus an optional programmatic predicate.
///
/// The selector carries every data-expressible operator. A predicate
/// closure cannot live inside a data value, so `$where` is attached
/// alongside; a document matches when the selector matches and the
/// predicate, when present, returns true.
#[derive(Clone)]
pub struct Query {
    selector: Value,
    where_pred: Option<WherePredicate>,
}

impl Query {
    /// Creates a query from a data selector.
    pub fn new(selector: Value) -> Self {
        Self {
            selector,
            where_pred: None,
        }
    }

    /// Attaches a `$where` predicate to this query.
    #[must_use]
    pub fn with_where(mut self, pred: WherePredicate) -> Self {
        self.where_pred = Some(pred);
        self
    }

    /// The data selector.
    pub fn selector(&self) -> &Value {
        &self.selector
    }

    /// Evaluates this query against a document.
    pub fn matches(&self, doc: &Value) -> DbResult<bool> {
        if !matcher::match_query(doc, &self.selector)? {
            return Ok(false);
        }
        Ok(self.where_pred.as_ref().map_or(true, |pred| pred(doc)))
    }
}

impl From<Value> for Query {
    fn from(selector: Value) -> Self {
        Self::new(selector)
    }
}

impl From<serde_json::Value> for Query {
    fn from(selector: serde_json::Value) -> Self {
        Self::new(Value::from(selector))
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("selector", &self.selector)
            .field("where_pred", &self.where_pred.is_some())
            .finish()
    }
}
