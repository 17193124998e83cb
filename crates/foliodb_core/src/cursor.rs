//! Fluent query cursor.

use crate::datastore::{Datastore, FindSpec};
use crate::error::DbResult;
use crate::query::Query;
use foliodb_codec::Value;

/// A find query under construction.
///
/// Build it up with [`limit`](Self::limit), [`skip`](Self::skip),
/// [`sort`](Self::sort) and [`projection`](Self::projection), then run
/// it with [`exec`](Self::exec). Execution order is: candidate
/// selection, match, sort, skip/limit, projection.
#[derive(Debug)]
pub struct Cursor<'db> {
    db: &'db Datastore,
    query: Query,
    spec: FindSpec,
}

impl<'db> Cursor<'db> {
    pub(crate) fn new(db: &'db Datastore, query: Query) -> Self {
        Self {
            db,
            query,
            spec: FindSpec::default(),
        }
    }

    /// Keeps at most `n` results.
    #[must_use]
    pub fn limit(mut self, n: usize) -> Self {
        self.spec.limit = Some(n);
        self
    }

    /// Skips the first `n` results.
    #[must_use]
    pub fn skip(mut self, n: usize) -> Self {
        self.spec.skip = n;
        self
    }

    /// Sorts by `{field: 1 | -1, ...}`, in specification order.
    #[must_use]
    pub fn sort(mut self, spec: impl Into<Value>) -> Self {
        self.spec.sort = Some(spec.into());
        self
    }

    /// Projects the result documents.
    #[must_use]
    pub fn projection(mut self, spec: impl Into<Value>) -> Self {
        self.spec.projection = Some(spec.into());
        self
    }

    /// Runs the query and returns matching documents (deep copies).
    pub fn exec(self) -> DbResult<Vec<Value>> {
        let query = self.query;
        let spec = self.spec;
        self.db.run(false, move |inner| inner.find(&query, &spec))
    }

    /// Runs the query and returns how many documents matched.
    pub fn count(self) -> DbResult<usize> {
        Ok(self.exec()?.len())
    }
}
