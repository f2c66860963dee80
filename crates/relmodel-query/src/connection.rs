//! Row source abstraction.
//!
//! The hydration engine never speaks a wire protocol. It hands a structured
//! [`Select`] to a [`Connection`] and receives rows back. Retry, reconnect,
//! timeout and cancellation all belong to the implementor; errors returned
//! here propagate to callers unchanged.

use std::sync::Arc;

use crate::expr::Dialect;
use crate::select::Select;
use relmodel_core::{DEFAULT_DATE_FORMAT, Result, Row};

/// A source of rows for SELECT queries.
pub trait Connection {
    /// Execute a SELECT and return its rows in order.
    #[allow(clippy::result_large_err)]
    fn query(&self, select: &Select) -> Result<Vec<Row>>;

    /// SQL dialect used to render queries for this connection.
    fn dialect(&self) -> Dialect {
        Dialect::default()
    }

    /// Canonical stored date format (chrono `strftime` syntax).
    fn date_format(&self) -> &str {
        DEFAULT_DATE_FORMAT
    }
}

impl<C: Connection + ?Sized> Connection for &C {
    fn query(&self, select: &Select) -> Result<Vec<Row>> {
        (**self).query(select)
    }

    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn date_format(&self) -> &str {
        (**self).date_format()
    }
}

impl<C: Connection + ?Sized> Connection for Arc<C> {
    fn query(&self, select: &Select) -> Result<Vec<Row>> {
        (**self).query(select)
    }

    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn date_format(&self) -> &str {
        (**self).date_format()
    }
}
