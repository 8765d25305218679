//! Fact data capability.
//!
//! The compiler never talks to a warehouse directly. Branch aggregation asks
//! a [`FactSource`] for fact rows grouped at join-key grain and does the
//! hierarchy join itself. Warehouse connectors implement this trait outside
//! the crate; [`InMemoryFactSource`] backs tests and local runs.

mod error;
mod memory;
mod retry;

pub use error::{ConnectorError, ConnectorErrorKind};
pub use memory::{FactValue, InMemoryFactSource};
pub use retry::RetryPolicy;

use serde::Serialize;

use crate::predicate::Predicate;

/// Result type for connector calls.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// A grouped-aggregate request against the fact source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRequest {
    /// Columns to group by, in output order.
    pub keys: Vec<String>,
    pub predicate: Option<Predicate>,
    /// Columns to sum, in output order.
    pub measures: Vec<String>,
}

/// One grouped row returned for a [`FactRequest`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FactRow {
    /// Values for `FactRequest::keys`, position-paired. `None` is NULL.
    pub keys: Vec<Option<String>>,
    /// Sums for `FactRequest::measures`, position-paired. `None` is NULL.
    pub measures: Vec<Option<f64>>,
}

/// Read-only access to fact data.
///
/// Calls may block. Implementations classify failures through
/// [`ConnectorErrorKind`] so callers know which ones to retry.
pub trait FactSource: Send + Sync {
    /// Column names available in the fact data.
    fn schema(&self) -> ConnectorResult<Vec<String>>;

    /// Sum `measures` grouped by `keys` over rows satisfying `predicate`.
    fn aggregate(&self, request: &FactRequest) -> ConnectorResult<Vec<FactRow>>;
}
