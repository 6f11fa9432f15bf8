//! Public API: connection handle, fluent query builder, result execution and batch mutation.

pub mod builders;
pub mod connection;
mod deadline;
pub mod execute;
pub mod filter;
pub mod iter;
pub mod mutation;
pub mod projection;
pub mod query;

pub use builders::{Outcome, OutcomeRecord, QueryBuilder};
pub use connection::Connection;
pub use execute::TOTAL_ALIAS;
pub use filter::{Filter, FilterOperator, FilterValue};
pub use iter::EntityIter;
pub use query::{
    Aggregation, AggregationResult, Cursor, Direction, EntityResult, MoreResults, Order, Query,
    QueryBatch,
};
