// Submodules for separation of concerns: parse validates and structures the
// DSL, sql renders it to bound predicates, exec runs it against the store.
mod exec;
mod parse;
mod sql;
mod types;

pub use exec::QueryExecutor;
pub use parse::{parse_patch, parse_query, parse_where};
pub use sql::{SqlParam, bind_value, render_limit, render_order_by, render_predicates};
pub use types::{
    BulkAction, BulkOpResult, BulkOperation, BulkSummary, DeleteReport, MAX_LIMIT, Order,
    ParsedQuery, QueryCondition, QueryOp, UpdateReport,
};
