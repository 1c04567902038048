pub mod auth;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod document;
pub mod errors;
pub mod logger;
pub mod query;
pub mod realtime;
pub mod service;
pub mod store;

pub use crate::catalog::{Catalog, CollectionOptions, CollectionRecord};
pub use crate::document::Document;
pub use crate::errors::{DbError, Result};
pub use crate::query::{ParsedQuery, QueryExecutor, parse_query};
pub use crate::service::{Backend, BackendStatistics, QueryRequest, QueryResult};
