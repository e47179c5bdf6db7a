pub mod connection;
pub mod dataset;
pub(crate) mod helpers;
pub(crate) mod migrations;
pub mod models;
pub mod repositories;

pub use connection::Database;
pub use dataset::{MergedDataset, SourceRecord};
