pub mod ledger;
pub mod models;
pub mod queries;
pub mod sqlite;

pub use sqlite::Database;
