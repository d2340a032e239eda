/// Database model definitions.
pub mod models;
/// Session storage backends and the change feed contract.
pub mod session_store;
/// Storage abstraction layer for database operations.
pub mod storage;
