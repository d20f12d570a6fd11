/// Document store abstraction and its backends.
pub mod document_store;
/// Persisted session document models.
pub mod models;
/// Session-level operations over the document store.
pub mod session;
/// Storage error types shared by every backend.
pub mod storage;
