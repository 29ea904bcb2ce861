//! Custom objects and their typed attributes, backed by a workspace REST API.
//!
//! [`store::EntityStore`] holds the shared object and attribute state and is
//! the only writer of it. [`custom_attributes`] has the attribute type catalog,
//! the per-type settings forms and the object form built on the store.

pub mod api;
pub mod custom_attributes;
pub mod error;
pub mod state;
pub mod store;
pub mod types;

pub use error::{ApiError, ErrorReport, StoreError};
pub use store::{EntityStore, OperationKind, StoreEvent};
