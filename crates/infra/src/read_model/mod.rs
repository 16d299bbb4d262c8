//! Disposable read models. Events are the source of truth; everything here
//! can be dropped and rebuilt from the store.

pub mod store;

pub use store::{InMemoryReadModelStore, ReadModelStore};
