//! `cardflow-auth` — pure authorization boundary.
//!
//! This crate is intentionally decoupled from HTTP and storage: it owns the
//! static role/action permission matrix and nothing else. Token issuance and
//! verification live in whatever transport layer is in use.

pub mod actions;
pub mod actor;
pub mod matrix;
pub mod roles;

pub use actions::Action;
pub use actor::Actor;
pub use matrix::{can_access_own_resource, has_permission};
pub use roles::Role;
