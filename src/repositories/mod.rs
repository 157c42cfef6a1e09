//! Data access boundaries

pub mod user;

pub use user::{PostgresUserStore, UserStore, hash_password};
