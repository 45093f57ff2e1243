//! libSQL connection and migration layer shared by the server store and the
//! durable client cache.

mod connection;
mod migrations;

pub use connection::Database;
pub use migrations::{schema_version, Migration};
