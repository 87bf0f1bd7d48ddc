//! Configuration schema and persistence

mod schema;
mod store;

pub use schema::*;
pub use store::{ConfigChange, ConfigOverrides, ConfigStore};
