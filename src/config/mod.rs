//! Bridge configuration

mod loader;
pub mod schema;

pub use schema::*;
