pub mod record;
pub mod schema;

pub use record::*;
pub use schema::*;
