pub mod errors;
pub mod relation;
pub mod schema;
pub mod value;
