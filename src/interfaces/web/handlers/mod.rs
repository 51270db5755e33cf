pub mod ask;
pub mod conversations;
pub mod schema;
