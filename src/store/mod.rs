pub mod connection;
pub mod schema;
pub mod user_store;

pub use connection::*;
pub use schema::*;
pub use user_store::UserStore;
