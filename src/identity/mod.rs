pub mod admin;
pub mod cache;
pub mod resolver;

pub use admin::AdminResolver;
pub use cache::IdentityCache;
pub use resolver::{IdentityResolver, Resolution};
