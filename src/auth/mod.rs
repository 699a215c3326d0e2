pub mod context;
pub mod keys;
pub mod validator;

pub use context::AuthContext;
pub use keys::KeyCache;
pub use validator::{AssertionValidator, Claims};
