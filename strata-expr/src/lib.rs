#![forbid(unsafe_code)]

pub mod expr;
pub use expr::*;

// Note: For API simplicity `Literal` is also exported at the crate root.
pub mod literal;
pub use literal::Literal;
