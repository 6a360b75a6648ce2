//! Operators, exchanges, and the drivers that move pages between them.

pub mod driver;
pub mod exchange;
pub mod operators;
pub mod readiness;
