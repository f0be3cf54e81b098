//! Built-in job handler implementations.

pub mod email;
pub mod retention;

pub use email::SendEmailHandler;
pub use retention::RetentionSweepHandler;
