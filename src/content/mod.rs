//! Entry body processing.

mod sanitizer;

pub use sanitizer::sanitize;
