//! Utility functions shared by the pipeline and the CLI.
//!
//! - **URL validation**: refuses non-HTTP and internal subscription targets
//! - **Task isolation**: turns panics inside a future into errors
//! - **Text**: terminal-safe, width-aware rendering helpers

mod task;
mod text;
mod url_validator;

pub use task::catch_task_panic;
pub use text::{clean_for_terminal, display_width, truncate_to_width};
pub use url_validator::{validate_feed_url, UrlValidationError};
