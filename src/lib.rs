//! xtalk - assistive phrase board
//!
//! Users build a sentence by picking phrases from categories and have it
//! spoken aloud. Most of the work is finding a speech engine on the host
//! that can actually speak the target language.

pub mod error;
pub mod platform;
pub mod speech;
pub mod state;
pub mod store;

pub use error::{Result, XtalkError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_NAME: &str = "xtalk";
