//! Schema module - Configuration, layout and sample types.

mod config;
mod layout;
mod sample;
mod synthetic;

pub use config::*;
pub use layout::*;
pub use sample::*;
pub use synthetic::*;
