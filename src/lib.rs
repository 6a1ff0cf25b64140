// Public API for integration tests and potential library usage

pub mod error;
pub mod protocol;
pub mod render;
pub mod state;
pub mod sweep;
pub mod timer;
pub mod types;
pub mod ws;
