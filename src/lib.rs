pub mod api;
pub mod core;
mod logging;

pub use logging::init_logging;
