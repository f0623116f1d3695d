mod analytics;
mod event;

pub use analytics::*;
pub use event::*;
