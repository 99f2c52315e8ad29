pub mod config;
pub mod detector;
pub mod title;

pub use config::StabilityConfig;
pub use detector::{AbandonReason, Navigation, NavigationDetector, WindowOutcome};
