pub mod config;
pub mod context_hub;
pub mod queue;

pub use config::DispatchConfig;
pub use context_hub::ContextHub;
pub use queue::{DispatchQueue, Tier};
