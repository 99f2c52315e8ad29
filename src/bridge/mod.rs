pub mod config;
pub mod page_probe;
pub mod protocol;
pub mod server;

pub use config::BridgeConfig;
pub use page_probe::BridgePage;
pub use protocol::{HostMessage, PageMessage};
pub use server::BrowserBridge;
