pub mod session;
pub mod signal;

pub use session::{SessionContext, SessionStatus};
pub use signal::{ActivityKind, ActivitySignal, NavigationKey, PageLocation, SELECTION_DESCRIPTION};
