pub mod classifier;
pub mod config;
pub mod controller;
pub mod event;
pub mod idle;
pub mod loop_worker;
pub mod probe;

pub use classifier::ActivityClassifier;
pub use config::ClassifierConfig;
pub use controller::SensorController;
pub use event::{ElementInfo, UserEvent};
pub use loop_worker::{PageInput, SensorSetup};
pub use probe::PageProbe;
