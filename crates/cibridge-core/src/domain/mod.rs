pub mod error;
pub mod log_window;
pub mod params;
pub mod record;

pub use error::{BridgeError, Result};
pub use log_window::LogWindow;
pub use params::{parameters_from_json, parse_parameter_pair};
pub use record::{Observation, TriggerId, TriggerRecord, TriggerStatus};
