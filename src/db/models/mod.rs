pub mod condition;
pub mod event;
pub mod measurement;
pub mod run;

pub use condition::Condition;
pub use event::{Event, HEARTBEAT_LABEL, STATUS_LABEL};
pub use measurement::{ChannelReadings, Measurement, QualityLabel};
pub use run::Run;
