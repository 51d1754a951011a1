pub mod channel;
pub mod messages;
pub mod protocol;

pub use channel::{ControlChannel, Publish};
pub use protocol::{Event, Settings};
