//! Streams exposed by the arbiter and devices.

mod events;
mod samples;

pub use events::DeviceEvents;
pub use samples::SampleStream;
