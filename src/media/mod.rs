//! Per-call media: the fan-out feed filled by the RTP demultiplexer, the
//! recording task, and the controller that gives the interpreter its four
//! operations (speak, listen, collect DTMF, wait).

pub mod controller;
pub mod feed;
pub mod recorder;

pub use controller::{CallMedia, MediaError, MediaSession};
pub use feed::MediaFeed;
pub use recorder::Recorder;
