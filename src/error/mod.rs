pub mod frame;
pub mod pubsub;

pub use frame::FrameError;
pub use pubsub::{RecvError, TryRecvError};
