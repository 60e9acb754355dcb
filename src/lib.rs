/// Process configuration loading (file + environment).
pub mod config;
/// Simulated device: state record, range policies, per-scope registry.
pub mod device;
/// Command routing table and the built-in device handlers.
pub mod dispatcher;
/// Crate-local error types: broker receive path and wire frames.
pub mod error;
/// Logging setup (formatting, filters, sinks).
pub mod logging;
/// Broker TCP server: frames, connections, shutdown, banner.
pub mod network;
/// Command/response wire format and topic naming.
pub mod protocol;
/// In-process Pub/Sub: Broker, Subscription, Message.
pub mod pubsub;
/// Responder: command queue, worker, response publishing.
pub mod responder;
/// Commander side: session channel, response buffer, typed commands.
pub mod session;
/// Periodic telemetry publishing.
pub mod streaming;
/// Publish/subscribe transport abstraction (in-memory and TCP).
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Configuration.
pub use config::Settings;
/// Device model.
pub use device::{DeviceRegistry, DeviceScope, DeviceState, RangePolicy, Rgb};
/// Dispatcher.
pub use dispatcher::{Dispatcher, HandlerRegistry};
/// Receive and frame errors.
pub use error::{FrameError, RecvError, TryRecvError};
/// Wire format.
pub use protocol::{Command, CommandType, Payload, Response, COMMAND_TOPIC, RESPONSE_PATTERN};
/// Pub/Sub API.
pub use pubsub::{AnySubscription, Broker, Message, PatternSubscription, Subscription};
/// Responder.
pub use responder::{Responder, ResponderConfig, ResponderStats};
/// Commander side.
pub use session::{Commander, OverflowPolicy, ResponseBuffer, SessionChannel, SessionConfig};
/// Streaming.
pub use streaming::{StartOutcome, StreamingConfig, StreamingController};
/// Transports.
pub use transport::{
    ConnectionState, MemoryTransport, MessageHandler, SubscriptionId, TcpTransport,
    TcpTransportConfig, Transport,
};
