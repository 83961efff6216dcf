// Push-transport plumbing: the transport command/notification interface,
// the channel registry and the event dispatcher.

pub mod debug_sink;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod transport;

pub use debug_sink::{debug_sink, DebugSink, RawEvent};
pub use dispatcher::{DispatchOutcome, EventDispatcher, Handler, HandlerError, Handlers};
pub use error::NetError;
pub use registry::{ChannelRegistry, Routed, Subscription, SubscriptionState};
pub use transport::{
    spawn_loopback, LoopbackHub, TransportCommand, TransportHandle, TransportNotification,
};
