// Change notification: registry of who listens, broadcaster that fans out,
// and the WebSocket hub the frames travel through.
mod broadcast;
mod events;
mod hub;
mod protocol;
mod registry;

pub use broadcast::{Broadcaster, MessageSink, SendError};
pub use events::{EventKind, RealtimeEvent};
pub use hub::{CLIENT_TIMEOUT, ConnectionHub, HEARTBEAT_INTERVAL, HubOptions};
pub use protocol::{ClientMessage, ControlMessage, PongReply};
pub use registry::{Subscription, SubscriptionRegistry};
