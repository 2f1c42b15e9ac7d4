// Subscription registry, handler dispatch and wire protocol

mod dispatch;
pub mod protocol;
mod registry;
mod scope;

pub use dispatch::{handler, Handler, HandlerFuture};
pub use protocol::{ControlFrame, DataFrame, InboundFrame, Payload};
pub use registry::{SubscribeOptions, SubscriptionHandle, SubscriptionId, SubscriptionRegistry};
pub use scope::Scope;
