//! Transport module
//!
//! UDP ingestion of mocopi skeleton data:
//! - binary packet codec
//! - per-endpoint receiver running on its own thread
//! - registry sharing one receiver between every consumer of an endpoint
//! - handoff buffers between the receive thread and the update tick

pub mod handoff;
pub mod packet;
pub mod receiver;
pub mod registry;

pub use handoff::{HandoffMode, Staging};
pub use receiver::{ReceiverStats, TransportReceiver};
pub use registry::{ReceiverRegistry, SubscriptionId};

use std::sync::Arc;

use crate::error::TransportError;
use crate::skeleton::{FrameEvent, SkeletonDefinition};

/// Consumer callbacks invoked by a [`TransportReceiver`].
///
/// These run on the receive thread, concurrently with the update tick.
/// Implementations must only stage the data (see [`Staging`]); no file I/O,
/// no timers, no calls back into the receiver or registry.
pub trait SkeletonSink: Send + Sync {
    fn on_definition(&self, definition: Arc<SkeletonDefinition>);

    fn on_frame(&self, frame: FrameEvent);

    fn on_receive_error(&self, _error: &TransportError) {}
}
