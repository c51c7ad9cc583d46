//! Message bus for decoupled communication
//!
//! Producers and the dispatcher only talk through topics on a [`Bus`]. The
//! [`Requester`] layers an awaitable request/response call on top of plain
//! publish/subscribe by matching correlation ids.

pub mod events;
pub mod pending;
pub mod queue;
pub mod request;

pub use events::{
    new_correlation_id, topics, DeliveryResponse, Envelope, SendMessageRequest,
    SendStateEventRequest,
};
pub use pending::{PendingRequests, PendingStats};
pub use queue::{Bus, BusPtr, InMemoryBus, Subscription};
pub use request::Requester;
