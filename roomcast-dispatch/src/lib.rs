//! Delivery side of roomcast
//!
//! Serves send requests from the bus: resolves the sending identity,
//! bootstraps encryption where needed, picks the send path and answers every
//! request with a response envelope.

pub mod crypto;
pub mod identity;
pub mod intent;
pub mod loopback;
pub mod policy;
pub mod service;

pub use crypto::EncryptionBootstrapper;
pub use identity::IdentityResolver;
pub use intent::{DeliveryIntent, IntentError, IntentProvider, IntentProviderPtr, IntentPtr};
pub use loopback::{IntentCall, LoopbackProvider};
pub use policy::{choose_path, message_subtype, should_encrypt, SendPath};
pub use service::{DispatchError, DispatchHandle, DispatchService};
