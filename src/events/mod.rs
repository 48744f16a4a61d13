//! Transport-agnostic pub/sub plumbing.
//!
//! The engine only requires `publish(type, payload)` / `listen(type,
//! subject, handler)` semantics from its messaging fabric; the registries
//! here provide both halves over a shared (type, subject) key space, and a
//! broker binding is just a channel registered on the publish side plus a
//! call into [`ReceiverRegistry::process`] on the receive side.

mod envelope;
mod pool;
mod publisher;
mod receiver;

pub use envelope::{EnvelopeError, EventEnvelope};
pub use pool::DeliveryPool;
pub use publisher::PublisherRegistry;
pub use receiver::ReceiverRegistry;
