//! Web of Things servient
//!
//! Host and consume Things described by
//! [Thing Descriptions](https://www.w3.org/TR/wot-thing-description/):
//! > A Thing Description describes the metadata and interfaces of Things,
//! > where a Thing is an abstraction of a physical or virtual entity that
//! > provides interactions to and participates in the Web of Things.
//!
//! The crate relies on [serde](https://docs.rs/serde) to serialize and deserialize Thing
//! Descriptions and provides an high level [builder](builder::ThingBuilder) to ensure a valid TD
//! is built.
//!
//! A [Servient](servient::Servient) hosts [ExposedThing](exposed::ExposedThing)s, whose
//! properties, actions and events are served by user handlers, and drives remote Things through
//! [ConsumedThing](consumed::ConsumedThing)s. Transports are not part of the crate: they plug in
//! through the [protocol] contracts and only exchange [Content](content::Content) envelopes.

pub mod builder;
pub mod consumed;
pub mod content;
pub mod context;
pub mod credentials;
pub mod discovery;
pub mod exposed;
pub mod form;
pub mod protocol;
pub mod servient;
pub mod thing;

pub use thing::Thing;

/// The error type accepted from handlers and transports
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
