//! Contracts implemented by the protocol bindings
//!
//! A binding provides a [ProtocolClientFactory] to consume Things through an URI scheme and/or a
//! [ProtocolServer] to expose the Things hosted by a [Servient]. Payloads only cross these
//! interfaces as [Content].

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    content::Content,
    credentials::Credentials,
    discovery::ThingFilter,
    exposed::ExposedThing,
    servient::Servient,
    thing::{Form, SecurityScheme, Thing},
    BoxError,
};

/// Errors raised by a protocol client
#[derive(Debug, thiserror::Error)]
pub enum ProtocolClientError {
    #[error("{0} is not supported by this protocol client")]
    Unsupported(&'static str),

    #[error("Transport failure on {href}: {source}")]
    Transport {
        href: String,
        #[source]
        source: BoxError,
    },
}

impl ProtocolClientError {
    pub fn transport(href: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            href: href.into(),
            source: source.into(),
        }
    }
}

/// Errors raised by a protocol server
#[derive(Debug, thiserror::Error)]
pub enum ProtocolServerError {
    #[error("The protocol server has not been started")]
    NotStarted,

    #[error("Protocol server failure: {0}")]
    Transport(#[source] BoxError),
}

pub type ContentStream = BoxStream<'static, Result<Content, ProtocolClientError>>;
pub type ThingStream = BoxStream<'static, Result<Thing, ProtocolClientError>>;

/// The client side of a protocol binding
///
/// Every operation receives a form whose href has already been made absolute and whose URI
/// template expressions have been expanded.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Configure the authentication of the next requests
    ///
    /// Returns `false` when the client does not understand the schemes.
    fn set_security(&self, schemes: &[SecurityScheme], credentials: Option<&Credentials>) -> bool;

    async fn read_resource(&self, form: &Form) -> Result<Content, ProtocolClientError>;

    async fn write_resource(
        &self,
        form: &Form,
        content: Content,
    ) -> Result<Option<Content>, ProtocolClientError>;

    async fn invoke_resource(
        &self,
        form: &Form,
        content: Option<Content>,
    ) -> Result<Content, ProtocolClientError>;

    /// An infinite stream of notifications, call it again to restart after the end
    async fn observe_resource(&self, form: &Form) -> Result<ContentStream, ProtocolClientError>;

    async fn discover(&self, _filter: &ThingFilter) -> Result<ThingStream, ProtocolClientError> {
        Err(ProtocolClientError::Unsupported("discovery"))
    }

    async fn start(&self) -> Result<(), ProtocolClientError> {
        Ok(())
    }

    async fn stop(&self) -> Result<(), ProtocolClientError> {
        Ok(())
    }
}

/// Provider of the [ProtocolClient]s of an URI scheme
#[async_trait]
pub trait ProtocolClientFactory: Send + Sync {
    /// The lower-case URI scheme served by the clients, e.g. `http`
    fn scheme(&self) -> &str;

    /// A client, either fresh or shared
    fn client(&self) -> Arc<dyn ProtocolClient>;

    /// Called once when the servient starts
    async fn init(&self) -> Result<(), ProtocolClientError> {
        Ok(())
    }

    /// Called once when the servient shuts down
    async fn destroy(&self) -> Result<(), ProtocolClientError> {
        Ok(())
    }
}

/// The server side of a protocol binding
///
/// `expose` and `destroy` must fail with [ProtocolServerError::NotStarted] before `start`.
#[async_trait]
pub trait ProtocolServer: Send + Sync {
    async fn start(&self, servient: &Servient) -> Result<(), ProtocolServerError>;

    async fn stop(&self) -> Result<(), ProtocolServerError>;

    async fn expose(&self, thing: Arc<ExposedThing>) -> Result<(), ProtocolServerError>;

    /// Stop serving the Thing with the given id, returning whether it was served
    async fn destroy(&self, thing_id: &str) -> Result<bool, ProtocolServerError>;
}
