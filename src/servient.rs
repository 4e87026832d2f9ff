//! The process-wide host of protocol bindings and Things
//!
//! A [Servient] owns the registered [ProtocolServer]s and [ProtocolClientFactory]s, the
//! [CredentialStore], the [ContentManager] and the Things it hosts. Servers read the hosted Things
//! through the servient passed to [ProtocolServer::start].
//!
//! ```
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use wot_servient::{
//!     builder::{BuildableDataSchema, BuildableHumanReadableInfo},
//!     servient::{Servient, ServientConfig},
//!     Thing,
//! };
//!
//! let config = ServientConfig::from_json(r#"{ "channel_capacity": 16 }"#).unwrap();
//! let servient = Arc::new(Servient::new(config));
//!
//! let thing = Thing::builder("urn:lamp")
//!     .title("Lamp")
//!     .property("status", |p| p.schema(|s| s.string().default_value(json!("off"))))
//!     .build()
//!     .unwrap();
//!
//! let lamp = servient.produce(thing).unwrap();
//! assert_eq!(lamp.id(), "urn:lamp");
//! assert!(servient.thing("urn:lamp").is_some());
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, RwLock},
};

use futures::{
    future::{self, join_all},
    stream::{self, BoxStream},
    StreamExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    consumed::ConsumedThing,
    content::{ContentCodecError, ContentManager, APPLICATION_TD_JSON},
    credentials::{resolve_credentials, CredentialStore, Credentials, CredentialsError},
    discovery::{DiscoveryMethod, ThingFilter},
    exposed::ExposedThing,
    form::scheme_of,
    protocol::{ProtocolClientError, ProtocolClientFactory, ProtocolServer, ProtocolServerError},
    thing::{Form, SecurityScheme, Thing, ThingError},
};

/// Errors raised by the [Servient]
#[derive(Debug, thiserror::Error)]
pub enum ServientError {
    #[error("Unknown Thing \"{0}\"")]
    UnknownThing(String),

    #[error("A Thing with id \"{0}\" already exists")]
    DuplicateThing(String),

    #[error("The servient has already been started")]
    AlreadyStarted,

    #[error("Invalid servient configuration: {0}")]
    Config(#[source] serde_json::Error),

    #[error("Protocol server failure: {0}")]
    Server(#[source] ProtocolServerError),

    #[error("Protocol client failure for scheme \"{scheme}\": {source}")]
    Client {
        scheme: String,
        #[source]
        source: ProtocolClientError,
    },

    #[error("{}", join_errors(.0))]
    Multiple(Vec<ServientError>),

    #[error("No protocol client registered for scheme \"{0}\"")]
    NoClientForScheme(String),

    #[error("\"{0}\" is not an absolute URL")]
    InvalidUrl(String),

    #[error("The protocol client refused the credentials for \"{0}\"")]
    SecurityDeclined(String),

    #[error("Unable to decode the description fetched from \"{url}\": {source}")]
    Content {
        url: String,
        #[source]
        source: ContentCodecError,
    },

    #[error("Invalid Thing Description fetched from \"{url}\": {source}")]
    Thing {
        url: String,
        #[source]
        source: ThingError,
    },
}

fn join_errors(errors: &[ServientError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Turn the failures of a fan-out into a single result
fn aggregate(mut errors: Vec<ServientError>) -> Result<(), ServientError> {
    match errors.len() {
        0 => Ok(()),
        1 => Err(errors.remove(0)),
        _ => Err(ServientError::Multiple(errors)),
    }
}

const fn default_channel_capacity() -> usize {
    ExposedThing::DEFAULT_CHANNEL_CAPACITY
}

/// Servient settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServientConfig {
    /// Credentials keyed by URI prefix or Thing id
    #[serde(default)]
    pub credentials: CredentialStore,

    /// Notifications buffered for each subscriber of a property or an event
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for ServientConfig {
    fn default() -> Self {
        Self {
            credentials: CredentialStore::default(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl ServientConfig {
    pub fn from_json(raw: &str) -> Result<Self, ServientError> {
        serde_json::from_str(raw).map_err(ServientError::Config)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ServientState {
    #[default]
    Created,
    Started,
    Stopped,
}

pub struct Servient {
    servers: RwLock<Vec<Arc<dyn ProtocolServer>>>,
    client_factories: RwLock<HashMap<String, Arc<dyn ProtocolClientFactory>>>,
    things: RwLock<HashMap<String, Arc<ExposedThing>>>,
    credentials: RwLock<CredentialStore>,
    content_manager: ContentManager,
    channel_capacity: usize,
    state: RwLock<ServientState>,
}

impl fmt::Debug for Servient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes = self.client_schemes();
        schemes.sort();
        let mut things: Vec<_> = self
            .things
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        things.sort();

        f.debug_struct("Servient")
            .field("state", &self.state())
            .field("servers", &self.servers().len())
            .field("client_schemes", &schemes)
            .field("things", &things)
            .field("content_manager", &self.content_manager)
            .finish()
    }
}

impl Default for Servient {
    fn default() -> Self {
        Self::new(ServientConfig::default())
    }
}

impl Servient {
    pub fn new(config: ServientConfig) -> Self {
        Self {
            servers: RwLock::new(Vec::new()),
            client_factories: RwLock::new(HashMap::new()),
            things: RwLock::new(HashMap::new()),
            credentials: RwLock::new(config.credentials),
            content_manager: ContentManager::new(),
            channel_capacity: config.channel_capacity.max(1),
            state: RwLock::new(ServientState::Created),
        }
    }

    pub fn state(&self) -> ServientState {
        *self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: ServientState) {
        *self.state.write().unwrap_or_else(|p| p.into_inner()) = state;
    }

    #[inline]
    pub fn content_manager(&self) -> &ContentManager {
        &self.content_manager
    }

    pub fn add_server<S>(&self, server: S)
    where
        S: ProtocolServer + 'static,
    {
        self.servers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .push(Arc::new(server));
    }

    pub fn servers(&self) -> Vec<Arc<dyn ProtocolServer>> {
        self.servers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    /// Register `factory` for its scheme, returning the factory it replaces
    pub fn add_client_factory<F>(&self, factory: F) -> Option<Arc<dyn ProtocolClientFactory>>
    where
        F: ProtocolClientFactory + 'static,
    {
        let scheme = factory.scheme().to_ascii_lowercase();
        debug!("registering protocol client factory for \"{scheme}\"");
        self.client_factories
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(scheme, Arc::new(factory))
    }

    pub fn client_factory(&self, scheme: &str) -> Option<Arc<dyn ProtocolClientFactory>> {
        self.client_factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&scheme.to_ascii_lowercase())
            .cloned()
    }

    #[inline]
    pub fn has_client_for(&self, scheme: &str) -> bool {
        self.client_factory(scheme).is_some()
    }

    pub fn client_schemes(&self) -> Vec<String> {
        self.client_factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    fn factories(&self) -> Vec<Arc<dyn ProtocolClientFactory>> {
        self.client_factories
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// The credentials stored under `key`, an URI prefix or a Thing id
    pub fn credentials(&self, key: &str) -> Option<Credentials> {
        self.credentials
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .cloned()
    }

    pub fn add_credentials(
        &self,
        key: impl Into<String>,
        credentials: Credentials,
    ) -> Option<Credentials> {
        self.credentials
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(key, credentials)
    }

    /// See [resolve_credentials]
    pub fn resolve_credentials(
        &self,
        schemes: &[SecurityScheme],
        href: &str,
        thing_id: Option<&str>,
    ) -> Result<Option<Credentials>, CredentialsError> {
        let store = self.credentials.read().unwrap_or_else(|p| p.into_inner());
        resolve_credentials(schemes, &store, href, thing_id)
    }

    /// Start every server and initialize every client factory
    ///
    /// Every server and factory is attempted, their failures are returned together. The
    /// servient is considered started even when some of them failed, so that [Servient::shutdown]
    /// reaches the others.
    pub async fn start(&self) -> Result<(), ServientError> {
        {
            let mut state = self.state.write().unwrap_or_else(|p| p.into_inner());
            if *state == ServientState::Started {
                return Err(ServientError::AlreadyStarted);
            }
            *state = ServientState::Started;
        }

        let servers = self.servers();
        let factories = self.factories();
        info!(
            servers = servers.len(),
            clients = factories.len(),
            "starting servient"
        );

        let (server_results, factory_results) = future::join(
            join_all(servers.iter().map(|server| server.start(self))),
            join_all(factories.iter().map(|factory| factory.init())),
        )
        .await;

        let errors = collect_errors(&factories, server_results, factory_results);
        if !errors.is_empty() {
            warn!("{} bindings failed to start", errors.len());
        }
        aggregate(errors)
    }

    /// Stop every server and destroy every client factory
    ///
    /// Every server and factory is attempted, their failures are returned together.
    pub async fn shutdown(&self) -> Result<(), ServientError> {
        let servers = self.servers();
        let factories = self.factories();
        info!("shutting down servient");

        let (server_results, factory_results) = future::join(
            join_all(servers.iter().map(|server| server.stop())),
            join_all(factories.iter().map(|factory| factory.destroy())),
        )
        .await;
        self.set_state(ServientState::Stopped);

        let errors = collect_errors(&factories, server_results, factory_results);
        if !errors.is_empty() {
            warn!("{} bindings failed to stop", errors.len());
        }
        aggregate(errors)
    }

    /// Host `thing`, returning `false` if a Thing with the same id is already hosted
    ///
    /// An existing Thing is never replaced.
    pub fn add_thing(&self, thing: Arc<ExposedThing>) -> bool {
        let mut things = self.things.write().unwrap_or_else(|p| p.into_inner());
        if things.contains_key(thing.id()) {
            return false;
        }

        debug!(thing = thing.id(), "adding thing");
        things.insert(thing.id().to_owned(), thing);
        true
    }

    /// Wrap `thing` into an [ExposedThing] and host it
    pub fn produce(&self, thing: Thing) -> Result<Arc<ExposedThing>, ServientError> {
        let exposed = Arc::new(ExposedThing::with_channel_capacity(
            thing,
            self.channel_capacity,
        ));

        if self.add_thing(exposed.clone()) {
            Ok(exposed)
        } else {
            Err(ServientError::DuplicateThing(exposed.id().to_owned()))
        }
    }

    pub fn consume(self: &Arc<Self>, thing: Thing) -> ConsumedThing {
        ConsumedThing::new(self.clone(), thing)
    }

    pub fn things(&self) -> Vec<Arc<ExposedThing>> {
        self.things
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub fn thing(&self, id: &str) -> Option<Arc<ExposedThing>> {
        self.things
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(id)
            .cloned()
    }

    /// Expose the hosted Thing `id` through every server
    pub async fn expose(&self, id: &str) -> Result<(), ServientError> {
        let thing = self
            .thing(id)
            .ok_or_else(|| ServientError::UnknownThing(id.to_owned()))?;

        let servers = self.servers();
        info!(thing = id, servers = servers.len(), "exposing thing");
        let results = join_all(servers.iter().map(|server| server.expose(thing.clone()))).await;

        aggregate(
            results
                .into_iter()
                .filter_map(Result::err)
                .map(ServientError::Server)
                .collect(),
        )
    }

    /// Stop serving the Thing `id` on every server and stop hosting it
    pub async fn destroy(&self, id: &str) -> Result<(), ServientError> {
        if self.thing(id).is_none() {
            return Err(ServientError::UnknownThing(id.to_owned()));
        }

        let servers = self.servers();
        info!(thing = id, "destroying thing");
        let results = join_all(servers.iter().map(|server| server.destroy(id))).await;
        self.things
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(id);

        aggregate(
            results
                .into_iter()
                .filter_map(Result::err)
                .map(ServientError::Server)
                .collect(),
        )
    }

    /// Read the JSON document at `url` through the client of its scheme
    async fn fetch_value(&self, url: &str) -> Result<Value, ServientError> {
        let scheme = scheme_of(url)
            .ok_or_else(|| ServientError::InvalidUrl(url.to_owned()))?
            .to_ascii_lowercase();
        let factory = self
            .client_factory(&scheme)
            .ok_or_else(|| ServientError::NoClientForScheme(scheme.clone()))?;

        let client = factory.client();
        let credentials = self
            .credentials
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .find_for_href(url)
            .cloned();
        if !client.set_security(&[], credentials.as_ref()) {
            return Err(ServientError::SecurityDeclined(url.to_owned()));
        }

        let form = Form {
            content_type: Some(APPLICATION_TD_JSON.to_owned()),
            ..Form::new(url)
        };
        debug!("fetching {url}");
        let content = client
            .read_resource(&form)
            .await
            .map_err(|source| ServientError::Client { scheme, source })?;

        self.content_manager
            .content_to_value(&content, APPLICATION_TD_JSON, None)
            .map_err(|source| ServientError::Content {
                url: url.to_owned(),
                source,
            })
    }

    /// Fetch the Thing Description at `url`
    pub async fn fetch(&self, url: &str) -> Result<Thing, ServientError> {
        let value = self.fetch_value(url).await?;
        Thing::from_value(value).map_err(|source| ServientError::Thing {
            url: url.to_owned(),
            source,
        })
    }

    /// Fetch the Thing Descriptions listed by the directory at `url`
    ///
    /// The directory answers with an array of descriptions or with an object mapping ids to
    /// descriptions.
    pub async fn fetch_directory(&self, url: &str) -> Result<Vec<Thing>, ServientError> {
        let descriptions = match self.fetch_value(url).await? {
            Value::Object(map) => map.into_iter().map(|(_, td)| td).collect(),
            other => serde_json::from_value::<Vec<Value>>(other).map_err(|source| {
                ServientError::Thing {
                    url: url.to_owned(),
                    source: ThingError::Decode(source),
                }
            })?,
        };

        descriptions
            .into_iter()
            .map(|td| {
                Thing::from_value(td).map_err(|source| ServientError::Thing {
                    url: url.to_owned(),
                    source,
                })
            })
            .collect()
    }

    /// Look for the Things accepted by `filter`
    ///
    /// [DiscoveryMethod::Any] yields the hosted Things first, then the Things of the directory
    /// at [ThingFilter::url] if any, then the Things discovered by every protocol client. Clients
    /// without discovery support are skipped.
    pub fn discover(
        self: &Arc<Self>,
        filter: ThingFilter,
    ) -> BoxStream<'static, Result<Thing, ServientError>> {
        let mut sources: Vec<BoxStream<'static, Result<Thing, ServientError>>> = Vec::new();

        if matches!(filter.method, DiscoveryMethod::Any | DiscoveryMethod::Local) {
            let local: Vec<_> = self
                .things()
                .into_iter()
                .map(|exposed| Ok(exposed.thing().clone()))
                .collect();
            sources.push(stream::iter(local).boxed());
        }

        match (&filter.method, &filter.url) {
            (DiscoveryMethod::Any | DiscoveryMethod::Directory, Some(url)) => {
                let servient = self.clone();
                let url = url.clone();
                let directory = stream::once(async move { servient.fetch_directory(&url).await })
                    .flat_map(|result| match result {
                        Ok(things) => stream::iter(things.into_iter().map(Ok)).boxed(),
                        Err(err) => stream::iter([Err(err)]).boxed(),
                    });
                sources.push(directory.boxed());
            }
            (DiscoveryMethod::Directory, None) => {
                sources.push(stream::iter([Err(ServientError::InvalidUrl(String::new()))]).boxed());
            }
            _ => {}
        }

        if filter.method == DiscoveryMethod::Any {
            for factory in self.factories() {
                let scheme = factory.scheme().to_owned();
                let client_filter = filter.clone();
                let discovered = stream::once(async move {
                    factory.client().discover(&client_filter).await
                })
                .flat_map(move |result| match result {
                    Ok(things) => {
                        let scheme = scheme.clone();
                        things
                            .map(move |thing| {
                                thing.map_err(|source| ServientError::Client {
                                    scheme: scheme.clone(),
                                    source,
                                })
                            })
                            .boxed()
                    }
                    Err(ProtocolClientError::Unsupported(_)) => {
                        debug!("protocol client for \"{scheme}\" cannot discover");
                        stream::empty().boxed()
                    }
                    Err(source) => stream::iter([Err(ServientError::Client {
                        scheme: scheme.clone(),
                        source,
                    })])
                    .boxed(),
                });
                sources.push(discovered.boxed());
            }
        }

        stream::iter(sources)
            .flatten()
            .filter(move |result| {
                let accepted = result.as_ref().map_or(true, |thing| filter.accepts(thing));
                future::ready(accepted)
            })
            .boxed()
    }
}

fn collect_errors(
    factories: &[Arc<dyn ProtocolClientFactory>],
    server_results: Vec<Result<(), ProtocolServerError>>,
    factory_results: Vec<Result<(), ProtocolClientError>>,
) -> Vec<ServientError> {
    let servers = server_results
        .into_iter()
        .filter_map(Result::err)
        .map(ServientError::Server);

    let clients = factories
        .iter()
        .zip(factory_results)
        .filter_map(|(factory, result)| {
            result.err().map(|source| ServientError::Client {
                scheme: factory.scheme().to_owned(),
                source,
            })
        });

    servers.chain(clients).collect()
}
