//! Locally hosted Things
//!
//! An [ExposedThing] wraps a [Thing] with the live state of each affordance: the current value
//! and the optional handlers of every property, the handler of every action and a notification
//! channel for every property and event.
//!
//! Notifications use bounded broadcast channels: a subscriber that falls behind by more than the
//! channel capacity loses the oldest notifications, and subscribers never receive what was sent
//! before they subscribed.

use std::{
    any::Any,
    collections::HashMap,
    fmt,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{Arc, RwLock},
};

use futures::{
    future::{join_all, BoxFuture},
    stream::BoxStream,
    FutureExt, StreamExt,
};
use serde_json::Value;
use tokio::sync::{broadcast, Mutex};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, warn};

use crate::{
    form::InteractionOptions,
    thing::{AffordanceType, Thing},
    BoxError,
};

pub type PropertyReadHandler =
    Arc<dyn Fn() -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
pub type PropertyWriteHandler =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
pub type ActionHandler = Arc<
    dyn Fn(Value, InteractionOptions) -> BoxFuture<'static, Result<Option<Value>, BoxError>>
        + Send
        + Sync,
>;

/// Errors raised by the interactions with an [ExposedThing]
#[derive(Debug, thiserror::Error)]
pub enum ExposedThingError {
    #[error("Thing \"{thing}\" has no {ty} named \"{name}\"")]
    UnknownAffordance {
        thing: String,
        ty: AffordanceType,
        name: String,
    },

    #[error("Handler failed: {0}")]
    Handler(#[source] BoxError),

    #[error("Handler panicked: {0}")]
    HandlerPanicked(String),
}

#[derive(Default, Clone)]
struct PropertyHandlers {
    read: Option<PropertyReadHandler>,
    write: Option<PropertyWriteHandler>,
}

struct PropertyState {
    value: Mutex<Value>,
    handlers: RwLock<PropertyHandlers>,
    sender: broadcast::Sender<Value>,
}

impl PropertyState {
    fn new(initial: Value, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            value: Mutex::new(initial),
            handlers: RwLock::new(PropertyHandlers::default()),
            sender,
        }
    }

    fn handlers(&self) -> PropertyHandlers {
        self.handlers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    async fn read(&self) -> Result<Value, ExposedThingError> {
        match self.handlers().read {
            Some(handler) => {
                let value = run_handler(|| handler()).await?;
                *self.value.lock().await = value.clone();
                Ok(value)
            }
            None => Ok(self.value.lock().await.clone()),
        }
    }

    /// Store the new value, notifying the subscribers only when it changed
    async fn write(&self, value: Value) -> Result<Value, ExposedThingError> {
        let value = match self.handlers().write {
            Some(handler) => run_handler(|| handler(value)).await?,
            None => value,
        };

        let mut current = self.value.lock().await;
        if *current != value {
            *current = value.clone();
            // No subscribers is not an error
            let _ = self.sender.send(value.clone());
        }

        Ok(value)
    }
}

struct ActionState {
    handler: RwLock<Option<ActionHandler>>,
}

struct EventState {
    sender: broadcast::Sender<Value>,
}

/// A [Thing] hosted by the servient
pub struct ExposedThing {
    thing: Thing,
    properties: HashMap<String, PropertyState>,
    actions: HashMap<String, ActionState>,
    events: HashMap<String, EventState>,
}

impl fmt::Debug for ExposedThing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposedThing")
            .field("id", &self.thing.id)
            .field("properties", &self.properties.keys())
            .field("actions", &self.actions.keys())
            .field("events", &self.events.keys())
            .finish()
    }
}

impl ExposedThing {
    pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

    #[inline]
    pub fn new(thing: Thing) -> Self {
        Self::with_channel_capacity(thing, Self::DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create the state of every affordance
    ///
    /// Each property starts with its schema `const`, else its `default`, else `null`.
    /// `capacity` bounds the notifications buffered for a slow subscriber, it is at least 1.
    pub fn with_channel_capacity(thing: Thing, capacity: usize) -> Self {
        let capacity = capacity.max(1);

        let properties = thing
            .properties
            .iter()
            .map(|(name, property)| {
                let state = PropertyState::new(property.data_schema.initial_value(), capacity);
                (name.clone(), state)
            })
            .collect();

        let actions = thing
            .actions
            .keys()
            .map(|name| {
                let state = ActionState {
                    handler: RwLock::new(None),
                };
                (name.clone(), state)
            })
            .collect();

        let events = thing
            .events
            .keys()
            .map(|name| {
                let (sender, _) = broadcast::channel(capacity);
                (name.clone(), EventState { sender })
            })
            .collect();

        Self {
            thing,
            properties,
            actions,
            events,
        }
    }

    #[inline]
    pub fn thing(&self) -> &Thing {
        &self.thing
    }

    #[inline]
    pub fn id(&self) -> &str {
        &self.thing.id
    }

    fn unknown(&self, ty: AffordanceType, name: &str) -> ExposedThingError {
        ExposedThingError::UnknownAffordance {
            thing: self.thing.id.clone(),
            ty,
            name: name.to_owned(),
        }
    }

    fn property(&self, name: &str) -> Result<&PropertyState, ExposedThingError> {
        self.properties
            .get(name)
            .ok_or_else(|| self.unknown(AffordanceType::Property, name))
    }

    fn action(&self, name: &str) -> Result<&ActionState, ExposedThingError> {
        self.actions
            .get(name)
            .ok_or_else(|| self.unknown(AffordanceType::Action, name))
    }

    fn event(&self, name: &str) -> Result<&EventState, ExposedThingError> {
        self.events
            .get(name)
            .ok_or_else(|| self.unknown(AffordanceType::Event, name))
    }

    /// Serve the reads of `name` with `handler`, its result becomes the stored value
    pub fn set_property_read_handler<F, Fut>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<(), ExposedThingError>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let handler: PropertyReadHandler = Arc::new(move || handler().boxed());
        self.property(name)?
            .handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .read = Some(handler);
        Ok(())
    }

    /// Serve the writes of `name` with `handler`, its result becomes the stored value
    pub fn set_property_write_handler<F, Fut>(
        &self,
        name: &str,
        handler: F,
    ) -> Result<(), ExposedThingError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let handler: PropertyWriteHandler = Arc::new(move |value| handler(value).boxed());
        self.property(name)?
            .handlers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .write = Some(handler);
        Ok(())
    }

    /// Serve the invocations of `name` with `handler`
    ///
    /// A handler returning `Ok(None)` completes the invocation with `null`.
    pub fn set_action_handler<F, Fut>(&self, name: &str, handler: F) -> Result<(), ExposedThingError>
    where
        F: Fn(Value, InteractionOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Value>, BoxError>> + Send + 'static,
    {
        let handler: ActionHandler =
            Arc::new(move |input, options| handler(input, options).boxed());
        *self
            .action(name)?
            .handler
            .write()
            .unwrap_or_else(|p| p.into_inner()) = Some(handler);
        Ok(())
    }

    pub async fn read_property(&self, name: &str) -> Result<Value, ExposedThingError> {
        self.property(name)?.read().await
    }

    /// Write `value`, returning the value actually stored
    pub async fn write_property(
        &self,
        name: &str,
        value: Value,
    ) -> Result<Value, ExposedThingError> {
        self.property(name)?.write(value).await
    }

    /// Read every property concurrently
    pub async fn read_all_properties(&self) -> HashMap<String, Result<Value, ExposedThingError>> {
        let reads = self.properties.iter().map(|(name, state)| async move {
            (name.clone(), state.read().await)
        });

        join_all(reads).await.into_iter().collect()
    }

    /// Read the named properties concurrently
    ///
    /// Unknown names are reported in the result.
    pub async fn read_multiple_properties<I, S>(
        &self,
        names: I,
    ) -> HashMap<String, Result<Value, ExposedThingError>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reads = names.into_iter().map(Into::into).map(|name| async move {
            let result = self.read_property(&name).await;
            (name, result)
        });

        join_all(reads).await.into_iter().collect()
    }

    /// Write the given properties concurrently
    ///
    /// Every write runs to completion, a failure only shows up in the entry of its property.
    pub async fn write_properties(
        &self,
        values: HashMap<String, Value>,
    ) -> HashMap<String, Result<Value, ExposedThingError>> {
        let writes = values.into_iter().map(|(name, value)| async move {
            let result = self.write_property(&name, value).await;
            (name, result)
        });

        join_all(writes).await.into_iter().collect()
    }

    /// Invoke the action `name`
    ///
    /// Actions without a handler complete with `null`.
    pub async fn invoke_action(
        &self,
        name: &str,
        input: Value,
        options: InteractionOptions,
    ) -> Result<Value, ExposedThingError> {
        let handler = self
            .action(name)?
            .handler
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone();

        let Some(handler) = handler else {
            debug!(thing = %self.thing.id, "action \"{name}\" has no handler, returning null");
            return Ok(Value::Null);
        };

        match run_handler(|| handler(input, options)).await? {
            Some(output) => Ok(output),
            None => {
                warn!(
                    thing = %self.thing.id,
                    "handler of action \"{name}\" produced no result, returning null"
                );
                Ok(Value::Null)
            }
        }
    }

    /// Notify `data` to the current subscribers of `name`
    ///
    /// Returns the number of subscribers reached, zero is not an error.
    pub fn emit_event(&self, name: &str, data: Value) -> Result<usize, ExposedThingError> {
        let event = self.event(name)?;
        Ok(event.sender.send(data).unwrap_or(0))
    }

    /// The values stored into `name` from now on
    pub fn observe_property(
        &self,
        name: &str,
    ) -> Result<BoxStream<'static, Value>, ExposedThingError> {
        let receiver = self.property(name)?.sender.subscribe();
        Ok(notifications(receiver, &self.thing.id, name))
    }

    /// The data emitted by the event `name` from now on
    pub fn subscribe_event(&self, name: &str) -> Result<BoxStream<'static, Value>, ExposedThingError> {
        let receiver = self.event(name)?.sender.subscribe();
        Ok(notifications(receiver, &self.thing.id, name))
    }
}

fn notifications(
    receiver: broadcast::Receiver<Value>,
    thing: &str,
    name: &str,
) -> BoxStream<'static, Value> {
    let thing = thing.to_owned();
    let name = name.to_owned();

    BroadcastStream::new(receiver)
        .filter_map(move |item| {
            let item = match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(%thing, "subscriber of \"{name}\" lagged behind, {skipped} notifications lost");
                    None
                }
            };
            futures::future::ready(item)
        })
        .boxed()
}

/// Run a handler, turning its failures and panics into errors
async fn run_handler<T, F>(make: F) -> Result<T, ExposedThingError>
where
    F: FnOnce() -> BoxFuture<'static, Result<T, BoxError>>,
{
    let future = std::panic::catch_unwind(AssertUnwindSafe(make)).map_err(panicked)?;

    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(panicked)?
        .map_err(ExposedThingError::Handler)
}

fn panicked(payload: Box<dyn Any + Send>) -> ExposedThingError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());

    ExposedThingError::HandlerPanicked(message)
}

#[cfg(test)]
mod test {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use serde_json::json;
    use tokio::time::timeout;

    use super::*;

    fn lamp() -> ExposedThing {
        let thing = Thing::from_value(json!({
            "id": "urn:lamp",
            "properties": {
                "status": { "type": "string", "default": "off" },
                "brightness": { "type": "integer", "default": 10, "const": 50 },
                "level": { "type": "integer" },
                "broken": { "type": "string" },
            },
            "actions": {
                "toggle": {},
                "fade": { "input": { "type": "integer" } },
            },
            "events": {
                "overheating": { "data": { "type": "number" } },
            },
        }))
        .unwrap();

        ExposedThing::new(thing)
    }

    async fn next(stream: &mut BoxStream<'static, Value>) -> Value {
        timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("notification expected")
            .expect("stream ended")
    }

    #[tokio::test]
    async fn initial_values() {
        let lamp = lamp();

        assert_eq!(lamp.read_property("status").await.unwrap(), json!("off"));
        assert_eq!(lamp.read_property("brightness").await.unwrap(), json!(50));
        assert_eq!(lamp.read_property("level").await.unwrap(), Value::Null);
        assert!(matches!(
            lamp.read_property("missing").await,
            Err(ExposedThingError::UnknownAffordance {
                ty: AffordanceType::Property,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn read_handler_result_is_stored() {
        let lamp = lamp();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        lamp.set_property_read_handler("level", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, BoxError>(json!(n)) }
        })
        .unwrap();

        assert_eq!(lamp.read_property("level").await.unwrap(), json!(1));
        assert_eq!(lamp.read_property("level").await.unwrap(), json!(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        lamp.set_property_read_handler("broken", || async {
            Err(BoxError::from("sensor offline"))
        })
            .unwrap();
        assert!(matches!(
            lamp.read_property("broken").await,
            Err(ExposedThingError::Handler(err)) if err.to_string() == "sensor offline"
        ));
    }

    #[tokio::test]
    async fn writing_the_same_value_does_not_notify() {
        let lamp = lamp();
        let mut updates = lamp.observe_property("status").unwrap();

        assert_eq!(
            lamp.write_property("status", json!("off")).await.unwrap(),
            json!("off")
        );
        lamp.write_property("status", json!("on")).await.unwrap();
        lamp.write_property("status", json!("on")).await.unwrap();
        lamp.write_property("status", json!("off")).await.unwrap();

        assert_eq!(next(&mut updates).await, json!("on"));
        assert_eq!(next(&mut updates).await, json!("off"));
        assert!(timeout(Duration::from_millis(50), updates.next())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn write_handler_result_is_stored_and_notified() {
        let lamp = lamp();
        lamp.set_property_write_handler("level", |value| async move {
            match value.as_i64() {
                Some(level) => Ok(json!(level.clamp(0, 100))),
                None => Err(BoxError::from("not an integer")),
            }
        })
        .unwrap();
        let mut updates = lamp.observe_property("level").unwrap();

        assert_eq!(
            lamp.write_property("level", json!(250)).await.unwrap(),
            json!(100)
        );
        assert_eq!(next(&mut updates).await, json!(100));
        assert_eq!(lamp.read_property("level").await.unwrap(), json!(100));

        assert!(matches!(
            lamp.write_property("level", json!("high")).await,
            Err(ExposedThingError::Handler(_))
        ));
        assert_eq!(lamp.read_property("level").await.unwrap(), json!(100));
    }

    #[tokio::test]
    async fn unhandled_action_returns_null() {
        let lamp = lamp();
        assert_eq!(
            lamp.invoke_action("toggle", json!(null), InteractionOptions::default())
                .await
                .unwrap(),
            Value::Null
        );
        assert!(matches!(
            lamp.invoke_action("explode", json!(null), InteractionOptions::default())
                .await,
            Err(ExposedThingError::UnknownAffordance {
                ty: AffordanceType::Action,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn action_handlers() {
        let lamp = lamp();
        lamp.set_action_handler("fade", |input, options| async move {
            let step = options.data.and_then(|data| data.as_i64()).unwrap_or(1);
            Ok::<_, BoxError>(Some(json!(input.as_i64().unwrap_or_default() * step)))
        })
        .unwrap();
        lamp.set_action_handler("toggle", |_, _| async { Ok::<_, BoxError>(None) })
            .unwrap();

        let options = InteractionOptions::default().with_data(3);
        assert_eq!(
            lamp.invoke_action("fade", json!(7), options).await.unwrap(),
            json!(21)
        );
        assert_eq!(
            lamp.invoke_action("toggle", json!(null), InteractionOptions::default())
                .await
                .unwrap(),
            Value::Null
        );

        lamp.set_action_handler("toggle", |_, _| async { Err(BoxError::from("jammed")) })
            .unwrap();
        assert!(matches!(
            lamp.invoke_action("toggle", json!(null), InteractionOptions::default())
                .await,
            Err(ExposedThingError::Handler(_))
        ));
    }

    fn lamp_is_stuck() -> bool {
        true
    }

    #[tokio::test]
    async fn panicking_handlers_are_caught() {
        let lamp = lamp();
        lamp.set_action_handler("toggle", |_, _| async {
            if lamp_is_stuck() {
                panic!("relay stuck");
            }
            Ok::<_, BoxError>(None)
        })
        .unwrap();

        let result = lamp
            .invoke_action("toggle", json!(null), InteractionOptions::default())
            .await;
        assert!(matches!(
            result,
            Err(ExposedThingError::HandlerPanicked(message)) if message == "relay stuck"
        ));

        lamp.set_property_read_handler("level", || -> futures::future::Ready<Result<Value, BoxError>> {
            panic!("no sensor")
        })
        .unwrap();
        assert!(matches!(
            lamp.read_property("level").await,
            Err(ExposedThingError::HandlerPanicked(message)) if message == "no sensor"
        ));
    }

    #[tokio::test]
    async fn failed_writes_do_not_affect_the_others() {
        let lamp = lamp();
        lamp.set_property_write_handler("broken", |_| async {
            Err(BoxError::from("read-only hardware"))
        })
        .unwrap();

        let results = lamp
            .write_properties(HashMap::from([
                ("status".to_string(), json!("on")),
                ("broken".to_string(), json!("x")),
                ("missing".to_string(), json!(1)),
            ]))
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results["status"].as_ref().unwrap(), &json!("on"));
        assert!(matches!(results["broken"], Err(ExposedThingError::Handler(_))));
        assert!(matches!(
            results["missing"],
            Err(ExposedThingError::UnknownAffordance { .. })
        ));
        assert_eq!(lamp.read_property("status").await.unwrap(), json!("on"));
    }

    #[tokio::test]
    async fn bulk_reads() {
        let lamp = lamp();
        let all = lamp.read_all_properties().await;
        assert_eq!(all.len(), 4);
        assert_eq!(all["status"].as_ref().unwrap(), &json!("off"));

        let some = lamp.read_multiple_properties(["brightness", "missing"]).await;
        assert_eq!(some.len(), 2);
        assert_eq!(some["brightness"].as_ref().unwrap(), &json!(50));
        assert!(some["missing"].is_err());
    }

    #[tokio::test]
    async fn events_are_not_replayed() {
        let lamp = lamp();
        assert_eq!(lamp.emit_event("overheating", json!("lost")).unwrap(), 0);

        let mut early = lamp.subscribe_event("overheating").unwrap();
        assert_eq!(lamp.emit_event("overheating", json!("x")).unwrap(), 1);
        let mut late = lamp.subscribe_event("overheating").unwrap();

        assert_eq!(next(&mut early).await, json!("x"));
        assert!(timeout(Duration::from_millis(50), early.next()).await.is_err());
        assert!(timeout(Duration::from_millis(50), late.next()).await.is_err());

        assert!(matches!(
            lamp.emit_event("missing", json!(1)),
            Err(ExposedThingError::UnknownAffordance {
                ty: AffordanceType::Event,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn dropping_a_subscriber_does_not_affect_the_others() {
        let lamp = lamp();
        let first = lamp.subscribe_event("overheating").unwrap();
        let mut second = lamp.subscribe_event("overheating").unwrap();
        drop(first);

        assert_eq!(lamp.emit_event("overheating", json!(90.5)).unwrap(), 1);
        assert_eq!(next(&mut second).await, json!(90.5));
    }

    #[tokio::test]
    async fn lagging_subscribers_lose_the_oldest_notifications() {
        let thing = Thing::from_value(json!({
            "id": "urn:sensor",
            "events": { "tick": {} },
        }))
        .unwrap();
        let sensor = ExposedThing::with_channel_capacity(thing, 2);
        let mut ticks = sensor.subscribe_event("tick").unwrap();

        for i in 0..5 {
            sensor.emit_event("tick", json!(i)).unwrap();
        }

        assert_eq!(next(&mut ticks).await, json!(3));
        assert_eq!(next(&mut ticks).await, json!(4));
    }

    #[tokio::test]
    async fn destroying_the_thing_ends_the_streams() {
        let lamp = lamp();
        let mut updates = lamp.observe_property("status").unwrap();
        drop(lamp);

        assert_eq!(
            timeout(Duration::from_secs(1), updates.next()).await.unwrap(),
            None
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writes_are_serialized() {
        const WRITERS: i64 = 32;

        let lamp = Arc::new(lamp());
        lamp.set_property_write_handler("level", |value| async move {
            tokio::task::yield_now().await;
            Ok::<_, BoxError>(value)
        })
        .unwrap();
        let mut levels = lamp.observe_property("level").unwrap();
        let mut statuses = lamp.observe_property("status").unwrap();

        let writes: Vec<_> = (0..WRITERS)
            .map(|level| {
                let lamp = Arc::clone(&lamp);
                tokio::spawn(async move {
                    lamp.write_property("level", json!(level)).await.unwrap();
                    lamp.write_property("status", json!("on")).await.unwrap();
                })
            })
            .collect();
        for write in join_all(writes).await {
            write.unwrap();
        }

        let mut notified = Vec::new();
        for _ in 0..WRITERS {
            notified.push(next(&mut levels).await);
        }
        let mut sorted: Vec<_> = notified.iter().filter_map(Value::as_i64).collect();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..WRITERS).collect::<Vec<_>>());

        let committed = lamp.read_property("level").await.unwrap();
        assert_eq!(notified.last(), Some(&committed));

        assert_eq!(next(&mut statuses).await, json!("on"));
        assert!(timeout(Duration::from_millis(50), levels.next())
            .await
            .is_err());
        assert!(timeout(Duration::from_millis(50), statuses.next())
            .await
            .is_err());
    }
}
