//! Remote Things
//!
//! A [ConsumedThing] drives the interactions described by a [Thing] through the protocol clients
//! registered in a [Servient]. For every interaction it picks the first form, in declaration
//! order, whose operations include the requested one and whose URI scheme has a registered
//! client factory. The form href is then expanded, the credentials resolved, and the payloads
//! converted through the servient [ContentManager](crate::content::ContentManager).

use std::{collections::HashMap, sync::Arc};

use futures::{future::join_all, stream::BoxStream, StreamExt};
use serde_json::Value;
use tracing::debug;

use crate::{
    content::{Content, ContentCodecError},
    credentials::CredentialsError,
    form::{AugmentedForm, InteractionOptions, UndeclaredSecurity, UriTemplateError},
    protocol::{ProtocolClient, ProtocolClientError},
    servient::Servient,
    thing::{
        AffordanceType, DataSchema, Form, FormOperation, InteractionAffordance,
        SecuritySchemeSubtype, Thing,
    },
};

/// Errors raised while interacting with a [ConsumedThing]
#[derive(Debug, thiserror::Error)]
pub enum ConsumedThingError {
    #[error("Thing \"{thing}\" has no {ty} named \"{name}\"")]
    UnknownAffordance {
        thing: String,
        ty: AffordanceType,
        name: String,
    },

    #[error("No form of {target} can be used to {operation}")]
    NoForm {
        target: String,
        operation: FormOperation,
    },

    #[error("{target} has no form at index {index}")]
    InvalidFormIndex { target: String, index: usize },

    #[error(transparent)]
    UriTemplate(#[from] UriTemplateError),

    #[error(transparent)]
    Credentials(#[from] CredentialsError),

    #[error(transparent)]
    UndeclaredSecurity(#[from] UndeclaredSecurity),

    #[error("The protocol client does not support the security scheme {scheme} of \"{href}\"")]
    SecurityDeclined { scheme: String, href: String },

    #[error("Unable to convert the payload of \"{href}\": {source}")]
    Content {
        href: String,
        #[source]
        source: ContentCodecError,
    },

    #[error("Interaction with \"{href}\" failed: {source}")]
    Protocol {
        href: String,
        #[source]
        source: ProtocolClientError,
    },
}

/// A client ready to drive an interaction through a fully resolved form
struct Dispatch {
    client: Arc<dyn ProtocolClient>,
    form: Form,
}

impl Dispatch {
    fn protocol_error(&self, source: ProtocolClientError) -> ConsumedThingError {
        ConsumedThingError::Protocol {
            href: self.form.href.clone(),
            source,
        }
    }

    /// The media type assumed for a response without one
    fn response_type(&self) -> &str {
        self.form
            .response
            .as_ref()
            .map(|response| response.content_type.as_str())
            .unwrap_or_else(|| self.form.content_type_or_default())
    }
}

/// A remote [Thing] seen through a [Servient]
#[derive(Debug, Clone)]
pub struct ConsumedThing {
    servient: Arc<Servient>,
    thing: Thing,
}

impl ConsumedThing {
    #[inline]
    pub fn new(servient: Arc<Servient>, thing: Thing) -> Self {
        Self { servient, thing }
    }

    #[inline]
    pub fn thing(&self) -> &Thing {
        &self.thing
    }

    fn interaction(
        &self,
        ty: AffordanceType,
        name: &str,
    ) -> Result<&InteractionAffordance, ConsumedThingError> {
        let interaction = match ty {
            AffordanceType::Property => self.thing.properties.get(name).map(|p| &p.interaction),
            AffordanceType::Action => self.thing.actions.get(name).map(|a| &a.interaction),
            AffordanceType::Event => self.thing.events.get(name).map(|e| &e.interaction),
        };

        interaction.ok_or_else(|| ConsumedThingError::UnknownAffordance {
            thing: self.thing.id.clone(),
            ty,
            name: name.to_owned(),
        })
    }

    /// Select the form and the client of an interaction, in declaration order
    fn dispatch(
        &self,
        ty: AffordanceType,
        name: &str,
        operation: FormOperation,
        options: &InteractionOptions,
    ) -> Result<Dispatch, ConsumedThingError> {
        let interaction = self.interaction(ty, name)?;
        let target = || format!("{ty} \"{name}\" of \"{}\"", self.thing.id);

        let forms = self.thing.forms_of(Some((ty, name))).unwrap_or_default();

        let candidates: Vec<(usize, &Form)> = match options.form_index {
            Some(index) => {
                let form = forms
                    .get(index)
                    .ok_or_else(|| ConsumedThingError::InvalidFormIndex {
                        target: target(),
                        index,
                    })?;
                vec![(index, form)]
            }
            None => forms.iter().enumerate().collect(),
        };

        let (index, form, factory) = candidates
            .into_iter()
            .map(|(index, form)| (index, AugmentedForm::new(form, &self.thing)))
            .filter(|(_, form)| form.supports(operation))
            .find_map(|(index, form)| {
                let factory = self.servient.client_factory(&form.scheme()?)?;
                Some((index, form, factory))
            })
            .ok_or_else(|| ConsumedThingError::NoForm {
                target: target(),
                operation,
            })?;

        let resolved = form.resolve(&interaction.uri_variables, &options.uri_variables)?;
        debug!(
            thing = %self.thing.id,
            "{operation} \"{name}\" through form {index} at {}",
            resolved.href
        );

        let schemes = form.security_schemes()?;
        let credentials =
            self.servient
                .resolve_credentials(&schemes, &resolved.href, Some(&self.thing.id))?;

        let client = factory.client();
        if !client.set_security(&schemes, credentials.as_ref()) {
            let scheme = schemes
                .first()
                .map(|scheme| scheme.subtype.to_string())
                .unwrap_or_else(|| SecuritySchemeSubtype::NoSec.to_string());
            return Err(ConsumedThingError::SecurityDeclined {
                scheme,
                href: resolved.href,
            });
        }

        Ok(Dispatch {
            client,
            form: resolved,
        })
    }

    fn encode(&self, dispatch: &Dispatch, value: &Value) -> Result<Content, ConsumedThingError> {
        self.servient
            .content_manager()
            .value_to_content(value, dispatch.form.content_type_or_default())
            .map_err(|source| ConsumedThingError::Content {
                href: dispatch.form.href.clone(),
                source,
            })
    }

    fn decode(
        &self,
        dispatch: &Dispatch,
        content: &Content,
        schema: Option<&DataSchema>,
    ) -> Result<Value, ConsumedThingError> {
        self.servient
            .content_manager()
            .content_to_value(content, dispatch.response_type(), schema)
            .map_err(|source| ConsumedThingError::Content {
                href: dispatch.form.href.clone(),
                source,
            })
    }

    pub async fn read_property(
        &self,
        name: &str,
        options: InteractionOptions,
    ) -> Result<Value, ConsumedThingError> {
        let dispatch = self.dispatch(
            AffordanceType::Property,
            name,
            FormOperation::ReadProperty,
            &options,
        )?;

        let content = dispatch
            .client
            .read_resource(&dispatch.form)
            .await
            .map_err(|source| dispatch.protocol_error(source))?;

        let schema = self.thing.properties.get(name).map(|p| &p.data_schema);
        self.decode(&dispatch, &content, schema)
    }

    pub async fn write_property(
        &self,
        name: &str,
        value: Value,
        options: InteractionOptions,
    ) -> Result<(), ConsumedThingError> {
        let dispatch = self.dispatch(
            AffordanceType::Property,
            name,
            FormOperation::WriteProperty,
            &options,
        )?;

        let content = self.encode(&dispatch, &value)?;
        dispatch
            .client
            .write_resource(&dispatch.form, content)
            .await
            .map_err(|source| dispatch.protocol_error(source))?;

        Ok(())
    }

    /// Invoke the action `name`, returning its decoded output
    pub async fn invoke_action(
        &self,
        name: &str,
        input: Option<Value>,
        options: InteractionOptions,
    ) -> Result<Value, ConsumedThingError> {
        let dispatch = self.dispatch(
            AffordanceType::Action,
            name,
            FormOperation::InvokeAction,
            &options,
        )?;

        let content = input
            .map(|input| self.encode(&dispatch, &input))
            .transpose()?;
        let output = dispatch
            .client
            .invoke_resource(&dispatch.form, content)
            .await
            .map_err(|source| dispatch.protocol_error(source))?;

        let schema = self
            .thing
            .actions
            .get(name)
            .and_then(|a| a.output.as_ref());
        self.decode(&dispatch, &output, schema)
    }

    /// The decoded notifications of the property `name`
    pub async fn observe_property(
        &self,
        name: &str,
        options: InteractionOptions,
    ) -> Result<BoxStream<'static, Result<Value, ConsumedThingError>>, ConsumedThingError> {
        let schema = self
            .thing
            .properties
            .get(name)
            .map(|p| p.data_schema.clone());

        self.observe(
            AffordanceType::Property,
            name,
            FormOperation::ObserveProperty,
            schema,
            &options,
        )
        .await
    }

    /// The decoded data emitted by the event `name`
    pub async fn subscribe_event(
        &self,
        name: &str,
        options: InteractionOptions,
    ) -> Result<BoxStream<'static, Result<Value, ConsumedThingError>>, ConsumedThingError> {
        let schema = self.thing.events.get(name).and_then(|e| e.data.clone());

        self.observe(
            AffordanceType::Event,
            name,
            FormOperation::SubscribeEvent,
            schema,
            &options,
        )
        .await
    }

    async fn observe(
        &self,
        ty: AffordanceType,
        name: &str,
        operation: FormOperation,
        schema: Option<DataSchema>,
        options: &InteractionOptions,
    ) -> Result<BoxStream<'static, Result<Value, ConsumedThingError>>, ConsumedThingError> {
        let dispatch = self.dispatch(ty, name, operation, options)?;
        let stream = dispatch
            .client
            .observe_resource(&dispatch.form)
            .await
            .map_err(|source| dispatch.protocol_error(source))?;

        let consumed = self.clone();
        let stream = stream.map(move |item| {
            let content = item.map_err(|source| dispatch.protocol_error(source))?;
            consumed.decode(&dispatch, &content, schema.as_ref())
        });

        Ok(stream.boxed())
    }

    /// Read every property concurrently
    pub async fn read_all_properties(&self) -> HashMap<String, Result<Value, ConsumedThingError>> {
        self.read_multiple_properties(self.thing.properties.keys().cloned())
            .await
    }

    /// Read the named properties concurrently, each failure stays in its entry
    pub async fn read_multiple_properties<I, S>(
        &self,
        names: I,
    ) -> HashMap<String, Result<Value, ConsumedThingError>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let reads = names.into_iter().map(Into::into).map(|name| async move {
            let result = self
                .read_property(&name, InteractionOptions::default())
                .await;
            (name, result)
        });

        join_all(reads).await.into_iter().collect()
    }

    /// Write the given properties concurrently, each failure stays in its entry
    pub async fn write_multiple_properties(
        &self,
        values: HashMap<String, Value>,
    ) -> HashMap<String, Result<(), ConsumedThingError>> {
        let writes = values.into_iter().map(|(name, value)| async move {
            let result = self
                .write_property(&name, value, InteractionOptions::default())
                .await;
            (name, result)
        });

        join_all(writes).await.into_iter().collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::{
        credentials::{Credentials, CredentialsKind},
        protocol::{ContentStream, ProtocolClientFactory},
        servient::ServientConfig,
        thing::SecurityScheme,
    };

    #[derive(Debug, Clone, PartialEq)]
    struct Request {
        op: &'static str,
        href: String,
        body: Option<Vec<u8>>,
        credentials: Option<Credentials>,
    }

    #[derive(Default)]
    struct MockClient {
        requests: Mutex<Vec<Request>>,
        credentials: Mutex<Option<Credentials>>,
        decline_security: bool,
    }

    impl MockClient {
        fn record(&self, op: &'static str, form: &Form, body: Option<&Content>) {
            let credentials = self.credentials.lock().unwrap().clone();
            self.requests.lock().unwrap().push(Request {
                op,
                href: form.href.clone(),
                body: body.map(|content| content.body.clone()),
                credentials,
            });
        }

        fn requests(&self) -> Vec<Request> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolClient for MockClient {
        fn set_security(
            &self,
            _schemes: &[SecurityScheme],
            credentials: Option<&Credentials>,
        ) -> bool {
            *self.credentials.lock().unwrap() = credentials.cloned();
            !self.decline_security
        }

        async fn read_resource(&self, form: &Form) -> Result<Content, ProtocolClientError> {
            self.record("read", form, None);
            if form.href.contains("offline") {
                return Err(ProtocolClientError::transport(&form.href, "connection refused"));
            }
            Ok(Content::new(
                "application/json",
                serde_json::to_vec(&form.href).unwrap(),
            ))
        }

        async fn write_resource(
            &self,
            form: &Form,
            content: Content,
        ) -> Result<Option<Content>, ProtocolClientError> {
            self.record("write", form, Some(&content));
            if form.href.contains("offline") {
                return Err(ProtocolClientError::transport(&form.href, "connection refused"));
            }
            Ok(None)
        }

        async fn invoke_resource(
            &self,
            form: &Form,
            content: Option<Content>,
        ) -> Result<Content, ProtocolClientError> {
            self.record("invoke", form, content.as_ref());
            Ok(content.unwrap_or_else(|| Content::new("application/json", "null")))
        }

        async fn observe_resource(&self, form: &Form) -> Result<ContentStream, ProtocolClientError> {
            self.record("observe", form, None);
            let items = vec![
                Ok(Content::untyped("1")),
                Ok(Content::untyped("2")),
                Err(ProtocolClientError::transport(&form.href, "reset")),
            ];
            Ok(futures::stream::iter(items).boxed())
        }
    }

    struct MockFactory {
        scheme: &'static str,
        client: Arc<MockClient>,
    }

    impl ProtocolClientFactory for MockFactory {
        fn scheme(&self) -> &str {
            self.scheme
        }

        fn client(&self) -> Arc<dyn ProtocolClient> {
            self.client.clone()
        }
    }

    fn servient(client: &Arc<MockClient>) -> Arc<Servient> {
        let servient = Servient::new(ServientConfig::default());
        servient.add_client_factory(MockFactory {
            scheme: "mock",
            client: client.clone(),
        });
        Arc::new(servient)
    }

    fn lamp() -> Thing {
        Thing::from_value(json!({
            "id": "urn:lamp",
            "base": "mock://lamp.local/",
            "securityDefinitions": {
                "nosec_sc": { "scheme": "nosec" },
                "basic_sc": { "scheme": "basic" },
            },
            "security": "nosec_sc",
            "properties": {
                "status": {
                    "type": "string",
                    "forms": [
                        { "href": "http://lamp.local/status" },
                        { "href": "status/first", "op": ["readproperty"] },
                        { "href": "status/second", "op": ["readproperty", "writeproperty"] },
                        {
                            "href": "status/text",
                            "op": "writeproperty",
                            "contentType": "text/plain",
                        },
                    ],
                },
                "level": {
                    "type": "integer",
                    "uriVariables": { "unit": { "type": "string" } },
                    "forms": [{
                        "href": "level{?unit,scale}",
                        "contentType": "application/json",
                    }],
                },
                "secret": {
                    "type": "string",
                    "forms": [{ "href": "secret", "security": "basic_sc" }],
                },
                "offline": {
                    "type": "string",
                    "forms": [{ "href": "offline" }],
                },
            },
            "uriVariables": { "scale": { "type": "integer", "default": 2 } },
            "actions": {
                "fade": {
                    "input": { "type": "integer" },
                    "output": { "type": "integer" },
                    "forms": [{ "href": "fade", "contentType": "application/json" }],
                },
            },
            "events": {
                "overheating": {
                    "data": { "type": "integer" },
                    "forms": [{ "href": "events/overheating", "contentType": "application/json" }],
                },
            },
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn first_eligible_form_wins() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        assert_eq!(
            lamp.read_property("status", InteractionOptions::default())
                .await
                .unwrap(),
            json!("mock://lamp.local/status/first")
        );

        lamp.write_property("status", json!("on"), InteractionOptions::default())
            .await
            .unwrap();
        let requests = client.requests();
        assert_eq!(requests[1].href, "mock://lamp.local/status/second");
        assert_eq!(requests[1].body.as_deref(), Some(&b"on"[..]));
    }

    #[tokio::test]
    async fn forced_form_index() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        lamp.write_property(
            "status",
            json!("on"),
            InteractionOptions::default().with_form_index(3),
        )
        .await
        .unwrap();
        assert_eq!(client.requests()[0].href, "mock://lamp.local/status/text");

        assert!(matches!(
            lamp.write_property(
                "status",
                json!("on"),
                InteractionOptions::default().with_form_index(1)
            )
            .await,
            Err(ConsumedThingError::NoForm {
                operation: FormOperation::WriteProperty,
                ..
            })
        ));
        assert!(matches!(
            lamp.read_property("status", InteractionOptions::default().with_form_index(9))
                .await,
            Err(ConsumedThingError::InvalidFormIndex { index: 9, .. })
        ));
        assert!(matches!(
            lamp.read_property("status", InteractionOptions::default().with_form_index(0))
                .await,
            Err(ConsumedThingError::NoForm { .. })
        ));
    }

    #[tokio::test]
    async fn uri_variables() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        let href = lamp
            .read_property(
                "level",
                InteractionOptions::default().with_uri_variable("unit", "lux"),
            )
            .await
            .unwrap();
        assert_eq!(href, json!("mock://lamp.local/level?unit=lux&scale=2"));

        let href = lamp
            .read_property("level", InteractionOptions::default())
            .await
            .unwrap();
        assert_eq!(href, json!("mock://lamp.local/level?scale=2"));
    }

    #[tokio::test]
    async fn unresolved_uri_variables_fail_before_dispatch() {
        let client = Arc::new(MockClient::default());
        let mut thing = lamp();
        thing.properties.get_mut("offline").unwrap().interaction.forms[0].href =
            "devices/{device}".to_string();
        let lamp = servient(&client).consume(thing);

        assert!(matches!(
            lamp.read_property("offline", InteractionOptions::default())
                .await,
            Err(ConsumedThingError::UriTemplate(UriTemplateError::Unresolved { variable, .. }))
                if variable == "device"
        ));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn unknown_schemes_and_affordances() {
        let client = Arc::new(MockClient::default());
        let servient = Arc::new(Servient::new(ServientConfig::default()));
        servient.add_client_factory(MockFactory {
            scheme: "coap",
            client: client.clone(),
        });
        let lamp = servient.consume(lamp());

        assert!(matches!(
            lamp.read_property("status", InteractionOptions::default())
                .await,
            Err(ConsumedThingError::NoForm { .. })
        ));
        assert!(matches!(
            lamp.invoke_action("explode", None, InteractionOptions::default())
                .await,
            Err(ConsumedThingError::UnknownAffordance {
                ty: AffordanceType::Action,
                ..
            })
        ));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn credentials_are_resolved_per_form() {
        let client = Arc::new(MockClient::default());
        let servient = servient(&client);
        let lamp = servient.consume(lamp());

        let err = lamp
            .read_property("secret", InteractionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsumedThingError::Credentials(CredentialsError::NoCredentialsFound { ref href })
                if href == "mock://lamp.local/secret"
        ));

        servient.add_credentials("mock://lamp.local", Credentials::bearer("token"));
        assert!(matches!(
            lamp.read_property("secret", InteractionOptions::default())
                .await,
            Err(ConsumedThingError::Credentials(CredentialsError::KindMismatch {
                expected: CredentialsKind::Basic,
                actual: CredentialsKind::Bearer,
                ..
            }))
        ));

        servient.add_credentials("urn:lamp", Credentials::basic("admin", "pw"));
        servient.add_credentials("mock://lamp.local/secret", Credentials::basic("root", "pw"));
        lamp.read_property("secret", InteractionOptions::default())
            .await
            .unwrap();
        assert_eq!(
            client.requests().last().unwrap().credentials,
            Some(Credentials::basic("root", "pw"))
        );

        lamp.read_property("status", InteractionOptions::default())
            .await
            .unwrap();
        assert_eq!(client.requests().last().unwrap().credentials, None);
    }

    #[tokio::test]
    async fn declined_security_aborts_the_interaction() {
        let client = Arc::new(MockClient {
            decline_security: true,
            ..Default::default()
        });
        let lamp = servient(&client).consume(lamp());

        assert!(matches!(
            lamp.read_property("status", InteractionOptions::default())
                .await,
            Err(ConsumedThingError::SecurityDeclined { scheme, .. }) if scheme == "NoSecurity"
        ));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn undeclared_security_aborts_the_interaction() {
        let client = Arc::new(MockClient::default());
        let mut thing = lamp();
        thing.properties.get_mut("secret").unwrap().interaction.forms[0].security =
            Some(vec!["ghost_sc".to_string()]);
        let lamp = servient(&client).consume(thing);

        assert!(matches!(
            lamp.read_property("secret", InteractionOptions::default())
                .await,
            Err(ConsumedThingError::UndeclaredSecurity(UndeclaredSecurity { name, .. }))
                if name == "ghost_sc"
        ));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn actions_encode_and_decode_payloads() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        assert_eq!(
            lamp.invoke_action("fade", Some(json!(42)), InteractionOptions::default())
                .await
                .unwrap(),
            json!(42)
        );
        assert_eq!(
            lamp.invoke_action("fade", None, InteractionOptions::default())
                .await
                .unwrap(),
            Value::Null
        );

        let requests = client.requests();
        assert_eq!(requests[0].body.as_deref(), Some(&b"42"[..]));
        assert_eq!(requests[1].body, None);
    }

    #[tokio::test]
    async fn transport_errors_keep_their_cause() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        let err = lamp
            .read_property("offline", InteractionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ConsumedThingError::Protocol { ref href, .. } if href == "mock://lamp.local/offline"
        ));
        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn subscriptions_are_decoded() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        let items: Vec<_> = lamp
            .subscribe_event("overheating", InteractionOptions::default())
            .await
            .unwrap()
            .collect()
            .await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), &json!(1));
        assert_eq!(items[1].as_ref().unwrap(), &json!(2));
        assert!(matches!(items[2], Err(ConsumedThingError::Protocol { .. })));
    }

    #[tokio::test]
    async fn bulk_operations_isolate_failures() {
        let client = Arc::new(MockClient::default());
        let lamp = servient(&client).consume(lamp());

        let results = lamp
            .write_multiple_properties(HashMap::from([
                ("status".to_string(), json!("on")),
                ("offline".to_string(), json!("x")),
            ]))
            .await;
        assert!(results["status"].is_ok());
        assert!(matches!(
            results["offline"],
            Err(ConsumedThingError::Protocol { .. })
        ));

        let results = lamp.read_all_properties().await;
        assert_eq!(results.len(), 4);
        assert_eq!(
            results["status"].as_ref().unwrap(),
            &json!("mock://lamp.local/status/first")
        );
        assert!(results["offline"].is_err());
        assert!(results["secret"].is_err());

        let results = lamp.read_multiple_properties(["status", "missing"]).await;
        assert!(results["status"].is_ok());
        assert!(matches!(
            results["missing"],
            Err(ConsumedThingError::UnknownAffordance { .. })
        ));
    }
}
