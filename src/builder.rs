//! Thing Description builder
//!
//! The main entry point is [ThingBuilder].
//!
//! ```
//! use wot_servient::{
//!     builder::{BuildableDataSchema, BuildableHumanReadableInfo, BuildableInteractionAffordance},
//!     thing::{BasicSecurityScheme, FormOperation, SecuritySchemeSubtype, Thing},
//! };
//!
//! let thing = Thing::builder("urn:dev:ops:32473-WoTLamp-1234")
//!     .title("MyLampThing")
//!     .base("http://lamp.local/")
//!     .security_definition("basic_sc", SecuritySchemeSubtype::Basic(BasicSecurityScheme::default()))
//!     .security("basic_sc")
//!     .property("status", |b| {
//!         b.schema(|b| b.string().enumeration("on").enumeration("off"))
//!             .observable(true)
//!             .form(|b| b.href("status"))
//!     })
//!     .action("toggle", |b| b.form(|b| b.href("toggle").op(FormOperation::InvokeAction)))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(thing.properties["status"].data_schema.type_name(), Some("string"));
//! ```

pub mod affordance;
pub mod data_schema;
pub mod human_readable_info;

use std::{collections::HashMap, fmt};

use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{
    context::{Context, InvalidEmptyIri},
    thing::{
        AdditionalExpectedResponse, AffordanceType, DefaultedFormOperations, ExpectedResponse,
        Form, FormOperation, Link, MultiLanguage, SecurityScheme, Thing, VersionInfo,
    },
};

pub use self::{
    affordance::{
        ActionAffordanceBuilder, BuildableInteractionAffordance, EventAffordanceBuilder,
        InteractionAffordanceBuilder, PropertyAffordanceBuilder,
    },
    data_schema::{
        ArrayDataSchemaBuilder, BuildableDataSchema, DataSchemaBuilder, IntegerDataSchemaBuilder,
        NumberDataSchemaBuilder, ObjectDataSchemaBuilder, StringDataSchemaBuilder,
    },
    human_readable_info::{BuildableHumanReadableInfo, HumanReadableInfo},
};

macro_rules! opt_field_builder {
    ($($field:ident : $ty:ty),* $(,)?) => {
        $(
            pub fn $field(mut self, value: impl Into<$ty>) -> Self {
                self.$field = Some(value.into());
                self
            }
        )*
    };
}

/// Builder errors
///
/// Inconsistencies that cannot be expressed through the builder types are reported by
/// [ThingBuilder::build].
#[derive(Debug, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// The WoT security definitions must have an unique name
    #[error("Two security definitions use the name \"{0}\"")]
    DuplicatedSecurityDefinition(String),

    /// The forms have defaults that depend on the Affordance that contains them.
    /// The Thing-level forms must be explicit on the operation
    #[error("A Form directly placed in a Thing must contain at least one relevant operation")]
    MissingOpInForm,

    /// The Form can use only a specific set of operations depending on the context.
    #[error("Invalid Form operation {operation} in {context} context")]
    InvalidOpInForm {
        context: FormContext,
        operation: FormOperation,
    },

    /// The security field must refer to existing security definitions.
    #[error("Security \"{0}\" is not specified in Thing security definitions")]
    UndefinedSecurity(String),

    /// When both min and max are specified, min must be less or equal than max
    #[error("Min value greater than max value")]
    InvalidMinMax,

    /// Neither minimum or maximum value can be NaN
    #[error("Min or Max value is NaN")]
    NanMinMax,

    /// For each type of affordance, names must be unique
    #[error("Two affordances of type {ty} use the name \"{name}\"")]
    DuplicatedAffordance { ty: AffordanceType, name: String },

    #[error("\"multipleOf\" field must be strictly greater than 0")]
    InvalidMultipleOf,

    #[error("An uriVariable cannot be an ObjectSchema or ArraySchema")]
    InvalidUriVariables,

    #[error("Invalid @context: {0}")]
    InvalidContext(#[from] InvalidEmptyIri),
}

/// Context of a [`Form`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormContext {
    /// The root Thing context
    Thing,

    /// A property affordance context
    Property,

    /// An action affordance context
    Action,

    /// An event affordance context
    Event,
}

impl fmt::Display for FormContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Thing => "Thing",
            Self::Property => "PropertyAffordance",
            Self::Action => "ActionAffordance",
            Self::Event => "EventAffordance",
        };

        f.write_str(s)
    }
}

impl From<AffordanceType> for FormContext {
    fn from(ty: AffordanceType) -> Self {
        match ty {
            AffordanceType::Property => Self::Property,
            AffordanceType::Action => Self::Action,
            AffordanceType::Event => Self::Event,
        }
    }
}

/// A builder for a [Thing]
#[must_use]
#[derive(Debug, Clone)]
pub struct ThingBuilder {
    id: String,
    context: Option<String>,
    context_prefixes: Vec<(String, String)>,
    info: HumanReadableInfo,
    version: Option<VersionInfo>,
    created: Option<OffsetDateTime>,
    modified: Option<OffsetDateTime>,
    support: Option<String>,
    base: Option<String>,
    properties: Vec<(String, PropertyAffordanceBuilder)>,
    actions: Vec<(String, ActionAffordanceBuilder)>,
    events: Vec<(String, EventAffordanceBuilder)>,
    links: Vec<Link>,
    forms: Vec<Form>,
    uri_variables: Vec<(String, Result<crate::thing::DataSchema, Error>)>,
    security: Vec<String>,
    security_definitions: Vec<(String, SecurityScheme)>,
    metadata: Map<String, Value>,
}

impl BuildableHumanReadableInfo for ThingBuilder {
    #[inline]
    fn info_mut(&mut self) -> &mut HumanReadableInfo {
        &mut self.info
    }
}

impl ThingBuilder {
    /// Create a new builder for the Thing identified by `id`
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            context: None,
            context_prefixes: Default::default(),
            info: Default::default(),
            version: None,
            created: None,
            modified: None,
            support: None,
            base: None,
            properties: Default::default(),
            actions: Default::default(),
            events: Default::default(),
            links: Default::default(),
            forms: Default::default(),
            uri_variables: Default::default(),
            security: Default::default(),
            security_definitions: Default::default(),
            metadata: Default::default(),
        }
    }

    opt_field_builder!(
        version: VersionInfo,
        created: OffsetDateTime,
        modified: OffsetDateTime,
        support: String,
        base: String,
    );

    /// Replace the default TD 1.1 vocabulary
    pub fn context(mut self, iri: impl Into<String>) -> Self {
        self.context = Some(iri.into());
        self
    }

    /// Bind a JSON-LD prefix, e.g. `saref` to `https://w3id.org/saref#`
    pub fn context_prefix(mut self, prefix: impl Into<String>, iri: impl Into<String>) -> Self {
        self.context_prefixes.push((prefix.into(), iri.into()));
        self
    }

    pub fn link(mut self, href: impl Into<String>) -> Self {
        self.links.push(Link {
            href: href.into(),
            ..Default::default()
        });
        self
    }

    pub fn link_with(mut self, link: Link) -> Self {
        self.links.push(link);
        self
    }

    /// Add a named security definition
    pub fn security_definition(
        mut self,
        name: impl Into<String>,
        scheme: impl Into<SecurityScheme>,
    ) -> Self {
        self.security_definitions.push((name.into(), scheme.into()));
        self
    }

    /// Require a security definition for every interaction of the Thing
    ///
    /// The name must be declared through [ThingBuilder::security_definition].
    pub fn security(mut self, name: impl Into<String>) -> Self {
        self.security.push(name.into());
        self
    }

    /// Add a Thing-level form
    ///
    /// Thing-level forms must list their operations explicitly.
    pub fn form<F>(mut self, f: F) -> Self
    where
        F: FnOnce(FormBuilder<()>) -> FormBuilder<String>,
    {
        self.forms.push(f(FormBuilder::new()).into_form());
        self
    }

    pub fn uri_variable<F, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        let schema = data_schema::build_data_schema(f);
        self.uri_variables.push((name.into(), schema));
        self
    }

    pub fn property<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(PropertyAffordanceBuilder) -> PropertyAffordanceBuilder,
    {
        let builder = f(PropertyAffordanceBuilder::default());
        self.properties.push((name.into(), builder));
        self
    }

    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(ActionAffordanceBuilder) -> ActionAffordanceBuilder,
    {
        let builder = f(ActionAffordanceBuilder::default());
        self.actions.push((name.into(), builder));
        self
    }

    pub fn event<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(EventAffordanceBuilder) -> EventAffordanceBuilder,
    {
        let builder = f(EventAffordanceBuilder::default());
        self.events.push((name.into(), builder));
        self
    }

    /// Add a top-level member outside of the TD vocabulary
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Result<Thing, Error> {
        use std::collections::hash_map::Entry;

        let Self {
            id,
            context: context_iri,
            context_prefixes,
            info,
            version,
            created,
            modified,
            support,
            base,
            properties,
            actions,
            events,
            links,
            forms,
            uri_variables,
            security,
            security_definitions: security_definitions_vec,
            metadata,
        } = self;

        let mut context = match context_iri {
            Some(iri) => Context::new(iri)?,
            None => Context::default(),
        };
        for (prefix, iri) in context_prefixes {
            context.insert_prefix(prefix, iri)?;
        }

        let mut security_definitions = HashMap::with_capacity(security_definitions_vec.len());
        for (name, scheme) in security_definitions_vec {
            match security_definitions.entry(name) {
                Entry::Vacant(entry) => {
                    entry.insert(scheme);
                }
                Entry::Occupied(entry) => {
                    return Err(Error::DuplicatedSecurityDefinition(entry.remove_entry().0));
                }
            }
        }

        let check_security = |names: &[String]| {
            names
                .iter()
                .find(|name| !security_definitions.contains_key(*name))
                .map_or(Ok(()), |name| Err(Error::UndefinedSecurity(name.clone())))
        };
        check_security(&security)?;

        for form in &forms {
            affordance::check_form_ops(form, &FormContext::Thing)?;
        }

        let uri_variables = affordance::build_uri_variables(uri_variables)?;

        let properties = build_affordances(AffordanceType::Property, properties, |b| b.build())?;
        let actions = build_affordances(AffordanceType::Action, actions, |b| b.build())?;
        let events = build_affordances(AffordanceType::Event, events, |b| b.build())?;

        forms
            .iter()
            .chain(properties.values().flat_map(|p| &p.interaction.forms))
            .chain(actions.values().flat_map(|a| &a.interaction.forms))
            .chain(events.values().flat_map(|e| &e.interaction.forms))
            .filter_map(|form| form.security.as_deref())
            .try_for_each(check_security)?;

        let HumanReadableInfo {
            attype,
            title,
            titles,
            description,
            descriptions,
        } = info;

        Ok(Thing {
            context,
            id,
            attype,
            title,
            titles,
            description,
            descriptions,
            version,
            created,
            modified,
            support,
            base,
            properties,
            actions,
            events,
            links,
            forms,
            security,
            security_definitions,
            uri_variables,
            metadata,
        })
    }
}

fn build_affordances<B, T>(
    ty: AffordanceType,
    builders: Vec<(String, B)>,
    build: impl Fn(B) -> Result<T, Error>,
) -> Result<HashMap<String, T>, Error> {
    use std::collections::hash_map::Entry;

    let mut affordances = HashMap::with_capacity(builders.len());
    for (name, builder) in builders {
        let affordance = build(builder)?;
        match affordances.entry(name) {
            Entry::Vacant(entry) => {
                entry.insert(affordance);
            }
            Entry::Occupied(entry) => {
                return Err(Error::DuplicatedAffordance {
                    ty,
                    name: entry.remove_entry().0,
                });
            }
        }
    }

    Ok(affordances)
}

/// Builder for language-specific variants of a field (e.g. titles, descriptions)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MultiLanguageBuilder {
    values: MultiLanguage,
}

impl MultiLanguageBuilder {
    /// Add the language-specific variant
    ///
    /// NOTE: The language key is currently free-form
    pub fn add(&mut self, language: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(language.into(), value.into());
        self
    }
}

/// Builder for a [Form]
///
/// `Href` is `()` until [FormBuilder::href] is called, a form cannot be created without it.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormBuilder<Href> {
    op: DefaultedFormOperations,
    href: Href,
    content_type: Option<String>,
    content_coding: Option<String>,
    subprotocol: Option<String>,
    security: Option<Vec<String>>,
    scopes: Option<Vec<String>>,
    response: Option<ExpectedResponse>,
    additional_responses: Vec<AdditionalExpectedResponse>,
}

impl FormBuilder<()> {
    fn new() -> Self {
        Self {
            op: Default::default(),
            href: (),
            content_type: Default::default(),
            content_coding: Default::default(),
            subprotocol: Default::default(),
            security: Default::default(),
            scopes: Default::default(),
            response: Default::default(),
            additional_responses: Default::default(),
        }
    }

    /// Create a new builder with the specified Href
    pub fn href(self, value: impl Into<String>) -> FormBuilder<String> {
        let Self {
            op,
            href: (),
            content_type,
            content_coding,
            subprotocol,
            security,
            scopes,
            response,
            additional_responses,
        } = self;

        FormBuilder {
            op,
            href: value.into(),
            content_type,
            content_coding,
            subprotocol,
            security,
            scopes,
            response,
            additional_responses,
        }
    }
}

impl<Href> FormBuilder<Href> {
    opt_field_builder!(
        content_type: String,
        content_coding: String,
        subprotocol: String,
    );

    /// Set the form intended operation
    ///
    /// Depending on its parent the form may have a Default operation
    /// or it must be explicitly set.
    pub fn op(mut self, new_op: FormOperation) -> Self {
        match &mut self.op {
            ops @ DefaultedFormOperations::Default => {
                *ops = DefaultedFormOperations::Custom(vec![new_op])
            }
            DefaultedFormOperations::Custom(ops) => ops.push(new_op),
        }

        self
    }

    /// Set the security definitions that must be satisfied to access the resource
    ///
    /// They must be declared through [ThingBuilder::security_definition].
    pub fn security(mut self, value: impl Into<String>) -> Self {
        self.security
            .get_or_insert_with(Default::default)
            .push(value.into());
        self
    }

    /// Set the authorization scope identifiers
    ///
    /// It requires an OAuth2 Security Scheme
    pub fn scope(mut self, value: impl Into<String>) -> Self {
        self.scopes
            .get_or_insert_with(Default::default)
            .push(value.into());
        self
    }

    /// Set the media type of the response, when different from the request one
    pub fn response_content_type(mut self, value: impl Into<String>) -> Self {
        self.response = Some(ExpectedResponse {
            content_type: value.into(),
        });
        self
    }

    pub fn additional_response(mut self, value: AdditionalExpectedResponse) -> Self {
        self.additional_responses.push(value);
        self
    }
}

impl FormBuilder<String> {
    fn into_form(self) -> Form {
        let Self {
            op,
            href,
            content_type,
            content_coding,
            subprotocol,
            security,
            scopes,
            response,
            additional_responses,
        } = self;

        let additional_responses =
            (!additional_responses.is_empty()).then_some(additional_responses);

        Form {
            op,
            href,
            content_type,
            content_coding,
            subprotocol,
            security,
            scopes,
            response,
            additional_responses,
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use time::macros::datetime;

    use super::*;
    use crate::thing::{BasicSecurityScheme, SecuritySchemeSubtype};

    #[test]
    fn default_context() {
        let thing = ThingBuilder::new("urn:test").title("MyLampThing").build().unwrap();

        assert_eq!(
            thing.to_value().unwrap(),
            json!({
                "@context": "https://www.w3.org/2019/wot/td/v1.1",
                "id": "urn:test",
                "title": "MyLampThing",
            })
        );
    }

    #[test]
    fn complete_thing() {
        let thing = ThingBuilder::new("urn:dev:ops:32473-WoTLamp-1234")
            .context_prefix("saref", "https://w3id.org/saref#")
            .attype("saref:LightSwitch")
            .title("MyLampThing")
            .titles(|b| b.add("it", "La mia lampada"))
            .description("A lamp")
            .version("1.0.0")
            .created(datetime!(2022-05-01 10:20:42 UTC))
            .support("mailto:mail@test.com")
            .base("http://lamp.local/")
            .link("http://switch.local/")
            .security_definition(
                "basic_sc",
                SecuritySchemeSubtype::Basic(BasicSecurityScheme::default()),
            )
            .security_definition("nosec_sc", SecuritySchemeSubtype::NoSec)
            .security("basic_sc")
            .form(|b| {
                b.href("all")
                    .op(FormOperation::ReadAllProperties)
                    .op(FormOperation::WriteAllProperties)
            })
            .property("status", |b| {
                b.attype("saref:OnOffState")
                    .schema(|b| b.string().enumeration("on").enumeration("off"))
                    .form(|b| {
                        b.href("status")
                            .content_type("application/json")
                            .security("nosec_sc")
                    })
            })
            .action("toggle", |b| b.form(|b| b.href("toggle")))
            .event("overheating", |b| {
                b.data(|b| b.number()).form(|b| b.href("oh").subprotocol("longpoll"))
            })
            .metadata("vendor:serial", "A-1234")
            .build()
            .unwrap();

        assert_eq!(
            thing.context.expand("saref:OnOffState"),
            "https://w3id.org/saref#OnOffState"
        );
        assert_eq!(thing.version.as_ref().unwrap().instance, "1.0.0");
        assert_eq!(thing.security, ["basic_sc"]);
        assert_eq!(thing.security_definitions.len(), 2);
        assert_eq!(thing.properties_by_object_type("saref:OnOffState").len(), 1);
        assert_eq!(thing.metadata["vendor:serial"], json!("A-1234"));

        let exported = thing.to_value().unwrap();
        assert_eq!(
            exported["properties"]["status"],
            json!({
                "@type": "saref:OnOffState",
                "type": "string",
                "enum": ["on", "off"],
                "forms": [{
                    "href": "status",
                    "contentType": "application/json",
                    "security": "nosec_sc",
                }],
            })
        );
        assert_eq!(
            exported["forms"],
            json!([{ "href": "all", "op": ["readallproperties", "writeallproperties"] }])
        );
        assert_eq!(Thing::from_value(exported).unwrap().to_value().unwrap(), thing.to_value().unwrap());
    }

    #[test]
    fn duplicated_affordance() {
        let result = ThingBuilder::new("urn:test")
            .property("on", |b| b)
            .action("on", |b| b)
            .property("on", |b| b.observable(true))
            .build();

        assert_eq!(
            result,
            Err(Error::DuplicatedAffordance {
                ty: AffordanceType::Property,
                name: "on".to_string(),
            })
        );
    }

    #[test]
    fn security_checks() {
        let result = ThingBuilder::new("urn:test")
            .security_definition("nosec", SecuritySchemeSubtype::NoSec)
            .security_definition("nosec", SecuritySchemeSubtype::NoSec)
            .build();
        assert_eq!(
            result,
            Err(Error::DuplicatedSecurityDefinition("nosec".to_string()))
        );

        let result = ThingBuilder::new("urn:test").security("basic").build();
        assert_eq!(result, Err(Error::UndefinedSecurity("basic".to_string())));

        let result = ThingBuilder::new("urn:test")
            .security_definition("nosec", SecuritySchemeSubtype::NoSec)
            .property("on", |b| b.form(|b| b.href("/on").security("missing")))
            .build();
        assert_eq!(result, Err(Error::UndefinedSecurity("missing".to_string())));
    }

    #[test]
    fn thing_level_forms() {
        let result = ThingBuilder::new("urn:test").form(|b| b.href("/all")).build();
        assert_eq!(result, Err(Error::MissingOpInForm));

        let result = ThingBuilder::new("urn:test")
            .form(|b| b.href("/all").op(FormOperation::ReadProperty))
            .build();
        assert_eq!(
            result,
            Err(Error::InvalidOpInForm {
                context: FormContext::Thing,
                operation: FormOperation::ReadProperty,
            })
        );
    }

    #[test]
    fn invalid_context() {
        let result = ThingBuilder::new("urn:test").context("").build();
        assert_eq!(result, Err(Error::InvalidContext(InvalidEmptyIri)));

        let result = ThingBuilder::new("urn:test")
            .context_prefix("saref", "")
            .build();
        assert_eq!(result, Err(Error::InvalidContext(InvalidEmptyIri)));
    }

    #[test]
    fn invalid_min_max_in_property() {
        let result = ThingBuilder::new("urn:test")
            .property("level", |b| b.schema(|b| b.number().minimum(5.).maximum(1.)))
            .build();
        assert_eq!(result, Err(Error::InvalidMinMax));
    }
}
