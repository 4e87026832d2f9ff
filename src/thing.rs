//! Thing Description data structures
//!
//! A Thing Description, or `TD`, stores the semantic metadata and the interface descriptions of
//! a physical or virtual entity, called `Thing`.
//!
//! Use [Thing::builder] to create a new `Thing`, [Thing::from_json]/[Thing::to_json] (or
//! [serde_json] directly) to parse or export it.
//!
//! [Interaction Affordance]: https://www.w3.org/TR/wot-thing-description/#interactionaffordance

use std::{
    borrow::Cow,
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    ops::Not,
    str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use serde_with::{serde_as, skip_serializing_none, DeserializeAs, OneOrMany, Same};
use time::OffsetDateTime;

use crate::{builder::ThingBuilder, context::Context};

pub(crate) type MultiLanguage = HashMap<String, String>;
pub(crate) type DataSchemaMap = HashMap<String, DataSchema>;

/// Errors raised while parsing or exporting a Thing Description
#[derive(Debug, thiserror::Error)]
pub enum ThingError {
    #[error("Invalid Thing Description: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("Unable to serialize the Thing Description: {0}")]
    Encode(#[source] serde_json::Error),
}

/// An abstraction of a physical or a virtual entity
///
/// It contains metadata and a description of its interfaces.
///
/// Two `Thing`s are the same entity when they share the same [`id`](Thing::id), whatever the
/// rest of their description says: equality and hashing only look at the identifier.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thing {
    /// A [JSON-LD @context](https://www.w3.org/TR/json-ld11/#the-context)
    #[serde(rename = "@context", default)]
    pub context: Context,

    /// A unique identifier
    pub id: String,

    /// JSON-LD semantic keywords
    #[serde(rename = "@type", default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub attype: Option<Vec<String>>,

    /// Human-readable title to be displayed
    pub title: Option<String>,

    /// Multi-language translations of the title
    pub titles: Option<MultiLanguage>,

    /// Human-readable additional information
    pub description: Option<String>,

    /// Multi-language translations of the description
    pub descriptions: Option<MultiLanguage>,

    /// Version information
    pub version: Option<VersionInfo>,

    /// Time of creation of this description
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub created: Option<OffsetDateTime>,

    /// Time of last update of this description
    #[serde(with = "time::serde::rfc3339::option", default)]
    pub modified: Option<OffsetDateTime>,

    /// URI to the device maintainer
    pub support: Option<String>,

    /// Base URI to be used to resolve all the other relative URIs
    pub base: Option<String>,

    /// Property-based [Interaction Affordances]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, PropertyAffordance>,

    /// Action-based [Interaction Affordances]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub actions: HashMap<String, ActionAffordance>,

    /// Event-based [Interaction Affordances]
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub events: HashMap<String, EventAffordance>,

    /// Arbitrary resources that relate to the current Thing
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<Link>,

    /// Bulk-operations over the Thing properties
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,

    /// Thing-wide Security constraints
    ///
    /// It is a list of names matching the Security Schemes defined in [Thing::security_definitions].
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[serde_as(as = "OneOrMany<_>")]
    pub security: Vec<String>,

    /// Security definitions
    ///
    /// The name keys are used in [Form::security] and [Thing::security].
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub security_definitions: HashMap<String, SecurityScheme>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub uri_variables: DataSchemaMap,

    /// Every top-level member that is not part of the vocabulary above
    ///
    /// It is kept as-is and emitted again on export.
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl PartialEq for Thing {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Thing {}

impl Hash for Thing {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Thing {
    /// Shorthand for [ThingBuilder::new].
    #[inline]
    pub fn builder(id: impl Into<String>) -> ThingBuilder {
        ThingBuilder::new(id)
    }

    /// Parse a JSON Thing Description
    pub fn from_json(raw: &str) -> Result<Self, ThingError> {
        serde_json::from_str(raw).map_err(ThingError::Decode)
    }

    /// Convert a JSON value into a Thing
    pub fn from_value(value: Value) -> Result<Self, ThingError> {
        serde_json::from_value(value).map_err(ThingError::Decode)
    }

    /// Export the Thing Description as a JSON string
    pub fn to_json(&self) -> Result<String, ThingError> {
        serde_json::to_string(self).map_err(ThingError::Encode)
    }

    /// Export the Thing Description as a JSON value
    pub fn to_value(&self) -> Result<Value, ThingError> {
        serde_json::to_value(self).map_err(ThingError::Encode)
    }

    /// The properties whose `@type` matches `attype`
    ///
    /// Both `attype` and the property types are expanded through the `@context` prefixes before
    /// being compared, so a compact `prefix:Name` matches its expanded IRI and vice versa.
    /// Unknown prefixes are compared literally.
    pub fn properties_by_object_type(&self, attype: &str) -> HashMap<&str, &PropertyAffordance> {
        let expected = self.context.expand(attype);

        self.properties
            .iter()
            .filter(|(_, property)| {
                property
                    .interaction
                    .attype
                    .iter()
                    .flatten()
                    .any(|ty| self.context.expand(ty) == expected)
            })
            .map(|(name, property)| (name.as_str(), property))
            .collect()
    }

    /// The forms of an affordance, or the thing-level forms
    pub fn forms_of(&self, affordance: Option<(AffordanceType, &str)>) -> Option<&[Form]> {
        match affordance {
            None => Some(&self.forms),
            Some((AffordanceType::Property, name)) => self
                .properties
                .get(name)
                .map(|p| p.interaction.forms.as_slice()),
            Some((AffordanceType::Action, name)) => self
                .actions
                .get(name)
                .map(|a| a.interaction.forms.as_slice()),
            Some((AffordanceType::Event, name)) => self
                .events
                .get(name)
                .map(|e| e.interaction.forms.as_slice()),
        }
    }
}

/// The possible affordance types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AffordanceType {
    /// A property affordance
    Property,

    /// An action affordance
    Action,

    /// An event affordance
    Event,
}

impl fmt::Display for AffordanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Property => "property",
            Self::Action => "action",
            Self::Event => "event",
        };

        f.write_str(s)
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractionAffordance {
    #[serde(rename = "@type", default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub attype: Option<Vec<String>>,

    pub title: Option<String>,

    pub titles: Option<MultiLanguage>,

    pub description: Option<String>,

    pub descriptions: Option<MultiLanguage>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub forms: Vec<Form>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub uri_variables: DataSchemaMap,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct PropertyAffordance {
    #[serde(flatten)]
    pub interaction: InteractionAffordance,

    #[serde(flatten)]
    pub data_schema: DataSchema,

    pub observable: Option<bool>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ActionAffordance {
    #[serde(flatten)]
    pub interaction: InteractionAffordance,

    pub input: Option<DataSchema>,

    pub output: Option<DataSchema>,

    #[serde(default, skip_serializing_if = "Not::not")]
    pub safe: bool,

    #[serde(default, skip_serializing_if = "Not::not")]
    pub idempotent: bool,

    pub synchronous: Option<bool>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAffordance {
    #[serde(flatten)]
    pub interaction: InteractionAffordance,

    pub subscription: Option<DataSchema>,

    pub data: Option<DataSchema>,

    pub data_response: Option<DataSchema>,

    pub cancellation: Option<DataSchema>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct VersionInfo {
    pub instance: String,

    pub model: Option<String>,
}

impl<S> From<S> for VersionInfo
where
    S: Into<String>,
{
    fn from(instance: S) -> Self {
        Self {
            instance: instance.into(),
            model: None,
        }
    }
}

/// Description of the shape of a value
///
/// The common metadata lives here, the `type`-dependent part in [DataSchemaSubtype]. A schema
/// without `type` is a *variable* schema: the concrete shape is only known once a value is
/// decoded.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSchema {
    #[serde(rename = "@type", default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub attype: Option<Vec<String>>,

    pub title: Option<String>,

    pub titles: Option<MultiLanguage>,

    pub description: Option<String>,

    pub descriptions: Option<MultiLanguage>,

    #[serde(rename = "const")]
    pub constant: Option<Value>,

    pub default: Option<Value>,

    pub unit: Option<String>,

    pub one_of: Option<Vec<Self>>,

    #[serde(rename = "enum")]
    pub enumeration: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Not::not")]
    pub read_only: bool,

    #[serde(default, skip_serializing_if = "Not::not")]
    pub write_only: bool,

    pub format: Option<String>,

    #[serde(flatten, deserialize_with = "deserialize_subtype")]
    pub subtype: Option<DataSchemaSubtype>,
}

/// A schema without `type` is variable, a schema with a `type` must match its subtype
fn deserialize_subtype<'de, D>(deserializer: D) -> Result<Option<DataSchemaSubtype>, D::Error>
where
    D: Deserializer<'de>,
{
    let fields = Map::<String, Value>::deserialize(deserializer)?;
    if !fields.contains_key("type") {
        return Ok(None);
    }

    DataSchemaSubtype::deserialize(Value::Object(fields))
        .map(Some)
        .map_err(serde::de::Error::custom)
}

impl DataSchema {
    /// Whether the concrete type is only known at decode time
    #[inline]
    pub fn is_variable(&self) -> bool {
        self.subtype.is_none()
    }

    /// The wire `type` of the schema, `None` for variable schemas
    #[inline]
    pub fn type_name(&self) -> Option<&'static str> {
        self.subtype.as_ref().map(DataSchemaSubtype::type_name)
    }

    /// The value a freshly created property should hold
    pub fn initial_value(&self) -> Value {
        self.constant
            .as_ref()
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or(Value::Null)
    }
}

impl From<DataSchemaSubtype> for DataSchema {
    fn from(subtype: DataSchemaSubtype) -> Self {
        Self {
            subtype: Some(subtype),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataSchemaSubtype {
    Array(ArraySchema),
    Boolean,
    Number(NumberSchema),
    Integer(IntegerSchema),
    Object(ObjectSchema),
    String(StringSchema),
    Null,
}

impl DataSchemaSubtype {
    /// The canonical wire `type` string
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Array(_) => "array",
            Self::Boolean => "boolean",
            Self::Number(_) => "number",
            Self::Integer(_) => "integer",
            Self::Object(_) => "object",
            Self::String(_) => "string",
            Self::Null => "null",
        }
    }

    /// Whether `value` has the host type this variant maps to
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Array(_), Value::Array(_))
            | (Self::Boolean, Value::Bool(_))
            | (Self::Number(_), Value::Number(_))
            | (Self::Object(_), Value::Object(_))
            | (Self::String(_), Value::String(_))
            | (Self::Null, Value::Null) => true,
            (Self::Integer(_), Value::Number(n)) => n.is_i64() || n.is_u64(),
            _ => false,
        }
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArraySchema {
    #[serde(default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub items: Option<Vec<DataSchema>>,

    pub min_items: Option<u32>,

    pub max_items: Option<u32>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NumberSchema {
    pub minimum: Option<f64>,

    pub exclusive_minimum: Option<f64>,

    pub maximum: Option<f64>,

    pub exclusive_maximum: Option<f64>,

    pub multiple_of: Option<f64>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegerSchema {
    pub minimum: Option<i64>,

    pub exclusive_minimum: Option<i64>,

    pub maximum: Option<i64>,

    pub exclusive_maximum: Option<i64>,

    pub multiple_of: Option<i64>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ObjectSchema {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: DataSchemaMap,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StringSchema {
    pub min_length: Option<u32>,

    pub max_length: Option<u32>,

    pub pattern: Option<String>,

    pub content_encoding: Option<String>,

    pub content_media_type: Option<String>,
}

/// A named security mechanism
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct SecurityScheme {
    #[serde(rename = "@type", default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub attype: Option<Vec<String>>,

    pub description: Option<String>,

    pub descriptions: Option<MultiLanguage>,

    pub proxy: Option<String>,

    #[serde(flatten)]
    pub subtype: SecuritySchemeSubtype,
}

impl From<SecuritySchemeSubtype> for SecurityScheme {
    fn from(subtype: SecuritySchemeSubtype) -> Self {
        Self {
            subtype,
            ..Default::default()
        }
    }
}

/// The closed set of supported security mechanisms
///
/// Each variant only describes *how* a secret is expected, never the secret itself (see
/// [`Credentials`](crate::credentials::Credentials)).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(tag = "scheme", rename_all = "lowercase")]
pub enum SecuritySchemeSubtype {
    #[default]
    NoSec,
    Basic(BasicSecurityScheme),
    Digest(DigestSecurityScheme),
    ApiKey(ApiKeySecurityScheme),
    Bearer(BearerSecurityScheme),
    Psk(PskSecurityScheme),
    Cert(CertSecurityScheme),
    Pop(PopSecurityScheme),
    OAuth2(OAuth2SecurityScheme),
    Public(PublicSecurityScheme),
}

impl fmt::Display for SecuritySchemeSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSec => "NoSecurity",
            Self::Basic(_) => "Basic",
            Self::Digest(_) => "Digest",
            Self::ApiKey(_) => "APIKey",
            Self::Bearer(_) => "Bearer",
            Self::Psk(_) => "PSK",
            Self::Cert(_) => "Certificate",
            Self::Pop(_) => "ProofOfPossession",
            Self::OAuth2(_) => "OAuth2",
            Self::Public(_) => "PublicKey",
        };

        f.write_str(s)
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BasicSecurityScheme {
    #[serde(rename = "in", default = "SecurityAuthenticationLocation::header")]
    pub location: SecurityAuthenticationLocation,
    pub name: Option<String>,
}

impl Default for BasicSecurityScheme {
    fn default() -> Self {
        Self {
            location: SecurityAuthenticationLocation::Header,
            name: Default::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityAuthenticationLocation {
    Header,
    Query,
    Body,
    Cookie,
    Uri,
}

impl SecurityAuthenticationLocation {
    const fn header() -> Self {
        Self::Header
    }

    const fn query() -> Self {
        Self::Query
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct DigestSecurityScheme {
    #[serde(default)]
    pub qop: QualityOfProtection,

    #[serde(rename = "in", default = "SecurityAuthenticationLocation::header")]
    pub location: SecurityAuthenticationLocation,

    pub name: Option<String>,
}

impl Default for DigestSecurityScheme {
    fn default() -> Self {
        Self {
            qop: Default::default(),
            location: SecurityAuthenticationLocation::Header,
            name: Default::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum QualityOfProtection {
    #[default]
    Auth,
    AuthInt,
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct ApiKeySecurityScheme {
    #[serde(rename = "in", default = "SecurityAuthenticationLocation::query")]
    pub location: SecurityAuthenticationLocation,

    pub name: Option<String>,
}

impl Default for ApiKeySecurityScheme {
    fn default() -> Self {
        Self {
            location: SecurityAuthenticationLocation::Query,
            name: Default::default(),
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct BearerSecurityScheme {
    pub authorization: Option<String>,

    #[serde(default = "BearerSecurityScheme::default_alg")]
    pub alg: Cow<'static, str>,

    #[serde(default = "BearerSecurityScheme::default_format")]
    pub format: Cow<'static, str>,

    #[serde(rename = "in", default = "SecurityAuthenticationLocation::header")]
    pub location: SecurityAuthenticationLocation,

    pub name: Option<String>,
}

impl Default for BearerSecurityScheme {
    fn default() -> Self {
        Self {
            authorization: Default::default(),
            alg: BearerSecurityScheme::default_alg(),
            format: BearerSecurityScheme::default_format(),
            location: SecurityAuthenticationLocation::Header,
            name: Default::default(),
        }
    }
}

impl BearerSecurityScheme {
    const fn default_alg() -> Cow<'static, str> {
        Cow::Borrowed("ES256")
    }

    const fn default_format() -> Cow<'static, str> {
        Cow::Borrowed("jwt")
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PskSecurityScheme {
    pub identity: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct CertSecurityScheme {
    pub identity: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PopSecurityScheme {
    pub authorization: Option<String>,

    #[serde(default = "BearerSecurityScheme::default_alg")]
    pub alg: Cow<'static, str>,

    #[serde(default = "BearerSecurityScheme::default_format")]
    pub format: Cow<'static, str>,

    #[serde(rename = "in", default = "SecurityAuthenticationLocation::header")]
    pub location: SecurityAuthenticationLocation,

    pub name: Option<String>,
}

impl Default for PopSecurityScheme {
    fn default() -> Self {
        Self {
            authorization: Default::default(),
            alg: BearerSecurityScheme::default_alg(),
            format: BearerSecurityScheme::default_format(),
            location: SecurityAuthenticationLocation::Header,
            name: Default::default(),
        }
    }
}

#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct OAuth2SecurityScheme {
    pub authorization: Option<String>,

    pub token: Option<String>,

    pub refresh: Option<String>,

    #[serde(default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub scopes: Option<Vec<String>>,

    pub flow: String,
}

impl OAuth2SecurityScheme {
    pub fn new(flow: impl Into<String>) -> Self {
        Self {
            flow: flow.into(),
            ..Default::default()
        }
    }
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct PublicSecurityScheme {
    pub identity: Option<String>,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct Link {
    pub href: String,

    #[serde(rename = "type")]
    pub ty: Option<String>,

    pub rel: Option<String>,

    pub anchor: Option<String>,
}

/// Protocol binding metadata of an interaction
///
/// Forms are never mutated once part of a [Thing]; see
/// [`AugmentedForm`](crate::form::AugmentedForm) for the resolved view.
#[serde_as]
#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
    #[serde(default, skip_serializing_if = "DefaultedFormOperations::is_default")]
    pub op: DefaultedFormOperations,

    pub href: String,

    pub content_type: Option<String>,

    pub content_coding: Option<String>,

    pub subprotocol: Option<String>,

    #[serde(default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub security: Option<Vec<String>>,

    #[serde(default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub scopes: Option<Vec<String>>,

    pub response: Option<ExpectedResponse>,

    #[serde(default)]
    #[serde_as(as = "Option<OneOrMany<_>>")]
    pub additional_responses: Option<Vec<AdditionalExpectedResponse>>,
}

impl Form {
    /// Media type assumed when a form does not declare `contentType`
    pub const DEFAULT_CONTENT_TYPE: &'static str = "text/plain";

    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            ..Default::default()
        }
    }

    /// The declared `contentType` or [Form::DEFAULT_CONTENT_TYPE]
    pub fn content_type_or_default(&self) -> &str {
        self.content_type
            .as_deref()
            .unwrap_or(Self::DEFAULT_CONTENT_TYPE)
    }

    /// Whether the form can be used for `operation`
    ///
    /// A form without an explicit `op` list is considered suitable for any operation.
    pub fn supports(&self, operation: FormOperation) -> bool {
        match &self.op {
            DefaultedFormOperations::Default => true,
            DefaultedFormOperations::Custom(ops) => ops.contains(&operation),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormOperation {
    ReadProperty,
    WriteProperty,
    ObserveProperty,
    UnobserveProperty,
    InvokeAction,
    QueryAction,
    CancelAction,
    SubscribeEvent,
    UnsubscribeEvent,
    ReadAllProperties,
    WriteAllProperties,
    ReadMultipleProperties,
    WriteMultipleProperties,
    ObserveAllProperties,
    UnobserveAllProperties,
    SubscribeAllEvents,
    UnsubscribeAllEvents,
    QueryAllActions,
}

impl FormOperation {
    pub const ALL: [FormOperation; 18] = [
        Self::ReadProperty,
        Self::WriteProperty,
        Self::ObserveProperty,
        Self::UnobserveProperty,
        Self::InvokeAction,
        Self::QueryAction,
        Self::CancelAction,
        Self::SubscribeEvent,
        Self::UnsubscribeEvent,
        Self::ReadAllProperties,
        Self::WriteAllProperties,
        Self::ReadMultipleProperties,
        Self::WriteMultipleProperties,
        Self::ObserveAllProperties,
        Self::UnobserveAllProperties,
        Self::SubscribeAllEvents,
        Self::UnsubscribeAllEvents,
        Self::QueryAllActions,
    ];

    /// The canonical wire name
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReadProperty => "readproperty",
            Self::WriteProperty => "writeproperty",
            Self::ObserveProperty => "observeproperty",
            Self::UnobserveProperty => "unobserveproperty",
            Self::InvokeAction => "invokeaction",
            Self::QueryAction => "queryaction",
            Self::CancelAction => "cancelaction",
            Self::SubscribeEvent => "subscribeevent",
            Self::UnsubscribeEvent => "unsubscribeevent",
            Self::ReadAllProperties => "readallproperties",
            Self::WriteAllProperties => "writeallproperties",
            Self::ReadMultipleProperties => "readmultipleproperties",
            Self::WriteMultipleProperties => "writemultipleproperties",
            Self::ObserveAllProperties => "observeallproperties",
            Self::UnobserveAllProperties => "unobserveallproperties",
            Self::SubscribeAllEvents => "subscribeallevents",
            Self::UnsubscribeAllEvents => "unsubscribeallevents",
            Self::QueryAllActions => "queryallactions",
        }
    }

    /// Whether the operation targets a whole Thing instead of a single affordance
    pub const fn is_thing_level(&self) -> bool {
        matches!(
            self,
            Self::ReadAllProperties
                | Self::WriteAllProperties
                | Self::ReadMultipleProperties
                | Self::WriteMultipleProperties
                | Self::ObserveAllProperties
                | Self::UnobserveAllProperties
                | Self::SubscribeAllEvents
                | Self::UnsubscribeAllEvents
                | Self::QueryAllActions
        )
    }
}

impl fmt::Display for FormOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, thiserror::Error)]
#[error("Unknown form operation \"{0}\"")]
pub struct UnknownOperation(pub String);

impl FromStr for FormOperation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_owned()))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum DefaultedFormOperations {
    #[default]
    Default,
    Custom(Vec<FormOperation>),
}

impl DefaultedFormOperations {
    #[inline]
    pub fn is_default(&self) -> bool {
        matches!(self, Self::Default)
    }
}

impl Serialize for DefaultedFormOperations {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Default => serializer.serialize_none(),
            Self::Custom(ops) if ops.is_empty() => serializer.serialize_none(),
            Self::Custom(ops) => ops.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for DefaultedFormOperations
where
    OneOrMany<Same>: DeserializeAs<'de, Vec<FormOperation>>,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ops = Option::<OneOrMany<_>>::deserialize_as(deserializer)?;
        Ok(ops.map(Self::Custom).unwrap_or(Self::Default))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpectedResponse {
    pub content_type: String,
}

#[skip_serializing_none]
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdditionalExpectedResponse {
    #[serde(default = "bool_true", skip_serializing_if = "is_true")]
    pub success: bool,

    pub content_type: Option<String>,

    pub schema: Option<String>,
}

const fn bool_true() -> bool {
    true
}

const fn is_true(b: &bool) -> bool {
    *b
}
