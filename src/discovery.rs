//! Filters for Thing discovery
//!
//! A [ThingFilter] tells [Servient::discover](crate::servient::Servient::discover) where to look
//! for Things, an optional [ThingQuery] narrows down the results.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::thing::Thing;

/// Errors raised while parsing a discovery query
#[derive(Debug, thiserror::Error)]
pub enum ThingQueryError {
    #[error("Malformed Thing query: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("A Thing query must be a JSON object, found {0}")]
    NotAnObject(&'static str),
}

/// Where to look for Things
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMethod {
    /// Local Things, a directory if an URL is given, and every protocol client able to discover
    #[default]
    Any,

    /// Only the Things hosted by the servient
    Local,

    /// Only the Things listed by the directory at [ThingFilter::url]
    Directory,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThingFilter {
    pub method: DiscoveryMethod,
    pub url: Option<String>,
    pub query: Option<ThingQuery>,
}

impl ThingFilter {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn local() -> Self {
        Self {
            method: DiscoveryMethod::Local,
            ..Default::default()
        }
    }

    pub fn directory(url: impl Into<String>) -> Self {
        Self {
            method: DiscoveryMethod::Directory,
            url: Some(url.into()),
            query: None,
        }
    }

    #[must_use]
    pub fn with_query(mut self, query: ThingQuery) -> Self {
        self.query = Some(query);
        self
    }

    /// Whether `thing` passes the query, if any
    pub fn accepts(&self, thing: &Thing) -> bool {
        self.query.as_ref().map_or(true, |query| query.matches(thing))
    }
}

/// A JSON template matched against Thing Descriptions
///
/// A Thing matches when its description contains the template: every member of a template object
/// must be present and match, every element of a template array must match some element of the
/// description array, scalars must be equal. A scalar also matches an array containing it, so
/// `{"@type": "saref:LightSwitch"}` matches a Thing with several types.
#[derive(Debug, Clone, PartialEq)]
pub struct ThingQuery {
    template: Value,
}

impl ThingQuery {
    pub fn new(template: Value) -> Result<Self, ThingQueryError> {
        match &template {
            Value::Object(_) => Ok(Self { template }),
            Value::Null => Err(ThingQueryError::NotAnObject("null")),
            Value::Bool(_) => Err(ThingQueryError::NotAnObject("a boolean")),
            Value::Number(_) => Err(ThingQueryError::NotAnObject("a number")),
            Value::String(_) => Err(ThingQueryError::NotAnObject("a string")),
            Value::Array(_) => Err(ThingQueryError::NotAnObject("an array")),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, ThingQueryError> {
        serde_json::from_str(raw)
            .map_err(ThingQueryError::Malformed)
            .and_then(Self::new)
    }

    #[inline]
    pub fn template(&self) -> &Value {
        &self.template
    }

    pub fn matches(&self, thing: &Thing) -> bool {
        thing
            .to_value()
            .map_or(false, |description| self.matches_value(&description))
    }

    #[inline]
    pub fn matches_value(&self, description: &Value) -> bool {
        contains(description, &self.template)
    }
}

fn contains(value: &Value, template: &Value) -> bool {
    match (value, template) {
        (Value::Object(value), Value::Object(template)) => template.iter().all(|(key, expected)| {
            value
                .get(key)
                .map_or(false, |actual| contains(actual, expected))
        }),
        (Value::Array(values), Value::Array(template)) => template
            .iter()
            .all(|expected| values.iter().any(|actual| contains(actual, expected))),
        (Value::Array(values), expected) => values.iter().any(|actual| actual == expected),
        (actual, expected) => actual == expected,
    }
}
