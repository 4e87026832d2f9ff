//! JSON-LD `@context` of a Thing Description
//!
//! Only the subset needed to resolve compact semantic types is modelled: an optional default
//! vocabulary and a table of named prefixes. Term definitions that are objects keep their extra
//! members so that a description can be re-emitted without losing them.

use std::{borrow::Cow, collections::HashMap, fmt, ops::Deref};

use serde::{
    de::{self, Visitor},
    ser::SerializeSeq,
    Deserialize, Deserializer, Serialize, Serializer,
};
use serde_json::{Map, Value};

/// The JSON-LD context for the version 1.0 of the [Thing
/// description](https://www.w3.org/TR/wot-thing-description/)
pub const TD_CONTEXT_10: &str = "https://www.w3.org/2019/wot/td/v1";

/// The JSON-LD context for the version 1.1 of the [Thing
/// description](https://www.w3.org/TR/wot-thing-description11/)
pub const TD_CONTEXT_11: &str = "https://www.w3.org/2019/wot/td/v1.1";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Context {
    pub default: Option<ContextEntry>,
    pub named: HashMap<String, ContextEntry>,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ContextEntry {
    Iri(Iri),
    Object(ContextEntryObject),
}

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Iri(String);

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ContextEntryObject {
    #[serde(rename = "@id", skip_serializing_if = "Option::is_none")]
    iri: Option<Iri>,

    #[serde(flatten)]
    other: Map<String, Value>,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, thiserror::Error)]
#[error("IRI cannot be an empty string")]
pub struct InvalidEmptyIri;

impl Iri {
    #[inline]
    pub fn new(iri: impl Into<String>) -> Result<Self, InvalidEmptyIri> {
        let iri = iri.into();
        if iri.is_empty() {
            Err(InvalidEmptyIri)
        } else {
            Ok(Self(iri))
        }
    }

    #[inline]
    pub fn td_context_11() -> Self {
        Self(TD_CONTEXT_11.to_owned())
    }

    #[inline]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Deref for Iri {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<str> for Iri {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for Iri {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        String::deserialize(deserializer).and_then(|iri| Iri::new(iri).map_err(de::Error::custom))
    }
}

impl ContextEntry {
    #[inline]
    pub fn iri(&self) -> Option<&Iri> {
        match self {
            Self::Iri(iri) => Some(iri),
            Self::Object(obj) => obj.iri.as_ref(),
        }
    }
}

impl Context {
    /// Create a context with a single default vocabulary
    #[inline]
    pub fn new(iri: impl Into<String>) -> Result<Self, InvalidEmptyIri> {
        Iri::new(iri).map(|iri| Self {
            default: Some(ContextEntry::Iri(iri)),
            named: HashMap::new(),
        })
    }

    /// Bind `prefix` to `iri`, replacing any previous binding.
    pub fn insert_prefix(
        &mut self,
        prefix: impl Into<String>,
        iri: impl Into<String>,
    ) -> Result<(), InvalidEmptyIri> {
        let iri = Iri::new(iri)?;
        self.named.insert(prefix.into(), ContextEntry::Iri(iri));
        Ok(())
    }

    /// The IRI bound to `prefix`, if any.
    pub fn prefix(&self, prefix: &str) -> Option<&Iri> {
        self.named.get(prefix).and_then(ContextEntry::iri)
    }

    /// Expand a compact `prefix:suffix` term using the named prefixes.
    ///
    /// Terms without a known prefix, including already expanded IRIs, are returned as they are.
    pub fn expand<'a>(&self, term: &'a str) -> Cow<'a, str> {
        term.split_once(':')
            .and_then(|(prefix, suffix)| {
                self.prefix(prefix)
                    .map(|iri| Cow::Owned(format!("{}{suffix}", &**iri)))
            })
            .unwrap_or(Cow::Borrowed(term))
    }
}

impl Default for Context {
    #[inline]
    fn default() -> Self {
        Self {
            default: Some(ContextEntry::Iri(Iri::td_context_11())),
            named: HashMap::new(),
        }
    }
}

impl<'de> Deserialize<'de> for Context {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ContextVisitor;

        impl<'de> Visitor<'de> for ContextVisitor {
            type Value = Context;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str(
                    "an IRI string, a map of context entries or an array mixing one IRI string \
                     and maps of context entries",
                )
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Context::new(v).map_err(de::Error::custom)
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: de::MapAccess<'de>,
            {
                let mut context = Context {
                    default: None,
                    named: HashMap::new(),
                };
                while let Some((name, value)) = map.next_entry::<String, Value>()? {
                    context.visit_entry(name, value)?;
                }

                Ok(context)
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: de::SeqAccess<'de>,
            {
                let mut context = Context {
                    default: None,
                    named: HashMap::new(),
                };

                while let Some(element) = seq.next_element::<Value>()? {
                    match element {
                        Value::String(iri) => context.set_default_iri(iri)?,
                        Value::Object(map) => {
                            for (name, value) in map {
                                context.visit_entry(name, value)?;
                            }
                        }
                        _ => {
                            return Err(de::Error::custom(
                                "only strings and objects are supported in context arrays",
                            ))
                        }
                    }
                }

                Ok(context)
            }
        }

        deserializer.deserialize_any(ContextVisitor)
    }
}

impl Context {
    fn set_default_iri<E: de::Error>(&mut self, iri: String) -> Result<(), E> {
        let iri = Iri::new(iri).map_err(de::Error::custom)?;
        match &mut self.default {
            None => {
                self.default = Some(ContextEntry::Iri(iri));
                Ok(())
            }
            Some(ContextEntry::Object(ContextEntryObject {
                iri: default_iri @ None,
                ..
            })) => {
                *default_iri = Some(iri);
                Ok(())
            }
            Some(_) => Err(de::Error::custom(
                "default context specified more than once",
            )),
        }
    }

    fn visit_entry<E: de::Error>(&mut self, key: String, value: Value) -> Result<(), E> {
        match (key.as_str(), value) {
            ("@id", Value::String(iri)) => self.set_default_iri(iri),
            ("@id", _) => Err(de::Error::custom(
                "only string @id values in contexts are supported",
            )),
            (keyword, value) if keyword.starts_with('@') => {
                let default = self.default.take();
                let mut object = match default {
                    Some(ContextEntry::Iri(iri)) => ContextEntryObject {
                        iri: Some(iri),
                        other: Map::new(),
                    },
                    Some(ContextEntry::Object(object)) => object,
                    None => ContextEntryObject {
                        iri: None,
                        other: Map::new(),
                    },
                };
                object.other.insert(key, value);
                self.default = Some(ContextEntry::Object(object));
                Ok(())
            }
            (_, Value::String(iri)) => {
                let iri = Iri::new(iri).map_err(de::Error::custom)?;
                self.named.insert(key, ContextEntry::Iri(iri));
                Ok(())
            }
            (_, Value::Object(mut other)) => {
                let iri = match other.remove("@id") {
                    Some(Value::String(iri)) => Some(Iri::new(iri).map_err(de::Error::custom)?),
                    Some(_) => {
                        return Err(de::Error::custom(
                            "only string @id values in contexts are supported",
                        ))
                    }
                    None => None,
                };
                self.named
                    .insert(key, ContextEntry::Object(ContextEntryObject { iri, other }));
                Ok(())
            }
            _ => Err(de::Error::custom(
                "context terms must be bound to a string or an object",
            )),
        }
    }
}

impl Serialize for Context {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match (&self.default, self.named.is_empty()) {
            (Some(default), true) => default.serialize(serializer),
            (None, true) => serializer.serialize_seq(Some(0))?.end(),
            (None, false) => self.named.serialize(serializer),
            (Some(default), false) => {
                let mut seq = serializer.serialize_seq(Some(2))?;
                seq.serialize_element(default)?;
                seq.serialize_element(&self.named)?;
                seq.end()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn deserialize_empty_iri() {
        assert!(serde_json::from_value::<Iri>(json!("")).is_err());
        assert!(serde_json::from_value::<Context>(json!("")).is_err());
    }

    #[test]
    fn deserialize_context_iri() {
        let context: Context = serde_json::from_value(json!(TD_CONTEXT_11)).unwrap();
        assert_eq!(context, Context::default());
    }

    #[test]
    fn deserialize_full() {
        let context: Context = serde_json::from_value(json!([
            TD_CONTEXT_11,
            {
                "saref": "https://w3id.org/saref#",
                "temp": {
                    "@id": "saref:Temperature",
                    "@type": "@id",
                },
            },
            { "@language": "en" }
        ]))
        .unwrap();

        assert_eq!(
            context.prefix("saref").map(|iri| &**iri),
            Some("https://w3id.org/saref#")
        );
        assert_eq!(
            context.prefix("temp").map(|iri| &**iri),
            Some("saref:Temperature")
        );
        let Some(ContextEntry::Object(default)) = &context.default else {
            panic!("default context should have become an object");
        };
        assert_eq!(default.iri.as_deref(), Some(TD_CONTEXT_11));
        assert_eq!(default.other.get("@language"), Some(&json!("en")));
    }

    #[test]
    fn duplicated_default_is_rejected() {
        let err = serde_json::from_value::<Context>(json!(["a", "b"])).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn serialize_roundtrip() {
        let raw = json!([
            TD_CONTEXT_11,
            {
                "saref": "https://w3id.org/saref#",
                "temp": { "@id": "saref:Temperature", "@type": "@id" },
            }
        ]);
        let context: Context = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&context).unwrap(), raw);

        let simple = Context::default();
        assert_eq!(serde_json::to_value(simple).unwrap(), json!(TD_CONTEXT_11));
    }

    #[test]
    fn expand_compact_terms() {
        let mut context = Context::default();
        context
            .insert_prefix("saref", "https://w3id.org/saref#")
            .unwrap();

        assert_eq!(
            context.expand("saref:Temperature"),
            "https://w3id.org/saref#Temperature"
        );
        assert_eq!(context.expand("other:Temperature"), "other:Temperature");
        assert_eq!(
            context.expand("https://w3id.org/saref#Temperature"),
            "https://w3id.org/saref#Temperature"
        );
        assert_eq!(context.expand("Temperature"), "Temperature");
    }
}
