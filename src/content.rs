//! Payload envelopes and the codec registry
//!
//! Values only cross the protocol boundary as [Content]: a media type and raw bytes. The
//! [ContentManager] owns the conversions in both directions, one [ContentCodec] per base media
//! type.

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    str::Utf8Error,
    sync::{Arc, RwLock},
};

use serde_json::Value;
use tracing::debug;

use crate::{
    thing::{DataSchema, DataSchemaSubtype},
    BoxError,
};

pub const APPLICATION_JSON: &str = "application/json";
pub const APPLICATION_TD_JSON: &str = "application/td+json";
pub const APPLICATION_CBOR: &str = "application/cbor";
pub const TEXT_PLAIN: &str = "text/plain";

/// Errors of the codec registry and of the codecs themselves
#[derive(Debug, thiserror::Error)]
pub enum ContentCodecError {
    #[error("Invalid media type \"{0}\"")]
    InvalidMediaType(String),

    #[error("Unable to encode a value as {media_type}: {source}")]
    Encode {
        media_type: String,
        #[source]
        source: BoxError,
    },

    #[error("Unable to decode a {media_type} payload: {source}")]
    Decode {
        media_type: String,
        #[source]
        source: BoxError,
    },

    #[error("No codec registered for {media_type} and the binary fallback failed: {source}")]
    Unsupported {
        media_type: String,
        #[source]
        source: BoxError,
    },
}

impl ContentCodecError {
    /// The media type of the payload involved in the failure
    pub fn media_type(&self) -> &str {
        match self {
            Self::InvalidMediaType(media_type)
            | Self::Encode { media_type, .. }
            | Self::Decode { media_type, .. }
            | Self::Unsupported { media_type, .. } => media_type,
        }
    }
}

/// The wire envelope of a value
#[derive(Clone, PartialEq, Eq)]
pub struct Content {
    /// The media type reported with the payload, if any
    pub content_type: Option<String>,

    pub body: Vec<u8>,
}

impl Content {
    pub fn new(content_type: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            body: body.into(),
        }
    }

    /// A payload whose media type is not known
    pub fn untyped(body: impl Into<Vec<u8>>) -> Self {
        Self {
            content_type: None,
            body: body.into(),
        }
    }

    /// The reported media type, or `fallback`
    #[inline]
    pub fn content_type_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.content_type.as_deref().unwrap_or(fallback)
    }
}

impl fmt::Debug for Content {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Content")
            .field("content_type", &self.content_type)
            .field("body", &format_args!("{} bytes", self.body.len()))
            .finish()
    }
}

/// A parsed `type/subtype; param=value` media type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaType {
    essence: String,
    params: HashMap<String, String>,
}

impl MediaType {
    /// Split a media type into its lower-cased base type and its parameters
    pub fn parse(raw: &str) -> Result<Self, ContentCodecError> {
        let invalid = || ContentCodecError::InvalidMediaType(raw.to_owned());

        let mut parts = raw.split(';');
        let essence = parts.next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.split_once('/') {
            Some((ty, subtype))
                if !ty.is_empty() && !subtype.is_empty() && !subtype.contains('/') => {}
            _ => return Err(invalid()),
        }

        let params = parts
            .filter(|param| !param.trim().is_empty())
            .map(|param| {
                let (name, value) = param.split_once('=').ok_or_else(invalid)?;
                let name = name.trim().to_ascii_lowercase();
                if name.is_empty() {
                    return Err(invalid());
                }
                let value = value.trim().trim_matches('"').to_owned();
                Ok((name, value))
            })
            .collect::<Result<_, _>>()?;

        Ok(Self { essence, params })
    }

    /// The base media type, without parameters
    #[inline]
    pub fn essence(&self) -> &str {
        &self.essence
    }

    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[inline]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }
}

/// A bidirectional converter between values and the bytes of one media type
pub trait ContentCodec: Send + Sync {
    /// The base media type handled by the codec
    fn media_type(&self) -> &str;

    /// Decode `body`, optionally guided by the expected `schema`
    fn bytes_to_value(
        &self,
        body: &[u8],
        schema: Option<&DataSchema>,
        params: &HashMap<String, String>,
    ) -> Result<Value, ContentCodecError>;

    fn value_to_bytes(
        &self,
        value: &Value,
        params: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ContentCodecError>;
}

/// JSON codec, also used for Thing Descriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonCodec {
    media_type: &'static str,
}

impl JsonCodec {
    pub const fn json() -> Self {
        Self {
            media_type: APPLICATION_JSON,
        }
    }

    pub const fn td_json() -> Self {
        Self {
            media_type: APPLICATION_TD_JSON,
        }
    }
}

impl ContentCodec for JsonCodec {
    fn media_type(&self) -> &str {
        self.media_type
    }

    fn bytes_to_value(
        &self,
        body: &[u8],
        _schema: Option<&DataSchema>,
        _params: &HashMap<String, String>,
    ) -> Result<Value, ContentCodecError> {
        if body.is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_slice(body).map_err(|source| ContentCodecError::Decode {
            media_type: self.media_type.to_owned(),
            source: source.into(),
        })
    }

    fn value_to_bytes(
        &self,
        value: &Value,
        _params: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ContentCodecError> {
        serde_json::to_vec(value).map_err(|source| ContentCodecError::Encode {
            media_type: self.media_type.to_owned(),
            source: source.into(),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TextCodecError {
    #[error("unsupported charset \"{0}\"")]
    Charset(String),

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] Utf8Error),

    #[error("\"{raw}\" is not a valid {expected}")]
    Parse { expected: &'static str, raw: String },

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

/// Plain text codec
///
/// Only UTF-8 (and its ASCII subset) is supported. Decoding follows the expected schema: a text
/// payload is parsed as a boolean, a number or `null` when the schema says so, and as a string
/// otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextCodec;

impl TextCodec {
    fn check_charset(params: &HashMap<String, String>) -> Result<(), TextCodecError> {
        match params.get("charset") {
            None => Ok(()),
            Some(charset) => match charset.to_ascii_lowercase().as_str() {
                "utf-8" | "utf8" | "us-ascii" | "ascii" => Ok(()),
                _ => Err(TextCodecError::Charset(charset.clone())),
            },
        }
    }

    fn decode(body: &[u8], schema: Option<&DataSchema>) -> Result<Value, TextCodecError> {
        let text = std::str::from_utf8(body)?;
        let parse_error = |expected| TextCodecError::Parse {
            expected,
            raw: text.to_owned(),
        };

        let subtype = schema.and_then(|schema| schema.subtype.as_ref());
        let value = match subtype {
            None | Some(DataSchemaSubtype::String(_)) => Value::String(text.to_owned()),
            Some(DataSchemaSubtype::Boolean) => match text.trim() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => return Err(parse_error("boolean")),
            },
            Some(DataSchemaSubtype::Integer(_)) => {
                parse_integer(text.trim()).ok_or_else(|| parse_error("integer"))?
            }
            Some(DataSchemaSubtype::Number(_)) => {
                let text = text.trim();
                parse_integer(text)
                    .or_else(|| {
                        text.parse::<f64>()
                            .ok()
                            .and_then(serde_json::Number::from_f64)
                            .map(Value::Number)
                    })
                    .ok_or_else(|| parse_error("number"))?
            }
            Some(DataSchemaSubtype::Null) => match text.trim() {
                "" | "null" => Value::Null,
                _ => return Err(parse_error("null")),
            },
            Some(DataSchemaSubtype::Array(_) | DataSchemaSubtype::Object(_)) => {
                serde_json::from_str(text)?
            }
        };

        Ok(value)
    }
}

fn parse_integer(text: &str) -> Option<Value> {
    text.parse::<i64>()
        .map(Value::from)
        .or_else(|_| text.parse::<u64>().map(Value::from))
        .ok()
}

impl ContentCodec for TextCodec {
    fn media_type(&self) -> &str {
        TEXT_PLAIN
    }

    fn bytes_to_value(
        &self,
        body: &[u8],
        schema: Option<&DataSchema>,
        params: &HashMap<String, String>,
    ) -> Result<Value, ContentCodecError> {
        Self::check_charset(params)
            .and_then(|()| Self::decode(body, schema))
            .map_err(|source| ContentCodecError::Decode {
                media_type: TEXT_PLAIN.to_owned(),
                source: source.into(),
            })
    }

    fn value_to_bytes(
        &self,
        value: &Value,
        params: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ContentCodecError> {
        Self::check_charset(params).map_err(|source| ContentCodecError::Encode {
            media_type: TEXT_PLAIN.to_owned(),
            source: source.into(),
        })?;

        let text = match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };

        Ok(text.into_bytes())
    }
}

/// CBOR codec
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CborCodec;

impl CborCodec {
    fn encode(value: &Value) -> Result<Vec<u8>, BoxError> {
        let mut encoded = Vec::new();
        ciborium::ser::into_writer(value, &mut encoded)?;
        Ok(encoded)
    }

    fn decode(body: &[u8]) -> Result<Value, BoxError> {
        Ok(ciborium::de::from_reader(body)?)
    }
}

impl ContentCodec for CborCodec {
    fn media_type(&self) -> &str {
        APPLICATION_CBOR
    }

    fn bytes_to_value(
        &self,
        body: &[u8],
        _schema: Option<&DataSchema>,
        _params: &HashMap<String, String>,
    ) -> Result<Value, ContentCodecError> {
        Self::decode(body).map_err(|source| ContentCodecError::Decode {
            media_type: APPLICATION_CBOR.to_owned(),
            source,
        })
    }

    fn value_to_bytes(
        &self,
        value: &Value,
        _params: &HashMap<String, String>,
    ) -> Result<Vec<u8>, ContentCodecError> {
        Self::encode(value).map_err(|source| ContentCodecError::Encode {
            media_type: APPLICATION_CBOR.to_owned(),
            source,
        })
    }
}

#[derive(Default)]
struct Registry {
    codecs: HashMap<String, Arc<dyn ContentCodec>>,
    offered: BTreeSet<String>,
}

/// Registry of the codecs known to a servient
///
/// Registration and lookup can happen concurrently: a lookup sees either the previous or the
/// new codec for a media type.
pub struct ContentManager {
    registry: RwLock<Registry>,
}

impl fmt::Debug for ContentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.read().unwrap_or_else(|p| p.into_inner());
        let mut codecs: Vec<_> = registry.codecs.keys().collect();
        codecs.sort();

        f.debug_struct("ContentManager")
            .field("codecs", &codecs)
            .field("offered", &registry.offered)
            .finish()
    }
}

impl Default for ContentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentManager {
    /// A registry with the JSON, TD, plain text and CBOR codecs
    ///
    /// JSON and TD JSON are offered.
    pub fn new() -> Self {
        let manager = Self::empty();
        manager.add_codec(JsonCodec::json(), true);
        manager.add_codec(JsonCodec::td_json(), true);
        manager.add_codec(TextCodec, false);
        manager.add_codec(CborCodec, false);
        manager
    }

    /// A registry without any codec
    pub fn empty() -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
        }
    }

    /// Register `codec`, replacing the one previously registered for the same media type
    ///
    /// When `offered` the media type is advertised to protocol servers.
    pub fn add_codec<C>(&self, codec: C, offered: bool)
    where
        C: ContentCodec + 'static,
    {
        let media_type = codec.media_type().to_ascii_lowercase();
        let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
        if offered {
            registry.offered.insert(media_type.clone());
        } else {
            registry.offered.remove(&media_type);
        }
        registry.codecs.insert(media_type, Arc::new(codec));
    }

    /// Unregister the codec of `media_type`, returning whether there was one
    pub fn remove_codec(&self, media_type: &str) -> bool {
        let media_type = media_type.to_ascii_lowercase();
        let mut registry = self.registry.write().unwrap_or_else(|p| p.into_inner());
        registry.offered.remove(&media_type);
        registry.codecs.remove(&media_type).is_some()
    }

    /// The media types advertised to protocol servers, sorted
    pub fn offered_media_types(&self) -> Vec<String> {
        let registry = self.registry.read().unwrap_or_else(|p| p.into_inner());
        registry.offered.iter().cloned().collect()
    }

    /// Whether a codec handles the base type of `media_type`
    pub fn is_supported(&self, media_type: &str) -> bool {
        MediaType::parse(media_type)
            .map(|media_type| self.codec(media_type.essence()).is_some())
            .unwrap_or(false)
    }

    fn codec(&self, essence: &str) -> Option<Arc<dyn ContentCodec>> {
        let registry = self.registry.read().unwrap_or_else(|p| p.into_inner());
        registry.codecs.get(essence).cloned()
    }

    /// Encode `value` as `content_type`
    pub fn value_to_content(
        &self,
        value: &Value,
        content_type: &str,
    ) -> Result<Content, ContentCodecError> {
        let media_type = MediaType::parse(content_type)?;
        let body = match self.codec(media_type.essence()) {
            Some(codec) => codec.value_to_bytes(value, media_type.params())?,
            None => {
                debug!("no codec for {content_type}, falling back to CBOR");
                CborCodec::encode(value).map_err(|source| ContentCodecError::Unsupported {
                    media_type: content_type.to_owned(),
                    source,
                })?
            }
        };

        Ok(Content::new(content_type, body))
    }

    /// Decode `content`, using `default_type` when it does not report a media type
    pub fn content_to_value(
        &self,
        content: &Content,
        default_type: &str,
        schema: Option<&DataSchema>,
    ) -> Result<Value, ContentCodecError> {
        let content_type = content.content_type_or(default_type);
        let media_type = MediaType::parse(content_type)?;
        match self.codec(media_type.essence()) {
            Some(codec) => codec.bytes_to_value(&content.body, schema, media_type.params()),
            None => {
                debug!("no codec for {content_type}, falling back to CBOR");
                CborCodec::decode(&content.body).map_err(|source| {
                    ContentCodecError::Unsupported {
                        media_type: content_type.to_owned(),
                        source,
                    }
                })
            }
        }
    }
}
