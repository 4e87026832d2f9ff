//! Resolved view over a [Form]
//!
//! A [Form] is stored exactly as written in the Thing Description: its `href` may be relative to
//! the Thing `base` and may contain [RFC 6570](https://www.rfc-editor.org/rfc/rfc6570) template
//! expressions, its `security` may be inherited from the Thing. [AugmentedForm] computes the
//! effective values without touching the underlying form.

use std::{borrow::Cow, collections::HashMap};

use serde_json::Value;
use crate::thing::{DataSchema, Form, FormOperation, SecurityScheme, Thing};

/// Errors raised while expanding an URI template
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UriTemplateError {
    #[error("URI variable \"{variable}\" in \"{href}\" is neither supplied nor declared")]
    Unresolved { href: String, variable: String },

    #[error("Unterminated template expression in \"{0}\"")]
    Unterminated(String),

    #[error("Empty template expression in \"{0}\"")]
    EmptyExpression(String),
}

/// A security name in force without a matching definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Security definition \"{name}\" used by \"{thing}\" is not declared")]
pub struct UndeclaredSecurity {
    pub thing: String,
    pub name: String,
}

/// Per-call tuning of an interaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InteractionOptions {
    /// Use the form at this position instead of the first suitable one
    pub form_index: Option<usize>,

    /// Values for the URI template variables of the form
    pub uri_variables: HashMap<String, Value>,

    /// Additional data for the interaction, handed over to exposed handlers as-is
    pub data: Option<Value>,
}

impl InteractionOptions {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_form_index(mut self, index: usize) -> Self {
        self.form_index = Some(index);
        self
    }

    #[must_use]
    pub fn with_uri_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.uri_variables.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_data(mut self, data: impl Into<Value>) -> Self {
        self.data = Some(data.into());
        self
    }
}

/// A [Form] seen through the [Thing] that contains it
#[derive(Debug, Clone, Copy)]
pub struct AugmentedForm<'a> {
    form: &'a Form,
    thing: &'a Thing,
}

impl<'a> AugmentedForm<'a> {
    #[inline]
    pub fn new(form: &'a Form, thing: &'a Thing) -> Self {
        Self { form, thing }
    }

    #[inline]
    pub fn form(&self) -> &'a Form {
        self.form
    }

    /// The `href` made absolute with the Thing `base`, template expressions untouched
    pub fn href(&self) -> Cow<'a, str> {
        resolve_href(self.thing.base.as_deref(), &self.form.href)
    }

    /// The lower-cased URI scheme of the effective href, if it is absolute
    pub fn scheme(&self) -> Option<String> {
        scheme_of(&self.href()).map(str::to_ascii_lowercase)
    }

    #[inline]
    pub fn content_type(&self) -> &'a str {
        self.form.content_type_or_default()
    }

    #[inline]
    pub fn supports(&self, operation: FormOperation) -> bool {
        self.form.supports(operation)
    }

    /// The names of the security definitions in force: the form ones, else the Thing ones
    pub fn security_names(&self) -> &'a [String] {
        self.form
            .security
            .as_deref()
            .unwrap_or(self.thing.security.as_slice())
    }

    /// The security schemes in force, in declaration order
    pub fn security_schemes(&self) -> Result<Vec<SecurityScheme>, UndeclaredSecurity> {
        self.security_names()
            .iter()
            .map(|name| {
                self.thing
                    .security_definitions
                    .get(name)
                    .cloned()
                    .ok_or_else(|| UndeclaredSecurity {
                        thing: self.thing.id.clone(),
                        name: name.clone(),
                    })
            })
            .collect()
    }

    /// A standalone copy of the form with the effective href, every template expression
    /// expanded
    ///
    /// `declared` are the URI variables of the affordance; the Thing-level ones are taken into
    /// account as well.
    pub fn resolve(
        &self,
        declared: &HashMap<String, DataSchema>,
        supplied: &HashMap<String, Value>,
    ) -> Result<Form, UriTemplateError> {
        let href = self.href();
        let href = expand_uri_template(&href, supplied, |name| {
            declared
                .get(name)
                .or_else(|| self.thing.uri_variables.get(name))
        })?;

        Ok(Form {
            href,
            ..self.form.clone()
        })
    }
}

/// The scheme of an absolute URI, `None` for relative references
pub fn scheme_of(href: &str) -> Option<&str> {
    let (scheme, _) = href.split_once(':')?;
    let mut chars = scheme.chars();
    let valid = chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));

    valid.then_some(scheme)
}

/// Join a relative `href` to `base`, with exactly one slash between the two
pub fn resolve_href<'a>(base: Option<&str>, href: &'a str) -> Cow<'a, str> {
    match base {
        Some(base) if scheme_of(href).is_none() => {
            let base = base.trim_end_matches('/');
            let href = href.trim_start_matches('/');
            if href.is_empty() {
                Cow::Owned(base.to_owned())
            } else {
                Cow::Owned(format!("{base}/{href}"))
            }
        }
        _ => Cow::Borrowed(href),
    }
}

/// Expand the RFC 6570 expressions of `template`
///
/// A variable is taken from `supplied` first. A variable that is not supplied but is declared is
/// expanded with the declared `default`, or treated as undefined (and omitted) if there is none.
/// A variable that is neither supplied nor declared is an error.
pub fn expand_uri_template<'s, F>(
    template: &str,
    supplied: &HashMap<String, Value>,
    declared: F,
) -> Result<String, UriTemplateError>
where
    F: Fn(&str) -> Option<&'s DataSchema>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        let end = after
            .find('}')
            .ok_or_else(|| UriTemplateError::Unterminated(template.to_owned()))?;
        let expression = &after[..end];
        if expression.is_empty() {
            return Err(UriTemplateError::EmptyExpression(template.to_owned()));
        }

        let operator = Operator::new(expression);
        let variables = &expression[operator.len()..];
        let mut first = true;
        for spec in variables.split(',') {
            let name = spec
                .trim_end_matches('*')
                .split(':')
                .next()
                .unwrap_or_default();

            let value = match supplied.get(name) {
                Some(value) => Some(Cow::Borrowed(value)),
                None => match declared(name) {
                    Some(schema) => schema.default.as_ref().map(Cow::Borrowed),
                    None => {
                        return Err(UriTemplateError::Unresolved {
                            href: template.to_owned(),
                            variable: name.to_owned(),
                        })
                    }
                },
            };

            let Some(value) = value.as_deref().and_then(|value| operator.render(value)) else {
                continue;
            };

            out.push_str(if first { operator.first } else { operator.separator });
            first = false;
            if operator.named {
                out.push_str(name);
                if value.is_empty() {
                    out.push_str(operator.if_empty);
                    continue;
                }
                out.push('=');
            }
            out.push_str(&value);
        }

        rest = &after[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

struct Operator {
    symbol: Option<char>,
    first: &'static str,
    separator: &'static str,
    named: bool,
    if_empty: &'static str,
    allow_reserved: bool,
}

impl Operator {
    fn new(expression: &str) -> Self {
        let symbol = expression
            .chars()
            .next()
            .filter(|c| matches!(c, '+' | '#' | '.' | '/' | ';' | '?' | '&'));
        let (first, separator, named, if_empty, allow_reserved) = match symbol {
            Some('+') => ("", ",", false, "", true),
            Some('#') => ("#", ",", false, "", true),
            Some('.') => (".", ".", false, "", false),
            Some('/') => ("/", "/", false, "", false),
            Some(';') => (";", ";", true, "", false),
            Some('?') => ("?", "&", true, "=", false),
            Some('&') => ("&", "&", true, "=", false),
            _ => ("", ",", false, "", false),
        };

        Self {
            symbol,
            first,
            separator,
            named,
            if_empty,
            allow_reserved,
        }
    }

    #[inline]
    fn len(&self) -> usize {
        self.symbol.map_or(0, char::len_utf8)
    }

    /// `None` when the value is undefined in the RFC 6570 sense
    fn render(&self, value: &Value) -> Option<String> {
        let encode = |raw: &str| -> String {
            if self.allow_reserved {
                raw.to_owned()
            } else {
                urlencoding::encode(raw).into_owned()
            }
        };

        match value {
            Value::Null => None,
            Value::String(s) => Some(encode(s)),
            Value::Bool(_) | Value::Number(_) => Some(value.to_string()),
            Value::Array(items) if items.is_empty() => None,
            Value::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|item| self.render(item))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
            Value::Object(_) => Some(encode(&value.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::thing::{BasicSecurityScheme, SecuritySchemeSubtype};

    fn vars(value: Value) -> HashMap<String, Value> {
        serde_json::from_value(value).unwrap()
    }

    fn no_declared(_: &str) -> Option<&'static DataSchema> {
        None
    }

    #[test]
    fn href_is_joined_with_a_single_slash() {
        for (base, href) in [
            ("http://lamp.local", "status"),
            ("http://lamp.local/", "status"),
            ("http://lamp.local", "/status"),
            ("http://lamp.local///", "//status"),
        ] {
            assert_eq!(
                resolve_href(Some(base), href),
                "http://lamp.local/status",
                "{base} + {href}"
            );
        }

        assert_eq!(
            resolve_href(Some("http://lamp.local/"), "coap://other/status"),
            "coap://other/status"
        );
        assert_eq!(resolve_href(None, "status"), "status");
        assert_eq!(
            resolve_href(Some("http://lamp.local/"), ""),
            "http://lamp.local"
        );
    }

    #[test]
    fn schemes() {
        assert_eq!(scheme_of("http://lamp.local"), Some("http"));
        assert_eq!(scheme_of("coap+ws://lamp.local"), Some("coap+ws"));
        assert_eq!(scheme_of("mqtt://broker:1883"), Some("mqtt"));
        assert_eq!(scheme_of("/status"), None);
        assert_eq!(scheme_of("{id}:1"), None);
        assert_eq!(scheme_of("1http://a"), None);
    }

    #[test]
    fn expand_simple_and_query() {
        let supplied = vars(json!({"id": "lamp 1", "step": 5, "fast": true}));

        assert_eq!(
            expand_uri_template("http://a/things/{id}/fade", &supplied, no_declared).unwrap(),
            "http://a/things/lamp%201/fade"
        );
        assert_eq!(
            expand_uri_template("http://a/fade{?step,fast}", &supplied, no_declared).unwrap(),
            "http://a/fade?step=5&fast=true"
        );
        assert_eq!(
            expand_uri_template("http://a/fade?x=1{&step}", &supplied, no_declared).unwrap(),
            "http://a/fade?x=1&step=5"
        );
        assert_eq!(
            expand_uri_template("http://a{/id,step}", &supplied, no_declared).unwrap(),
            "http://a/lamp%201/5"
        );
        assert_eq!(
            expand_uri_template("http://a/{+id}", &supplied, no_declared).unwrap(),
            "http://a/lamp 1"
        );
    }

    #[test]
    fn declared_variables_may_be_omitted() {
        let declared: HashMap<String, DataSchema> = serde_json::from_value(json!({
            "step": { "type": "integer" },
            "unit": { "type": "string", "default": "ms" },
        }))
        .unwrap();
        let lookup = |name: &str| declared.get(name);

        assert_eq!(
            expand_uri_template("http://a/fade{?step,unit}", &HashMap::new(), lookup).unwrap(),
            "http://a/fade?unit=ms"
        );
    }

    #[test]
    fn unresolved_variables_are_an_error() {
        assert_eq!(
            expand_uri_template("http://a/{id}", &HashMap::new(), no_declared),
            Err(UriTemplateError::Unresolved {
                href: "http://a/{id}".to_string(),
                variable: "id".to_string(),
            })
        );
        assert!(matches!(
            expand_uri_template("http://a/{id", &HashMap::new(), no_declared),
            Err(UriTemplateError::Unterminated(_))
        ));
        assert!(matches!(
            expand_uri_template("http://a/{}", &HashMap::new(), no_declared),
            Err(UriTemplateError::EmptyExpression(_))
        ));
    }

    #[test]
    fn augmented_form() {
        let thing = Thing::from_value(json!({
            "id": "urn:lamp",
            "base": "HTTP://lamp.local/",
            "securityDefinitions": {
                "basic_sc": { "scheme": "basic" },
                "nosec_sc": { "scheme": "nosec" },
            },
            "security": ["basic_sc"],
            "uriVariables": { "unit": { "type": "string" } },
            "properties": {
                "level": {
                    "forms": [
                        { "href": "/level{?unit}" },
                        { "href": "open", "security": ["nosec_sc", "missing"] },
                    ]
                }
            }
        }))
        .unwrap();
        let forms = &thing.properties["level"].interaction.forms;

        let form = AugmentedForm::new(&forms[0], &thing);
        assert_eq!(form.href(), "HTTP://lamp.local/level{?unit}");
        assert_eq!(form.scheme().as_deref(), Some("http"));
        assert_eq!(form.content_type(), "text/plain");
        assert_eq!(
            form.security_schemes().unwrap(),
            [SecurityScheme::from(SecuritySchemeSubtype::Basic(
                BasicSecurityScheme::default()
            ))]
        );

        let resolved = form
            .resolve(&HashMap::new(), &vars(json!({"unit": "lux"})))
            .unwrap();
        assert_eq!(resolved.href, "HTTP://lamp.local/level?unit=lux");
        assert_eq!(forms[0].href, "/level{?unit}");

        let resolved = form.resolve(&HashMap::new(), &HashMap::new()).unwrap();
        assert_eq!(resolved.href, "HTTP://lamp.local/level");

        let form = AugmentedForm::new(&forms[1], &thing);
        assert_eq!(form.security_names(), ["nosec_sc", "missing"]);
        assert_eq!(
            form.security_schemes(),
            Err(UndeclaredSecurity {
                thing: thing.id.clone(),
                name: "missing".to_string(),
            })
        );
    }
}
