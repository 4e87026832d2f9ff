use serde_json::Value;

use super::{
    human_readable_info::{BuildableHumanReadableInfo, HumanReadableInfo},
    Error,
};
use crate::thing::{
    ArraySchema, DataSchema, DataSchemaSubtype, IntegerSchema, NumberSchema, ObjectSchema,
    StringSchema,
};

/// Builder for a [DataSchema]
///
/// A freshly created builder describes a variable schema; use one of [DataSchemaBuilder::bool],
/// [DataSchemaBuilder::number], [DataSchemaBuilder::integer], [DataSchemaBuilder::string],
/// [DataSchemaBuilder::array], [DataSchemaBuilder::object] or [DataSchemaBuilder::null] to fix
/// its type.
///
/// Errors of nested schemas are kept and reported by [DataSchemaBuilder::build].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DataSchemaBuilder {
    info: HumanReadableInfo,
    schema: DataSchema,
    error: Option<Error>,
}

/// Setters shared by every data schema builder
pub trait BuildableDataSchema: Sized {
    fn data_schema_mut(&mut self) -> &mut DataSchemaBuilder;

    fn constant(mut self, value: impl Into<Value>) -> Self {
        self.data_schema_mut().schema.constant = Some(value.into());
        self
    }

    fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.data_schema_mut().schema.default = Some(value.into());
        self
    }

    fn unit(mut self, value: impl Into<String>) -> Self {
        self.data_schema_mut().schema.unit = Some(value.into());
        self
    }

    fn format(mut self, value: impl Into<String>) -> Self {
        self.data_schema_mut().schema.format = Some(value.into());
        self
    }

    /// Add an allowed value
    fn enumeration(mut self, value: impl Into<Value>) -> Self {
        self.data_schema_mut()
            .schema
            .enumeration
            .get_or_insert_with(Default::default)
            .push(value.into());
        self
    }

    /// Add an alternative schema
    fn one_of<F, T>(mut self, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        let builder = self.data_schema_mut();
        if let Some(schema) = builder.nested(f) {
            builder
                .schema
                .one_of
                .get_or_insert_with(Default::default)
                .push(schema);
        }
        self
    }

    fn read_only(mut self) -> Self {
        self.data_schema_mut().schema.read_only = true;
        self
    }

    fn write_only(mut self) -> Self {
        self.data_schema_mut().schema.write_only = true;
        self
    }
}

impl BuildableDataSchema for DataSchemaBuilder {
    #[inline]
    fn data_schema_mut(&mut self) -> &mut DataSchemaBuilder {
        self
    }
}

impl BuildableHumanReadableInfo for DataSchemaBuilder {
    #[inline]
    fn info_mut(&mut self) -> &mut HumanReadableInfo {
        &mut self.info
    }
}

impl DataSchemaBuilder {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bool(mut self) -> Self {
        self.schema.subtype = Some(DataSchemaSubtype::Boolean);
        self
    }

    pub fn null(mut self) -> Self {
        self.schema.subtype = Some(DataSchemaSubtype::Null);
        self
    }

    pub fn number(self) -> NumberDataSchemaBuilder {
        NumberDataSchemaBuilder {
            inner: self,
            subtype: Default::default(),
        }
    }

    pub fn integer(self) -> IntegerDataSchemaBuilder {
        IntegerDataSchemaBuilder {
            inner: self,
            subtype: Default::default(),
        }
    }

    pub fn string(self) -> StringDataSchemaBuilder {
        StringDataSchemaBuilder {
            inner: self,
            subtype: Default::default(),
        }
    }

    pub fn array(self) -> ArrayDataSchemaBuilder {
        ArrayDataSchemaBuilder {
            inner: self,
            subtype: Default::default(),
        }
    }

    pub fn object(self) -> ObjectDataSchemaBuilder {
        ObjectDataSchemaBuilder {
            inner: self,
            subtype: Default::default(),
        }
    }

    pub fn build(self) -> Result<DataSchema, Error> {
        let Self {
            info,
            mut schema,
            error,
        } = self;

        if let Some(error) = error {
            return Err(error);
        }
        if let Some(subtype) = &schema.subtype {
            check_subtype(subtype)?;
        }

        let HumanReadableInfo {
            attype,
            title,
            titles,
            description,
            descriptions,
        } = info;
        schema.attype = attype;
        schema.title = title;
        schema.titles = titles;
        schema.description = description;
        schema.descriptions = descriptions;

        Ok(schema)
    }

    /// Build a nested schema, keeping the first error for later
    fn nested<F, T>(&mut self, f: F) -> Option<DataSchema>
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        match f(DataSchemaBuilder::default()).into().build() {
            Ok(schema) => Some(schema),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }
}

/// Build a schema from a builder closure
pub(crate) fn build_data_schema<F, T>(f: F) -> Result<DataSchema, Error>
where
    F: FnOnce(DataSchemaBuilder) -> T,
    T: Into<DataSchemaBuilder>,
{
    f(DataSchemaBuilder::default()).into().build()
}

fn check_range<T: PartialOrd>(min: Option<T>, max: Option<T>) -> Result<(), Error> {
    match (min, max) {
        (Some(min), Some(max)) if min > max => Err(Error::InvalidMinMax),
        _ => Ok(()),
    }
}

fn check_subtype(subtype: &DataSchemaSubtype) -> Result<(), Error> {
    match subtype {
        DataSchemaSubtype::Number(number) => {
            let bounds = [
                number.minimum,
                number.maximum,
                number.exclusive_minimum,
                number.exclusive_maximum,
            ];
            if bounds.iter().flatten().any(|bound| bound.is_nan()) {
                return Err(Error::NanMinMax);
            }
            check_range(number.minimum, number.maximum)?;
            check_range(number.exclusive_minimum, number.exclusive_maximum)?;
            match number.multiple_of {
                Some(multiple_of) if !(multiple_of > 0.) => Err(Error::InvalidMultipleOf),
                _ => Ok(()),
            }
        }
        DataSchemaSubtype::Integer(integer) => {
            check_range(integer.minimum, integer.maximum)?;
            check_range(integer.exclusive_minimum, integer.exclusive_maximum)?;
            match integer.multiple_of {
                Some(multiple_of) if multiple_of <= 0 => Err(Error::InvalidMultipleOf),
                _ => Ok(()),
            }
        }
        DataSchemaSubtype::Array(array) => check_range(array.min_items, array.max_items),
        DataSchemaSubtype::String(string) => check_range(string.min_length, string.max_length),
        DataSchemaSubtype::Boolean | DataSchemaSubtype::Object(_) | DataSchemaSubtype::Null => {
            Ok(())
        }
    }
}

macro_rules! typed_data_schema_builder {
    ($($builder:ident => $subtype:ident ($schema:ty)),+ $(,)?) => {
        $(
            #[derive(Debug, Clone, PartialEq)]
            pub struct $builder {
                inner: DataSchemaBuilder,
                subtype: $schema,
            }

            impl BuildableDataSchema for $builder {
                #[inline]
                fn data_schema_mut(&mut self) -> &mut DataSchemaBuilder {
                    &mut self.inner
                }
            }

            impl BuildableHumanReadableInfo for $builder {
                #[inline]
                fn info_mut(&mut self) -> &mut HumanReadableInfo {
                    &mut self.inner.info
                }
            }

            impl From<$builder> for DataSchemaBuilder {
                fn from(builder: $builder) -> Self {
                    let $builder { mut inner, subtype } = builder;
                    inner.schema.subtype = Some(DataSchemaSubtype::$subtype(subtype));
                    inner
                }
            }

            impl $builder {
                #[inline]
                pub fn build(self) -> Result<DataSchema, Error> {
                    DataSchemaBuilder::from(self).build()
                }
            }
        )+
    };
}

typed_data_schema_builder!(
    NumberDataSchemaBuilder => Number(NumberSchema),
    IntegerDataSchemaBuilder => Integer(IntegerSchema),
    StringDataSchemaBuilder => String(StringSchema),
    ArrayDataSchemaBuilder => Array(ArraySchema),
    ObjectDataSchemaBuilder => Object(ObjectSchema),
);

macro_rules! subtype_field_builder {
    ($($field:ident : $ty:ty),+ $(,)?) => {
        $(
            pub fn $field(mut self, value: $ty) -> Self {
                self.subtype.$field = Some(value);
                self
            }
        )+
    };
}

impl NumberDataSchemaBuilder {
    subtype_field_builder!(
        minimum: f64,
        maximum: f64,
        exclusive_minimum: f64,
        exclusive_maximum: f64,
        multiple_of: f64,
    );
}

impl IntegerDataSchemaBuilder {
    subtype_field_builder!(
        minimum: i64,
        maximum: i64,
        exclusive_minimum: i64,
        exclusive_maximum: i64,
        multiple_of: i64,
    );
}

impl StringDataSchemaBuilder {
    subtype_field_builder!(min_length: u32, max_length: u32);

    pub fn pattern(mut self, value: impl Into<String>) -> Self {
        self.subtype.pattern = Some(value.into());
        self
    }

    pub fn content_encoding(mut self, value: impl Into<String>) -> Self {
        self.subtype.content_encoding = Some(value.into());
        self
    }

    pub fn content_media_type(mut self, value: impl Into<String>) -> Self {
        self.subtype.content_media_type = Some(value.into());
        self
    }
}

impl ArrayDataSchemaBuilder {
    subtype_field_builder!(min_items: u32, max_items: u32);

    /// Append the schema of the next item
    pub fn item<F, T>(mut self, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        if let Some(schema) = self.inner.nested(f) {
            self.subtype
                .items
                .get_or_insert_with(Default::default)
                .push(schema);
        }
        self
    }
}

impl ObjectDataSchemaBuilder {
    /// Add a named member, optionally marking it as required
    pub fn property<F, T>(mut self, name: impl Into<String>, required: bool, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        let name = name.into();
        if let Some(schema) = self.inner.nested(f) {
            if required {
                self.subtype.required.push(name.clone());
            }
            self.subtype.properties.insert(name, schema);
        }
        self
    }
}
