use super::{
    data_schema::{build_data_schema, DataSchemaBuilder},
    human_readable_info::{BuildableHumanReadableInfo, HumanReadableInfo},
    Error, FormBuilder, FormContext,
};
use crate::thing::{
    ActionAffordance, DataSchema, DataSchemaMap, DataSchemaSubtype, DefaultedFormOperations,
    EventAffordance, Form, FormOperation, InteractionAffordance, PropertyAffordance,
};

/// The part shared by every affordance builder
#[derive(Debug, Default, Clone, PartialEq)]
pub struct InteractionAffordanceBuilder {
    info: HumanReadableInfo,
    forms: Vec<Form>,
    uri_variables: Vec<(String, Result<DataSchema, Error>)>,
}

impl InteractionAffordanceBuilder {
    fn build(self, context: FormContext) -> Result<InteractionAffordance, Error> {
        let Self {
            info,
            forms,
            uri_variables,
        } = self;

        for form in &forms {
            check_form_ops(form, &context)?;
        }

        let uri_variables = build_uri_variables(uri_variables)?;

        let HumanReadableInfo {
            attype,
            title,
            titles,
            description,
            descriptions,
        } = info;

        Ok(InteractionAffordance {
            attype,
            title,
            titles,
            description,
            descriptions,
            forms,
            uri_variables,
        })
    }
}

/// Validate and collect a list of URI variables
pub(super) fn build_uri_variables(
    uri_variables: Vec<(String, Result<DataSchema, Error>)>,
) -> Result<DataSchemaMap, Error> {
    uri_variables
        .into_iter()
        .map(|(name, schema)| {
            let schema = schema?;
            match schema.subtype {
                Some(DataSchemaSubtype::Array(_) | DataSchemaSubtype::Object(_)) => {
                    Err(Error::InvalidUriVariables)
                }
                _ => Ok((name, schema)),
            }
        })
        .collect()
}

/// Check that the explicit operations of `form` make sense where it is placed
pub(super) fn check_form_ops(form: &Form, context: &FormContext) -> Result<(), Error> {
    let ops = match &form.op {
        DefaultedFormOperations::Default if *context == FormContext::Thing => {
            return Err(Error::MissingOpInForm)
        }
        DefaultedFormOperations::Default => return Ok(()),
        DefaultedFormOperations::Custom(ops) if ops.is_empty() => {
            return Err(Error::MissingOpInForm)
        }
        DefaultedFormOperations::Custom(ops) => ops,
    };

    let allowed = |op: &FormOperation| match context {
        FormContext::Thing => op.is_thing_level(),
        FormContext::Property => matches!(
            op,
            FormOperation::ReadProperty
                | FormOperation::WriteProperty
                | FormOperation::ObserveProperty
                | FormOperation::UnobserveProperty
        ),
        FormContext::Action => matches!(
            op,
            FormOperation::InvokeAction | FormOperation::QueryAction | FormOperation::CancelAction
        ),
        FormContext::Event => matches!(
            op,
            FormOperation::SubscribeEvent | FormOperation::UnsubscribeEvent
        ),
    };

    match ops.iter().find(|op| !allowed(op)) {
        Some(&operation) => Err(Error::InvalidOpInForm {
            context: context.clone(),
            operation,
        }),
        None => Ok(()),
    }
}

/// Setters for the forms and URI variables of an affordance builder
pub trait BuildableInteractionAffordance: Sized {
    fn interaction_mut(&mut self) -> &mut InteractionAffordanceBuilder;

    /// Add a form, `href` is mandatory
    fn form<F>(mut self, f: F) -> Self
    where
        F: FnOnce(FormBuilder<()>) -> FormBuilder<String>,
    {
        let form = f(FormBuilder::new()).into_form();
        self.interaction_mut().forms.push(form);
        self
    }

    /// Declare an URI template variable
    ///
    /// Only scalar schemas are valid URI variables.
    fn uri_variable<F, T>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        let schema = build_data_schema(f);
        self.interaction_mut()
            .uri_variables
            .push((name.into(), schema));
        self
    }
}

macro_rules! impl_interaction_affordance_builder {
    ($($ty:ident),+ $(,)?) => {
        $(
            impl BuildableInteractionAffordance for $ty {
                #[inline]
                fn interaction_mut(&mut self) -> &mut InteractionAffordanceBuilder {
                    &mut self.interaction
                }
            }

            impl BuildableHumanReadableInfo for $ty {
                #[inline]
                fn info_mut(&mut self) -> &mut HumanReadableInfo {
                    &mut self.interaction.info
                }
            }
        )+
    };
}

impl_interaction_affordance_builder!(
    PropertyAffordanceBuilder,
    ActionAffordanceBuilder,
    EventAffordanceBuilder,
);

/// Builder for a [PropertyAffordance]
///
/// Without [PropertyAffordanceBuilder::schema] the property has a variable type.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PropertyAffordanceBuilder {
    interaction: InteractionAffordanceBuilder,
    data_schema: Option<Result<DataSchema, Error>>,
    observable: Option<bool>,
}

impl PropertyAffordanceBuilder {
    pub fn schema<F, T>(mut self, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        self.data_schema = Some(build_data_schema(f));
        self
    }

    pub fn observable(mut self, value: bool) -> Self {
        self.observable = Some(value);
        self
    }

    pub(super) fn build(self) -> Result<PropertyAffordance, Error> {
        let Self {
            interaction,
            data_schema,
            observable,
        } = self;

        let interaction = interaction.build(FormContext::Property)?;
        let mut data_schema = data_schema.transpose()?.unwrap_or_default();

        // The descriptive fields belong to the affordance
        data_schema.attype = None;
        data_schema.title = None;
        data_schema.titles = None;
        data_schema.description = None;
        data_schema.descriptions = None;

        Ok(PropertyAffordance {
            interaction,
            data_schema,
            observable,
        })
    }
}

/// Builder for an [ActionAffordance]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ActionAffordanceBuilder {
    interaction: InteractionAffordanceBuilder,
    input: Option<Result<DataSchema, Error>>,
    output: Option<Result<DataSchema, Error>>,
    safe: bool,
    idempotent: bool,
    synchronous: Option<bool>,
}

impl ActionAffordanceBuilder {
    pub fn input<F, T>(mut self, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        self.input = Some(build_data_schema(f));
        self
    }

    pub fn output<F, T>(mut self, f: F) -> Self
    where
        F: FnOnce(DataSchemaBuilder) -> T,
        T: Into<DataSchemaBuilder>,
    {
        self.output = Some(build_data_schema(f));
        self
    }

    pub fn safe(mut self) -> Self {
        self.safe = true;
        self
    }

    pub fn idempotent(mut self) -> Self {
        self.idempotent = true;
        self
    }

    pub fn synchronous(mut self, value: bool) -> Self {
        self.synchronous = Some(value);
        self
    }

    pub(super) fn build(self) -> Result<ActionAffordance, Error> {
        let Self {
            interaction,
            input,
            output,
            safe,
            idempotent,
            synchronous,
        } = self;

        Ok(ActionAffordance {
            interaction: interaction.build(FormContext::Action)?,
            input: input.transpose()?,
            output: output.transpose()?,
            safe,
            idempotent,
            synchronous,
        })
    }
}

/// Builder for an [EventAffordance]
#[derive(Debug, Default, Clone, PartialEq)]
pub struct EventAffordanceBuilder {
    interaction: InteractionAffordanceBuilder,
    subscription: Option<Result<DataSchema, Error>>,
    data: Option<Result<DataSchema, Error>>,
    data_response: Option<Result<DataSchema, Error>>,
    cancellation: Option<Result<DataSchema, Error>>,
}

macro_rules! event_schema_builder {
    ($($field:ident),+ $(,)?) => {
        $(
            pub fn $field<F, T>(mut self, f: F) -> Self
            where
                F: FnOnce(DataSchemaBuilder) -> T,
                T: Into<DataSchemaBuilder>,
            {
                self.$field = Some(build_data_schema(f));
                self
            }
        )+
    };
}

impl EventAffordanceBuilder {
    event_schema_builder!(subscription, data, data_response, cancellation);

    pub(super) fn build(self) -> Result<EventAffordance, Error> {
        let Self {
            interaction,
            subscription,
            data,
            data_response,
            cancellation,
        } = self;

        Ok(EventAffordance {
            interaction: interaction.build(FormContext::Event)?,
            subscription: subscription.transpose()?,
            data: data.transpose()?,
            data_response: data_response.transpose()?,
            cancellation: cancellation.transpose()?,
        })
    }
}
