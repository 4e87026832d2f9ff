use crate::thing::MultiLanguage;

use super::MultiLanguageBuilder;

/// The descriptive fields shared by Things, affordances and data schemas
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HumanReadableInfo {
    pub(super) attype: Option<Vec<String>>,
    pub(super) title: Option<String>,
    pub(super) titles: Option<MultiLanguage>,
    pub(super) description: Option<String>,
    pub(super) descriptions: Option<MultiLanguage>,
}

/// Setters for the [HumanReadableInfo] of a builder
pub trait BuildableHumanReadableInfo: Sized {
    fn info_mut(&mut self) -> &mut HumanReadableInfo;

    /// Add a JSON-LD semantic type
    fn attype(mut self, value: impl Into<String>) -> Self {
        self.info_mut()
            .attype
            .get_or_insert_with(Default::default)
            .push(value.into());
        self
    }

    fn title(mut self, value: impl Into<String>) -> Self {
        self.info_mut().title = Some(value.into());
        self
    }

    fn titles<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut MultiLanguageBuilder) -> &mut MultiLanguageBuilder,
    {
        let mut builder = MultiLanguageBuilder::default();
        f(&mut builder);
        self.info_mut().titles = Some(builder.values);
        self
    }

    fn description(mut self, value: impl Into<String>) -> Self {
        self.info_mut().description = Some(value.into());
        self
    }

    fn descriptions<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut MultiLanguageBuilder) -> &mut MultiLanguageBuilder,
    {
        let mut builder = MultiLanguageBuilder::default();
        f(&mut builder);
        self.info_mut().descriptions = Some(builder.values);
        self
    }
}

impl BuildableHumanReadableInfo for HumanReadableInfo {
    #[inline]
    fn info_mut(&mut self) -> &mut HumanReadableInfo {
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn setters() {
        let info = HumanReadableInfo::default()
            .attype("saref:LightSwitch")
            .attype("Thing")
            .title("Lamp")
            .titles(|b| b.add("it", "Lampada").add("en", "Lamp"))
            .description("A lamp");

        assert_eq!(
            info.attype.as_deref(),
            Some(&["saref:LightSwitch".to_string(), "Thing".to_string()][..])
        );
        assert_eq!(info.title.as_deref(), Some("Lamp"));
        assert_eq!(info.titles.as_ref().unwrap()["it"], "Lampada");
        assert_eq!(info.description.as_deref(), Some("A lamp"));
        assert_eq!(info.descriptions, None);
    }
}
