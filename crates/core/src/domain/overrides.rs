use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("invalid override `{field}`: `{value}`")]
pub struct InvalidOverride {
    pub field: &'static str,
    pub value: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStyle {
    #[default]
    Professional,
    Creative,
    Analytical,
    Conversational,
}

impl ResponseStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Professional => "professional",
            Self::Creative => "creative",
            Self::Analytical => "analytical",
            Self::Conversational => "conversational",
        }
    }

    /// Directive line emitted into the system block for non-default choices.
    pub fn directive(&self) -> Option<&'static str> {
        match self {
            Self::Professional => None,
            Self::Creative => Some("Favor creative, exploratory answers."),
            Self::Analytical => Some("Answer analytically, showing your reasoning step by step."),
            Self::Conversational => Some("Keep the tone informal and conversational."),
        }
    }
}

impl std::str::FromStr for ResponseStyle {
    type Err = InvalidOverride;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "professional" => Ok(Self::Professional),
            "creative" => Ok(Self::Creative),
            "analytical" => Ok(Self::Analytical),
            "conversational" => Ok(Self::Conversational),
            other => Err(InvalidOverride { field: "response_style", value: other.to_string() }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpertiseFocus {
    #[default]
    General,
    Finance,
    Healthcare,
    Technology,
    Legal,
    Marketing,
}

impl ExpertiseFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Finance => "finance",
            Self::Healthcare => "healthcare",
            Self::Technology => "technology",
            Self::Legal => "legal",
            Self::Marketing => "marketing",
        }
    }

    pub fn directive(&self) -> Option<String> {
        match self {
            Self::General => None,
            other => Some(format!("Weight your expertise toward {}.", other.as_str())),
        }
    }
}

impl std::str::FromStr for ExpertiseFocus {
    type Err = InvalidOverride;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "general" => Ok(Self::General),
            "finance" => Ok(Self::Finance),
            "healthcare" => Ok(Self::Healthcare),
            "technology" => Ok(Self::Technology),
            "legal" => Ok(Self::Legal),
            "marketing" => Ok(Self::Marketing),
            other => Err(InvalidOverride { field: "expertise_focus", value: other.to_string() }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionMode {
    #[default]
    Comprehensive,
    Concise,
    Interactive,
}

impl InteractionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Comprehensive => "comprehensive",
            Self::Concise => "concise",
            Self::Interactive => "interactive",
        }
    }

    pub fn directive(&self) -> Option<&'static str> {
        match self {
            Self::Comprehensive => None,
            Self::Concise => Some("Keep answers short; omit preamble."),
            Self::Interactive => Some("Ask a clarifying question whenever the request is underspecified."),
        }
    }
}

impl std::str::FromStr for InteractionMode {
    type Err = InvalidOverride;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "comprehensive" => Ok(Self::Comprehensive),
            "concise" => Ok(Self::Concise),
            "interactive" => Ok(Self::Interactive),
            other => Err(InvalidOverride { field: "interaction_mode", value: other.to_string() }),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    #[default]
    En,
    De,
    Fr,
    Es,
    Zh,
    Ja,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::En => "en",
            Self::De => "de",
            Self::Fr => "fr",
            Self::Es => "es",
            Self::Zh => "zh",
            Self::Ja => "ja",
        }
    }

    fn display_name(&self) -> &'static str {
        match self {
            Self::En => "English",
            Self::De => "German",
            Self::Fr => "French",
            Self::Es => "Spanish",
            Self::Zh => "Chinese",
            Self::Ja => "Japanese",
        }
    }

    /// English is the default working language and emits no directive.
    pub fn directive(&self) -> Option<String> {
        match self {
            Self::En => None,
            other => Some(format!("Respond in {}.", other.display_name())),
        }
    }
}

impl std::str::FromStr for Language {
    type Err = InvalidOverride;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "en" => Ok(Self::En),
            "de" => Ok(Self::De),
            "fr" => Ok(Self::Fr),
            "es" => Ok(Self::Es),
            "zh" => Ok(Self::Zh),
            "ja" => Ok(Self::Ja),
            other => Err(InvalidOverride { field: "language", value: other.to_string() }),
        }
    }
}

/// The buyer-supplied knobs on a customization. Every field is drawn from a
/// closed enumeration; unknown values are rejected at the boundary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideSet {
    pub style: ResponseStyle,
    pub focus: ExpertiseFocus,
    pub mode: InteractionMode,
    pub language: Language,
}

#[cfg(test)]
mod tests {
    use super::{ExpertiseFocus, InteractionMode, Language, OverrideSet, ResponseStyle};

    #[test]
    fn unknown_values_fail_fast() {
        assert!("sarcastic".parse::<ResponseStyle>().is_err());
        assert!("astrology".parse::<ExpertiseFocus>().is_err());
        assert!("verbose".parse::<InteractionMode>().is_err());
        assert!("tlh".parse::<Language>().is_err());
    }

    #[test]
    fn parsing_is_case_insensitive() {
        assert_eq!("Analytical".parse::<ResponseStyle>().unwrap(), ResponseStyle::Analytical);
        assert_eq!(" DE ".parse::<Language>().unwrap(), Language::De);
    }

    #[test]
    fn defaults_emit_no_directive() {
        let defaults = OverrideSet::default();
        assert!(defaults.style.directive().is_none());
        assert!(defaults.focus.directive().is_none());
        assert!(defaults.mode.directive().is_none());
        assert!(defaults.language.directive().is_none());
    }

    #[test]
    fn non_defaults_emit_one_directive_each() {
        assert!(ResponseStyle::Analytical.directive().is_some());
        assert_eq!(Language::De.directive().as_deref(), Some("Respond in German."));
        assert_eq!(
            ExpertiseFocus::Finance.directive().as_deref(),
            Some("Weight your expertise toward finance.")
        );
    }

    #[test]
    fn invalid_override_error_names_the_field() {
        let err = "pirate".parse::<ResponseStyle>().unwrap_err();
        assert_eq!(err.field, "response_style");
        assert_eq!(err.value, "pirate");
    }
}
