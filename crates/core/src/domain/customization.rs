use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::overrides::OverrideSet;
use super::template::{ModelId, TemplateId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomizationId(pub String);

/// A buyer's bound instance of one template. A user may own several
/// customizations of the same template; each carries its own API key and
/// its own conversation history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customization {
    pub id: CustomizationId,
    pub user_id: UserId,
    pub template_id: TemplateId,
    pub display_name: Option<String>,
    /// Empty or absent falls back to the template's base instruction.
    pub instruction_override: Option<String>,
    /// Fixed at creation; must be in the template's permitted set.
    pub model: ModelId,
    pub overrides: OverrideSet,
    /// SHA-256 digest of the API key. The raw key is never persisted.
    pub api_key_digest: String,
    pub created_at: DateTime<Utc>,
}

impl Customization {
    /// The instruction text the composer should use, after fallback.
    pub fn effective_instruction<'a>(&'a self, base_instruction: &'a str) -> &'a str {
        match self.instruction_override.as_deref() {
            Some(text) if !text.trim().is_empty() => text,
            _ => base_instruction,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::super::overrides::OverrideSet;
    use super::super::template::{ModelId, TemplateId, UserId};
    use super::{Customization, CustomizationId};

    fn customization(instruction_override: Option<&str>) -> Customization {
        Customization {
            id: CustomizationId("cst-1".to_string()),
            user_id: UserId("u-1".to_string()),
            template_id: TemplateId("tpl-legal".to_string()),
            display_name: None,
            instruction_override: instruction_override.map(str::to_string),
            model: ModelId("gpt-4o-mini".to_string()),
            overrides: OverrideSet::default(),
            api_key_digest: "digest".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_override_falls_back_to_base_instruction() {
        assert_eq!(customization(None).effective_instruction("base"), "base");
        assert_eq!(customization(Some("")).effective_instruction("base"), "base");
        assert_eq!(customization(Some("   ")).effective_instruction("base"), "base");
    }

    #[test]
    fn non_empty_override_wins() {
        assert_eq!(customization(Some("custom")).effective_instruction("base"), "custom");
    }
}
