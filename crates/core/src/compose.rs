use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::customization::Customization;
use crate::domain::template::AgentTemplate;
use crate::domain::turn::ConversationTurn;

/// Default bound on the history tail carried into a prompt.
pub const HISTORY_TAIL_LIMIT: usize = 10;

/// Separator between the system instruction block and the dialogue.
const INSTRUCTION_TERMINATOR: &str = "---";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub user: String,
    pub agent: String,
}

/// Provider-agnostic prompt: a system block, the bounded prior dialogue in
/// chronological order, and the new user message. Adapters translate this
/// into their provider's request shape; nothing here is provider-specific.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptBundle {
    pub system: String,
    pub history: Vec<PromptTurn>,
    pub user_message: String,
    /// Caller-supplied context, carried through untouched. Adapters may
    /// forward it to providers that accept metadata; it is never parsed.
    pub context: BTreeMap<String, String>,
}

/// Builds the system block in fixed order: effective instruction, one line
/// per non-default override (style, focus, mode, language), terminator.
/// Instruction text is opaque; it is concatenated, never parsed.
pub fn compose(
    template: &AgentTemplate,
    customization: &Customization,
    history_tail: &[ConversationTurn],
    user_message: &str,
) -> PromptBundle {
    compose_bounded(
        template,
        customization,
        history_tail,
        user_message,
        BTreeMap::new(),
        HISTORY_TAIL_LIMIT,
    )
}

pub fn compose_bounded(
    template: &AgentTemplate,
    customization: &Customization,
    history_tail: &[ConversationTurn],
    user_message: &str,
    context: BTreeMap<String, String>,
    max_history: usize,
) -> PromptBundle {
    let mut system = String::new();
    system.push_str(customization.effective_instruction(&template.base_instruction));

    let overrides = &customization.overrides;
    for directive in [
        overrides.style.directive().map(str::to_string),
        overrides.focus.directive(),
        overrides.mode.directive().map(str::to_string),
        overrides.language.directive(),
    ]
    .into_iter()
    .flatten()
    {
        system.push('\n');
        system.push_str(&directive);
    }

    system.push('\n');
    system.push_str(INSTRUCTION_TERMINATOR);

    let skip = history_tail.len().saturating_sub(max_history);
    let history = history_tail[skip..]
        .iter()
        .map(|turn| PromptTurn { user: turn.user_text.clone(), agent: turn.agent_text.clone() })
        .collect();

    PromptBundle { system, history, user_message: user_message.to_string(), context }
}
