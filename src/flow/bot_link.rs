use crate::core::types::InboundEvent;
use crate::core::validation::{self, ValidationError};
use crate::flow::{reprompt_or, require_text, Completion, Transition};
use crate::session::FlowStep;

pub(super) fn advance(step: &FlowStep, event: &InboundEvent) -> Transition {
    match step {
        FlowStep::BotLinkAwaitingToken { store_id } => reprompt_or(
            require_text(event).and_then(validation::bot_token),
            |token| {
                Transition::Complete(Completion::LinkBot {
                    store_id: *store_id,
                    token,
                })
            },
        ),
        _ => Transition::Reprompt(ValidationError::ExpectedText),
    }
}
