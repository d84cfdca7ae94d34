use crate::core::types::InboundEvent;
use crate::core::validation::{self, ValidationError};
use crate::flow::{reprompt_or, require_text, Completion, Transition};
use crate::session::FlowStep;

pub(super) fn advance(step: &FlowStep, event: &InboundEvent) -> Transition {
    match step {
        FlowStep::CheckoutAwaitingPhone { product_id } => {
            reprompt_or(require_text(event).and_then(validation::phone), |phone| {
                Transition::Advance(FlowStep::CheckoutAwaitingAddress {
                    product_id: *product_id,
                    phone,
                })
            })
        }
        FlowStep::CheckoutAwaitingAddress { product_id, phone } => {
            reprompt_or(require_text(event).and_then(validation::address), |address| {
                Transition::Complete(Completion::PlaceOrder {
                    product_id: *product_id,
                    phone: phone.clone(),
                    address,
                })
            })
        }
        _ => Transition::Reprompt(ValidationError::ExpectedText),
    }
}
