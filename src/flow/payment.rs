use crate::core::types::InboundEvent;
use crate::core::validation::ValidationError;
use crate::flow::{reprompt_or, require_photo, Completion, Transition};
use crate::session::FlowStep;

pub(super) fn advance(step: &FlowStep, event: &InboundEvent) -> Transition {
    match step {
        FlowStep::PaymentAwaitingProof { store_id, plan } => reprompt_or(require_photo(event), |file_id| {
            Transition::Complete(Completion::SubmitPayment {
                store_id: *store_id,
                plan: *plan,
                proof_file_id: file_id.to_string(),
            })
        }),
        _ => Transition::Reprompt(ValidationError::ExpectedPhoto),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::plan::PlanType;

    #[test]
    fn test_payment_requires_photo() {
        let step = FlowStep::PaymentAwaitingProof {
            store_id: 3,
            plan: PlanType::Pro,
        };
        assert_eq!(
            advance(&step, &InboundEvent::text(1, 1, "I paid yesterday")),
            Transition::Reprompt(ValidationError::ExpectedPhoto)
        );
        assert_eq!(
            advance(&step, &InboundEvent::photo(1, 1, "receipt")),
            Transition::Complete(Completion::SubmitPayment {
                store_id: 3,
                plan: PlanType::Pro,
                proof_file_id: "receipt".to_string(),
            })
        );
    }
}
