use crate::core::plan::PlanType;
use crate::core::types::InboundEvent;
use crate::core::validation::{self, ValidationError};
use crate::flow::{reprompt_or, require_text, Completion, Transition};
use crate::session::FlowStep;

pub(super) fn advance(step: &FlowStep, event: &InboundEvent) -> Transition {
    match step {
        FlowStep::RegistrationAwaitingName => reprompt_or(
            require_text(event).and_then(validation::store_name),
            |name| Transition::Advance(FlowStep::RegistrationAwaitingDescription { name }),
        ),
        FlowStep::RegistrationAwaitingDescription { name } => reprompt_or(
            require_text(event).and_then(validation::store_description),
            |description| {
                Transition::Advance(FlowStep::RegistrationAwaitingPlan {
                    name: name.clone(),
                    description,
                })
            },
        ),
        FlowStep::RegistrationAwaitingPlan { name, description } => {
            reprompt_or(selected_plan(event), |plan| {
                Transition::Complete(Completion::CreateStore {
                    name: name.clone(),
                    description: description.clone(),
                    plan,
                })
            })
        }
        _ => Transition::Reprompt(ValidationError::ExpectedText),
    }
}

/// A plan button (`plan_pro`) or the plan typed out (`pro`).
fn selected_plan(event: &InboundEvent) -> Result<PlanType, ValidationError> {
    let chosen = match event.action_id() {
        Some(action) => PlanType::from_action(action),
        None => event.message_text().and_then(|t| t.parse().ok()),
    };
    chosen.ok_or(ValidationError::UnknownPlan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::advance as run;

    #[test]
    fn test_registration_happy_path() {
        let step = FlowStep::RegistrationAwaitingName;
        let Transition::Advance(step) = run(&step, &InboundEvent::text(1, 1, "My Shop")) else {
            panic!("name should be accepted");
        };
        assert_eq!(
            step,
            FlowStep::RegistrationAwaitingDescription {
                name: "My Shop".to_string()
            }
        );

        let description = "d".repeat(50);
        let Transition::Advance(step) = run(&step, &InboundEvent::text(1, 1, description.clone())) else {
            panic!("description should be accepted");
        };

        let done = run(&step, &InboundEvent::callback(1, 1, "cb", "plan_free"));
        assert_eq!(
            done,
            Transition::Complete(Completion::CreateStore {
                name: "My Shop".to_string(),
                description,
                plan: PlanType::Free,
            })
        );
    }

    #[test]
    fn test_rejections_keep_step() {
        let step = FlowStep::RegistrationAwaitingName;
        assert!(matches!(
            run(&step, &InboundEvent::text(1, 1, "ab")),
            Transition::Reprompt(ValidationError::TooShort { .. })
        ));
        assert_eq!(
            run(&step, &InboundEvent::photo(1, 1, "photo")),
            Transition::Reprompt(ValidationError::ExpectedText)
        );

        let step = FlowStep::RegistrationAwaitingPlan {
            name: "My Shop".to_string(),
            description: "A shop that sells things".to_string(),
        };
        assert_eq!(
            run(&step, &InboundEvent::text(1, 1, "platinum")),
            Transition::Reprompt(ValidationError::UnknownPlan)
        );
        assert!(matches!(
            run(&step, &InboundEvent::text(1, 1, "VIP")),
            Transition::Complete(Completion::CreateStore { plan: PlanType::Vip, .. })
        ));
    }
}
