use crate::core::types::InboundEvent;
use crate::core::validation::{self, ValidationError};
use crate::flow::{reprompt_or, require_text, Completion, Transition};
use crate::session::FlowStep;

/// Button that finishes product entry without an image.
pub const SKIP_IMAGE_ACTION: &str = "skip_image";

pub(super) fn advance(step: &FlowStep, event: &InboundEvent) -> Transition {
    match step {
        FlowStep::ProductAwaitingName { store_id } => reprompt_or(
            require_text(event).and_then(validation::product_name),
            |name| {
                Transition::Advance(FlowStep::ProductAwaitingDescription {
                    store_id: *store_id,
                    name,
                })
            },
        ),
        FlowStep::ProductAwaitingDescription { store_id, name } => reprompt_or(
            require_text(event).and_then(validation::product_description),
            |description| {
                Transition::Advance(FlowStep::ProductAwaitingPrice {
                    store_id: *store_id,
                    name: name.clone(),
                    description,
                })
            },
        ),
        FlowStep::ProductAwaitingPrice {
            store_id,
            name,
            description,
        } => reprompt_or(require_text(event).and_then(validation::price), |price| {
            Transition::Advance(FlowStep::ProductAwaitingImage {
                store_id: *store_id,
                name: name.clone(),
                description: description.clone(),
                price,
            })
        }),
        FlowStep::ProductAwaitingImage {
            store_id,
            name,
            description,
            price,
        } => {
            let image = if let Some(file_id) = event.photo_file_id() {
                Some(Some(file_id.to_string()))
            } else if wants_skip(event) {
                Some(None)
            } else {
                None
            };
            match image {
                Some(image_file_id) => Transition::Complete(Completion::CreateProduct {
                    store_id: *store_id,
                    name: name.clone(),
                    description: description.clone(),
                    price: *price,
                    image_file_id,
                }),
                None => Transition::Reprompt(ValidationError::ExpectedPhoto),
            }
        }
        _ => Transition::Reprompt(ValidationError::ExpectedText),
    }
}

pub(crate) const SKIP_COMMAND: &str = "skip";

fn wants_skip(event: &InboundEvent) -> bool {
    event.action_id() == Some(SKIP_IMAGE_ACTION)
        || matches!(event.command(), Some((SKIP_COMMAND, _)))
        || event.message_text().is_some_and(|t| t.eq_ignore_ascii_case("skip"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_step() -> FlowStep {
        FlowStep::ProductAwaitingImage {
            store_id: 1,
            name: "Mug".to_string(),
            description: "Blue mug".to_string(),
            price: 25_000,
        }
    }

    #[test]
    fn test_price_step() {
        let step = FlowStep::ProductAwaitingPrice {
            store_id: 1,
            name: "Mug".to_string(),
            description: "Blue mug".to_string(),
        };
        assert_eq!(advance(&step, &InboundEvent::text(1, 1, "25,000")), Transition::Advance(image_step()));
        assert_eq!(
            advance(&step, &InboundEvent::text(1, 1, "0")),
            Transition::Reprompt(ValidationError::PriceOutOfRange)
        );
        // A photo where a price is expected does not advance
        assert_eq!(
            advance(&step, &InboundEvent::photo(1, 1, "p")),
            Transition::Reprompt(ValidationError::ExpectedText)
        );
    }

    #[test]
    fn test_image_or_skip() {
        assert!(matches!(
            advance(&image_step(), &InboundEvent::photo(1, 1, "img-1")),
            Transition::Complete(Completion::CreateProduct { image_file_id: Some(ref id), .. }) if id == "img-1"
        ));
        assert!(matches!(
            advance(&image_step(), &InboundEvent::text(1, 1, "/skip")),
            Transition::Complete(Completion::CreateProduct { image_file_id: None, .. })
        ));
        assert!(matches!(
            advance(&image_step(), &InboundEvent::callback(1, 1, "cb", SKIP_IMAGE_ACTION)),
            Transition::Complete(Completion::CreateProduct { image_file_id: None, .. })
        ));
        assert_eq!(
            advance(&image_step(), &InboundEvent::text(1, 1, "here it is")),
            Transition::Reprompt(ValidationError::ExpectedPhoto)
        );
    }
}
