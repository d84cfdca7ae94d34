//! Flow definitions: which step follows which, and what each step accepts.
//!
//! Flows own no storage. `advance` looks at the current step and the inbound
//! event and returns a `Transition`; the router persists the result and the
//! bot-specific handler performs completions.

mod bot_link;
mod checkout;
mod payment;
mod product;
mod registration;

pub use product::SKIP_IMAGE_ACTION;

use strum::{AsRefStr, Display};

use crate::core::plan::PlanType;
use crate::core::types::{InboundEvent, StoreId};
use crate::core::validation::ValidationError;
use crate::session::FlowStep;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Flow {
    Registration,
    PaymentProof,
    ProductEntry,
    BotLink,
    Checkout,
}

impl FlowStep {
    pub fn flow(&self) -> Flow {
        match self {
            FlowStep::RegistrationAwaitingName
            | FlowStep::RegistrationAwaitingDescription { .. }
            | FlowStep::RegistrationAwaitingPlan { .. } => Flow::Registration,
            FlowStep::PaymentAwaitingProof { .. } => Flow::PaymentProof,
            FlowStep::ProductAwaitingName { .. }
            | FlowStep::ProductAwaitingDescription { .. }
            | FlowStep::ProductAwaitingPrice { .. }
            | FlowStep::ProductAwaitingImage { .. } => Flow::ProductEntry,
            FlowStep::BotLinkAwaitingToken { .. } => Flow::BotLink,
            FlowStep::CheckoutAwaitingPhone { .. } | FlowStep::CheckoutAwaitingAddress { .. } => Flow::Checkout,
        }
    }
}

/// Terminal action of a flow, carried out by the bot's handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    CreateStore {
        name: String,
        description: String,
        plan: PlanType,
    },
    SubmitPayment {
        store_id: StoreId,
        plan: PlanType,
        proof_file_id: String,
    },
    CreateProduct {
        store_id: StoreId,
        name: String,
        description: String,
        price: i64,
        image_file_id: Option<String>,
    },
    LinkBot {
        store_id: StoreId,
        token: String,
    },
    PlaceOrder {
        product_id: i64,
        phone: String,
        address: String,
    },
}

impl Completion {
    pub fn flow(&self) -> Flow {
        match self {
            Completion::CreateStore { .. } => Flow::Registration,
            Completion::SubmitPayment { .. } => Flow::PaymentProof,
            Completion::CreateProduct { .. } => Flow::ProductEntry,
            Completion::LinkBot { .. } => Flow::BotLink,
            Completion::PlaceOrder { .. } => Flow::Checkout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Input rejected; the session stays where it is.
    Reprompt(ValidationError),
    /// Input accepted; move to the next step.
    Advance(FlowStep),
    /// Last step accepted; perform the completion.
    Complete(Completion),
}

pub fn advance(step: &FlowStep, event: &InboundEvent) -> Transition {
    match step.flow() {
        Flow::Registration => registration::advance(step, event),
        Flow::PaymentProof => payment::advance(step, event),
        Flow::ProductEntry => product::advance(step, event),
        Flow::BotLink => bot_link::advance(step, event),
        Flow::Checkout => checkout::advance(step, event),
    }
}

/// Whether `command` is an answer to `step` rather than a request to do
/// something else. Only the image step takes one, `/skip`.
pub fn accepts_command(step: &FlowStep, command: &str) -> bool {
    matches!(step, FlowStep::ProductAwaitingImage { .. }) && command == product::SKIP_COMMAND
}

/// Text input for a step, or the re-prompt to send when there is none.
fn require_text(event: &InboundEvent) -> Result<&str, ValidationError> {
    event.message_text().ok_or(ValidationError::ExpectedText)
}

fn require_photo(event: &InboundEvent) -> Result<&str, ValidationError> {
    event.photo_file_id().ok_or(ValidationError::ExpectedPhoto)
}

fn reprompt_or<T>(result: Result<T, ValidationError>, next: impl FnOnce(T) -> Transition) -> Transition {
    match result {
        Ok(value) => next(value),
        Err(e) => Transition::Reprompt(e),
    }
}
