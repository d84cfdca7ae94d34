//! Typed flow steps and their on-disk encoding.
//!
//! A session is stored as a state name plus an optional JSON payload. The
//! pair is decoded back into exactly one `FlowStep` variant; anything that
//! does not fit (unknown state, missing or mistyped fields) is reported as
//! `SessionError::Corrupt`.

use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::core::plan::PlanType;
use crate::core::types::StoreId;
use crate::session::SessionError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(tag = "state", content = "payload", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FlowStep {
    // Registration
    RegistrationAwaitingName,
    RegistrationAwaitingDescription {
        name: String,
    },
    RegistrationAwaitingPlan {
        name: String,
        description: String,
    },

    // Payment proof
    PaymentAwaitingProof {
        store_id: StoreId,
        plan: PlanType,
    },

    // Product entry
    ProductAwaitingName {
        store_id: StoreId,
    },
    ProductAwaitingDescription {
        store_id: StoreId,
        name: String,
    },
    ProductAwaitingPrice {
        store_id: StoreId,
        name: String,
        description: String,
    },
    ProductAwaitingImage {
        store_id: StoreId,
        name: String,
        description: String,
        price: i64,
    },

    // Tenant bot credential
    BotLinkAwaitingToken {
        store_id: StoreId,
    },

    // Storefront checkout
    CheckoutAwaitingPhone {
        product_id: i64,
    },
    CheckoutAwaitingAddress {
        product_id: i64,
        phone: String,
    },
}

impl FlowStep {
    /// Name stored in the `state` column.
    pub fn state_name(&self) -> &'static str {
        self.into()
    }

    /// Splits the step into its state name and JSON payload (None for steps
    /// that carry no data).
    pub fn encode(&self) -> Result<(String, Option<String>), SessionError> {
        let value = serde_json::to_value(self).map_err(|e| SessionError::Corrupt(e.to_string()))?;
        let payload = match value.get("payload") {
            None | Some(serde_json::Value::Null) => None,
            Some(payload) => Some(payload.to_string()),
        };
        Ok((self.state_name().to_string(), payload))
    }

    pub fn decode(state: &str, payload: Option<&str>) -> Result<Self, SessionError> {
        let mut object = serde_json::Map::new();
        object.insert("state".to_string(), serde_json::Value::from(state));
        if let Some(raw) = payload {
            let parsed: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| SessionError::Corrupt(format!("state {}: unreadable payload: {}", state, e)))?;
            if !parsed.is_null() {
                object.insert("payload".to_string(), parsed);
            }
        }
        serde_json::from_value(serde_json::Value::Object(object))
            .map_err(|e| SessionError::Corrupt(format!("state {}: {}", state, e)))
    }
}
