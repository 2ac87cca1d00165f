//! Simulation creation parameters and their client-side validation.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::DbId;

/// Smallest shot count the server accepts.
pub const MIN_SHOTS: u32 = 5;

/// Largest shot count the server accepts.
pub const MAX_SHOTS: u32 = 100;

/// Body of `POST /simulations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct SimulationRequest {
    #[serde(rename = "stateID")]
    #[validate(range(min = 1, message = "Initial state is required"))]
    pub state_id: DbId,

    #[serde(rename = "gateID")]
    #[validate(range(min = 1, message = "Gate is required"))]
    pub gate_id: DbId,

    #[serde(rename = "numShots")]
    #[validate(range(min = 5, max = 100, message = "Number of shots must be between 5 and 100"))]
    pub num_shots: u32,
}

impl SimulationRequest {
    pub fn new(state_id: DbId, gate_id: DbId, num_shots: u32) -> Self {
        Self {
            state_id,
            gate_id,
            num_shots,
        }
    }

    /// Run the derived validators and fold failures into a single
    /// [`CoreError::Validation`].
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate().map_err(|errors| {
            let mut messages: Vec<String> = errors
                .field_errors()
                .values()
                .flat_map(|errs| errs.iter())
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect();
            messages.sort();
            CoreError::Validation(messages.join("; "))
        })
    }
}
