/// Failures surfaced synchronously by the simulation core. No partial results
/// accompany an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimulationError {
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: &'static str,
    },

    #[error("capital overflowed to a non-finite value in year {year}")]
    NumericOverflow { year: u32 },

    #[error("simulation cancelled")]
    Cancelled,
}

impl SimulationError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str) -> Self {
        SimulationError::InvalidParameter { name, reason }
    }
}
