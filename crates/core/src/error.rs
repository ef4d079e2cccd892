use crate::{DeviceReference, EffectId, GridDimensions, GridPosition};

/// Result alias that carries the custom [`SpatialError`] type.
pub type Result<T> = std::result::Result<T, SpatialError>;

/// Common error type for the core crate.
///
/// Nothing in the core is fatal: every variant is reported to observers and
/// the failing call falls back to a harmless value.
#[derive(Debug, thiserror::Error)]
pub enum SpatialError {
    /// Free-form message for failures without a dedicated variant.
    #[error("{0}")]
    Message(String),
    #[error("position {position} is outside the {dimensions} grid")]
    OutOfBounds {
        position: GridPosition,
        dimensions: GridDimensions,
    },
    #[error("grid dimensions must be positive, got {0}")]
    InvalidDimensions(GridDimensions),
    #[error("no assignment #{index} at {position} (holds {len})")]
    InvalidIndex {
        position: GridPosition,
        index: usize,
        len: usize,
    },
    #[error("no device controller is bound")]
    NoDeviceController,
    #[error("device rejected color write for {reference}")]
    DeviceWrite { reference: DeviceReference },
    #[error("effect `{0}` is not registered")]
    UnknownEffect(EffectId),
    #[error("effect `{0}` is already registered")]
    DuplicateEffect(EffectId),
    #[error("effect `{0}` needs a reference point but none is set")]
    MissingReferencePoint(EffectId),
    #[error("{reference} is already driven by effect `{owner}`")]
    DeviceAlreadyBound {
        reference: DeviceReference,
        owner: EffectId,
    },
    #[error("effect `{id}` failed: {reason}")]
    EffectFault { id: EffectId, reason: String },
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Serialization(#[from] serde_json::Error),
}

impl SpatialError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Validation failures are caused by caller input rather than runtime state.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::OutOfBounds { .. } | Self::InvalidDimensions(_) | Self::InvalidIndex { .. }
        )
    }
}

impl From<&str> for SpatialError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SpatialError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_out_of_bounds() {
        let err = SpatialError::OutOfBounds {
            position: GridPosition::new(3, 0, 0),
            dimensions: GridDimensions::default(),
        };
        let text = err.to_string();
        assert!(text.contains("(3, 0, 0)"));
        assert!(text.contains("3x3x3"));
        assert!(err.is_validation());
    }

    #[test]
    fn message_conversions() {
        let err: SpatialError = "boom".into();
        assert_eq!(err.to_string(), "boom");
        assert!(!err.is_validation());
    }
}
