use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// Frontier exhausted or iteration budget spent. Recoverable.
    #[error("no path found for net {net} after {iterations} iterations")]
    NoPathFound { net: String, iterations: u32 },
    /// Invalid parameters for the call.
    #[error("invalid configuration: {0}")]
    Configuration(String),
    /// Self-contradictory geometry for a net or pair.
    #[error("inconsistent geometry for {net}: {detail}")]
    GeometryInconsistency { net: String, detail: String },
}

impl RouterError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn geometry(net: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::GeometryInconsistency {
            net: net.into(),
            detail: detail.into(),
        }
    }

    /// Whether the batch should simply mark the net failed and move on.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoPathFound { .. })
    }
}
