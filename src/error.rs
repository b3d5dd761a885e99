//! Errors
//!
//! Every failure aborts the whole conversion; there is no partial result.
use thiserror::Error;

pub type Result<T, E = ConvertError> = std::result::Result<T, E>;

/// Errors that can occur while converting a forest into automata tables.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// A tree node violates the shape of a decision tree.
    #[error("malformed model: tree {tree}, node {node}: {reason}")]
    MalformedModel {
        tree: usize,
        node: usize,
        reason: String,
    },
    /// A split refers to a feature outside the declared feature range.
    #[error("malformed model: tree {tree}, node {node} splits on feature {feature} but the model declares {num_feature} features")]
    FeatureOutOfRange {
        tree: usize,
        node: usize,
        feature: usize,
        num_feature: usize,
    },
    /// The model uses a comparison operator that has no encoding.
    #[error("unsupported comparison operator {0}")]
    UnsupportedComparison(String),
    /// A chain node carries a threshold the registry never saw.
    #[error("threshold {threshold} of feature {feature} is not registered in the feature table")]
    ThresholdNotRegistered { feature: usize, threshold: f64 },
    /// A feature is referenced but has no place in the feature table.
    #[error("feature {0} is not present in the feature table")]
    UnknownFeature(usize),
    /// A single feature cannot be laid out in any number of bins.
    #[error("feature {feature} with {thresholds} thresholds cannot be packed into bins of capacity {capacity}")]
    CapacityExhausted {
        feature: usize,
        thresholds: usize,
        capacity: usize,
    },
    /// Small-feature packing did not settle within the allowed bin-count increments.
    #[error("bin packing did not converge after {attempts} attempts (last tried {bins} bins)")]
    BalanceNotConverged { attempts: usize, bins: usize },
    /// The packed table does not reproduce the registered thresholds.
    #[error("feature table verification failed for feature {feature}: {detail}")]
    VerificationMismatch { feature: usize, detail: String },
    /// Bin capacity outside of what a byte-wide alphabet can address.
    #[error("invalid bin capacity {0}, expected a value in 2..=254")]
    InvalidCapacity(usize),
    /// An input row is too narrow for the features in the table.
    #[error("row {row} has {found} values but feature {feature} is required")]
    RowWidth {
        row: usize,
        feature: usize,
        found: usize,
    },
    /// NaN has no position among the thresholds of a feature.
    #[error("row {row} holds NaN for feature {feature}")]
    NanValue { row: usize, feature: usize },
    /// A chain reports a leaf value that the value map does not know.
    #[error("leaf value {0} has no report code")]
    UnmappedValue(String),
    /// A NumPy input file that is not a C-ordered little-endian f64 matrix.
    #[error("invalid NumPy file: {0}")]
    InvalidNumpy(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
