use thiserror::Error;

use crate::pre::DType;

// no partially built schedule escapes an error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("unsupported layout `{0}`, expected a packed layout such as NCHW1n16c")]
    UnsupportedLayout(String),
    #[error("unsupported dilation {0:?}, only (1, 1) is supported")]
    UnsupportedDilation([usize; 2]),
    #[error("malformed graph: {0}")]
    MalformedGraph(String),
    #[error("infeasible tiling for `{name}`: {outer} x {inner} cannot cover extent {extent}")]
    InfeasibleTiling { name: String, extent: usize, outer: usize, inner: usize },
    #[error("invalid shape: {0}")]
    InvalidShape(String),
    #[error("unsupported dtype {0:?}, accumulation must be integral")]
    UnsupportedDtype(DType),
    #[error("unknown tunable `{0}`")]
    UnknownTunable(String),
    #[error("invalid axis: {0}")]
    InvalidAxis(String),
    #[error("tensorize mismatch: {0}")]
    IntrinsicMismatch(String),
    #[error("invalid hardware config: {0}")]
    Config(String),
}

pub type Result<T, E = ScheduleError> = std::result::Result<T, E>;
