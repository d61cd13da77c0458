use thiserror::Error;

/// Errors raised while building an NHDRRNet or validating its inputs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NhdrrNetError {
    #[error("kernel {kernel:?} is smaller than stride {stride:?}, padding would be negative")]
    NegativePadding { kernel: [usize; 2], stride: [usize; 2] },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{input} has {actual} channels, expected {expected}")]
    ChannelMismatch {
        input: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("spatial size {height}x{width} is not a multiple of {multiple}")]
    SpatialMismatch {
        height: usize,
        width: usize,
        multiple: usize,
    },

    #[error("LDR input {ldr:?} and HDR input {hdr:?} differ in shape")]
    InputShapeMismatch { ldr: [usize; 4], hdr: [usize; 4] },

    #[error("logging has already been initialised")]
    LoggingInitialised,

    #[error("failed to install the log subscriber: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, NhdrrNetError>;
