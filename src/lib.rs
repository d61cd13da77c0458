//! NHDRRNet: three-exposure HDR image fusion network built on Burn.

// Stride-aware "same" padded convolution
pub mod padded_conv;

// Network blocks
pub mod encoder;
pub mod triple_pass;
pub mod non_local;
pub mod decoder;

// Core modules
pub mod device;
pub mod error;
pub mod logging;
pub mod model;

pub mod benchmark;

pub use error::NhdrrNetError;
pub use model::{EXPOSURES, ForwardTrace, NhdrrNet, NhdrrNetConfig, split_exposures};
pub use padded_conv::{PaddedConv2d, PaddedConv2dConfig};
