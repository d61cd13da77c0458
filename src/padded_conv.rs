//! Convolution with stride-determined "same" padding.
//!
//! The input is zero padded before a valid convolution so that every spatial
//! axis shrinks to `ceil(size / stride)`, whatever the kernel size. The base
//! padding along an axis is `kernel - stride`, split with the smaller half
//! before (top/left) and the rest after (bottom/right). When a size is not a
//! multiple of the stride the missing rows/columns are added after.

use burn::{
    nn::{
        Initializer, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

use crate::error::{self, NhdrrNetError};

#[derive(Config, Debug)]
pub struct PaddedConv2dConfig {
    pub channels: [usize; 2],
    pub kernel_size: [usize; 2],
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],
    /// Weight and bias initializer; `None` keeps the framework default.
    #[config(default = "None")]
    pub initializer: Option<Initializer>,
}

impl PaddedConv2dConfig {
    /// Square kernel and stride, the form every layer of the network uses.
    pub fn square(input: usize, output: usize, kernel: usize, stride: usize) -> Self {
        Self::new([input, output], [kernel, kernel]).with_stride([stride, stride])
    }

    /// Fails with [`NhdrrNetError::NegativePadding`] when the kernel is
    /// smaller than the stride along either axis.
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<PaddedConv2d<B>> {
        let [k_h, k_w] = self.kernel_size;
        let [s_h, s_w] = self.stride;
        if k_h < s_h || k_w < s_w || s_h == 0 || s_w == 0 {
            return Err(NhdrrNetError::NegativePadding {
                kernel: self.kernel_size,
                stride: self.stride,
            });
        }

        let mut conv = Conv2dConfig::new(self.channels, self.kernel_size)
            .with_stride(self.stride)
            .with_padding(PaddingConfig2d::Valid)
            .with_bias(true);
        if let Some(initializer) = &self.initializer {
            conv = conv.with_initializer(initializer.clone());
        }
        let conv = conv.init(device);

        Ok(PaddedConv2d {
            conv,
            kernel_h: k_h,
            kernel_w: k_w,
            stride_h: s_h,
            stride_w: s_w,
        })
    }
}

#[derive(Module, Debug)]
pub struct PaddedConv2d<B: Backend> {
    conv: Conv2d<B>,
    kernel_h: usize,
    kernel_w: usize,
    stride_h: usize,
    stride_w: usize,
}

/// Padding `(before, after)` for one axis of length `size`.
pub fn axis_padding(size: usize, kernel: usize, stride: usize) -> (usize, usize) {
    let base = kernel - stride;
    let before = base / 2;
    let total = match size % stride {
        0 => base,
        rem => kernel - rem,
    };
    (before, total - before)
}

/// Output length of one axis after padding and a strided convolution.
pub fn output_size(size: usize, stride: usize) -> usize {
    size.div_ceil(stride)
}

impl<B: Backend> PaddedConv2d<B> {
    /// # Shapes
    ///   - input `[batch, in, height, width]`
    ///   - output `[batch, out, ceil(height / stride), ceil(width / stride)]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let (top, bottom) = axis_padding(height, self.kernel_h, self.stride_h);
        let (left, right) = axis_padding(width, self.kernel_w, self.stride_w);

        let x = if top + bottom + left + right > 0 {
            x.pad((left, right, top, bottom), 0.0)
        } else {
            x
        };
        self.conv.forward(x)
    }

    pub fn out_channels(&self) -> usize {
        let [out, _, _, _] = self.conv.weight.val().dims();
        out
    }
}
