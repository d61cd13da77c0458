use burn::{
    nn::{
        BatchNorm, BatchNormConfig, LeakyRelu, LeakyReluConfig,
        conv::{ConvTranspose2d, ConvTranspose2dConfig},
    },
    prelude::*,
    tensor::activation::tanh,
};

use crate::encoder::EncoderFeatures;
use crate::error::Result;
use crate::padded_conv::{PaddedConv2d, PaddedConv2dConfig};

/// Transpose convolution (kernel 4, stride 2, padding 1), batch
/// normalization and leaky ReLU. Doubles the spatial resolution.
#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    deconv: ConvTranspose2d<B>,
    norm: BatchNorm<B, 2>,
    activation: LeakyRelu,
}

impl<B: Backend> DecoderStage<B> {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        momentum: f64,
        negative_slope: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            deconv: ConvTranspose2dConfig::new([in_channels, out_channels], [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_bias(true)
                .init(device),
            norm: BatchNormConfig::new(out_channels)
                .with_momentum(momentum)
                .init(device),
            activation: LeakyReluConfig::new()
                .with_negative_slope(negative_slope)
                .init(),
        }
    }

    /// # Shapes
    ///   - input `[batch, in, height, width]`
    ///   - output `[batch, out, 2 * height, 2 * width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.deconv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

/// Upsampling path with skip connections from every encoder tower.
///
/// After each of the first three stages the output is concatenated with the
/// towers' features at the same resolution (encoder stages 3, 2, 1), as is,
/// without weighting.
#[derive(Module, Debug)]
pub struct Decoder<B: Backend> {
    stages: Vec<DecoderStage<B>>,
    restore: DecoderStage<B>,
    to_image: PaddedConv2d<B>,
}

impl<B: Backend> Decoder<B> {
    /// * `in_channels` - width of the merged triple-pass and non-local maps
    /// * `encoder_widths` - output width of each encoder stage
    /// * `towers` - number of encoder towers contributing skips
    pub fn new(
        in_channels: usize,
        encoder_widths: [usize; 4],
        towers: usize,
        image_channels: usize,
        momentum: f64,
        negative_slope: f64,
        device: &B::Device,
    ) -> Result<Self> {
        let mut stages = Vec::with_capacity(3);
        let mut input = in_channels;
        for &width in encoder_widths[..3].iter().rev() {
            stages.push(DecoderStage::new(input, width, momentum, negative_slope, device));
            input = width * (towers + 1);
        }
        let restore = DecoderStage::new(
            input,
            encoder_widths[0],
            momentum,
            negative_slope,
            device,
        );
        let to_image =
            PaddedConv2dConfig::square(encoder_widths[0], image_channels, 3, 1).init::<B>(device)?;

        Ok(Self {
            stages,
            restore,
            to_image,
        })
    }

    pub fn forward(&self, x: Tensor<B, 4>, skips: &[EncoderFeatures<B>]) -> Tensor<B, 4> {
        self.forward_with_dims(x, skips).0
    }

    /// Runs the decoder and also reports the dims after every upsampling
    /// stage, skip concatenations included.
    ///
    /// # Shapes
    ///   - x `[batch, in_channels, height / 16, width / 16]`
    ///   - output `[batch, image_channels, height, width]`, values in [-1, 1]
    pub fn forward_with_dims(
        &self,
        x: Tensor<B, 4>,
        skips: &[EncoderFeatures<B>],
    ) -> (Tensor<B, 4>, Vec<[usize; 4]>) {
        let mut dims = Vec::with_capacity(self.stages.len() + 1);
        let mut x = x;
        for (level, stage) in self.stages.iter().enumerate() {
            let up = stage.forward(x);
            let mut merged = Vec::with_capacity(skips.len() + 1);
            merged.push(up);
            merged.extend(skips.iter().map(|features| match level {
                0 => features.stage3.clone(),
                1 => features.stage2.clone(),
                _ => features.stage1.clone(),
            }));
            x = Tensor::cat(merged, 1);
            log::debug!("decoder stage {} -> {:?}", level + 1, x.dims());
            dims.push(x.dims());
        }

        let x = self.restore.forward(x);
        log::debug!("decoder restore -> {:?}", x.dims());
        dims.push(x.dims());

        (tanh(self.to_image.forward(x)), dims)
    }
}
