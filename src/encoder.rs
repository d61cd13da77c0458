use burn::{
    nn::{BatchNorm, BatchNormConfig, Relu},
    prelude::*,
};

use crate::error::Result;
use crate::padded_conv::{PaddedConv2d, PaddedConv2dConfig};

/// Padded convolution, batch normalization and ReLU.
///
/// Every encoder stage is one of these, and so is the fusion stage that
/// merges the three towers.
#[derive(Module, Debug)]
pub struct ConvNormRelu<B: Backend> {
    conv: PaddedConv2d<B>,
    norm: BatchNorm<B, 2>,
    activation: Relu,
}

impl<B: Backend> ConvNormRelu<B> {
    pub fn new(
        conv: &PaddedConv2dConfig,
        momentum: f64,
        device: &B::Device,
    ) -> Result<Self> {
        let [_, out] = conv.channels;
        Ok(Self {
            conv: conv.init(device)?,
            norm: BatchNormConfig::new(out).with_momentum(momentum).init(device),
            activation: Relu::new(),
        })
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.norm.forward(x);
        self.activation.forward(x)
    }
}

/// Outputs of the four encoder stages, shallowest first.
///
/// The first three feed the decoder skip connections, the last one the
/// fusion stage.
#[derive(Debug, Clone)]
pub struct EncoderFeatures<B: Backend> {
    pub stage1: Tensor<B, 4>,
    pub stage2: Tensor<B, 4>,
    pub stage3: Tensor<B, 4>,
    pub stage4: Tensor<B, 4>,
}

/// One exposure's encoder: four strided stages, H -> 2H -> 4H -> 8H channels.
#[derive(Module, Debug)]
pub struct EncoderTower<B: Backend> {
    stages: Vec<ConvNormRelu<B>>,
}

impl<B: Backend> EncoderTower<B> {
    /// `widths` are the output channels of the four stages.
    pub fn new(
        in_channels: usize,
        widths: [usize; 4],
        kernel_size: usize,
        stride: usize,
        momentum: f64,
        device: &B::Device,
    ) -> Result<Self> {
        let mut stages = Vec::with_capacity(widths.len());
        let mut input = in_channels;
        for width in widths {
            let conv = PaddedConv2dConfig::square(input, width, kernel_size, stride);
            stages.push(ConvNormRelu::new(&conv, momentum, device)?);
            input = width;
        }
        Ok(Self { stages })
    }

    /// # Shapes
    ///   - input `[batch, in_channels, height, width]`
    ///   - stage `i` `[batch, widths[i], ceil(height / stride^(i+1)), ceil(width / stride^(i+1))]`
    pub fn forward(&self, x: Tensor<B, 4>) -> EncoderFeatures<B> {
        let stage1 = self.stages[0].forward(x);
        let stage2 = self.stages[1].forward(stage1.clone());
        let stage3 = self.stages[2].forward(stage2.clone());
        let stage4 = self.stages[3].forward(stage3.clone());
        EncoderFeatures {
            stage1,
            stage2,
            stage3,
            stage4,
        }
    }
}
