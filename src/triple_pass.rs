use burn::{nn::Relu, prelude::*};

use crate::error::Result;
use crate::padded_conv::{PaddedConv2d, PaddedConv2dConfig};

/// Kernel sizes of the three parallel passes.
pub const PASS_KERNELS: [usize; 3] = [1, 3, 5];

/// Residual block with three receptive fields.
///
/// `x + project(cat[relu(conv1(x)), relu(conv3(x)), relu(conv5(x))])`
#[derive(Module, Debug)]
pub struct TriplePassBlock<B: Backend> {
    passes: Vec<PaddedConv2d<B>>,
    project: PaddedConv2d<B>,
    activation: Relu,
}

impl<B: Backend> TriplePassBlock<B> {
    pub fn new(channels: usize, device: &B::Device) -> Result<Self> {
        let passes = PASS_KERNELS
            .iter()
            .map(|&kernel| {
                PaddedConv2dConfig::square(channels, channels, kernel, 1).init::<B>(device)
            })
            .collect::<Result<Vec<_>>>()?;
        let project = PaddedConv2dConfig::square(channels * PASS_KERNELS.len(), channels, 3, 1)
            .init::<B>(device)?;

        Ok(Self {
            passes,
            project,
            activation: Relu::new(),
        })
    }

    /// Output shape equals input shape.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let branches = self
            .passes
            .iter()
            .map(|pass| self.activation.forward(pass.forward(x.clone())))
            .collect::<Vec<_>>();
        let merged = self.project.forward(Tensor::cat(branches, 1));
        merged + x
    }
}

/// Independently weighted triple-pass blocks applied strictly in order.
#[derive(Module, Debug)]
pub struct TriplePassStack<B: Backend> {
    blocks: Vec<TriplePassBlock<B>>,
}

impl<B: Backend> TriplePassStack<B> {
    pub fn new(channels: usize, num_blocks: usize, device: &B::Device) -> Result<Self> {
        let blocks = (0..num_blocks)
            .map(|_| TriplePassBlock::new(channels, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { blocks })
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}
