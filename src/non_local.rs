//! Global non-local block.
//!
//! Self-attention over every spatial position of a feature map pooled to a
//! fixed `size x size` grid. The attended map is added back to the pooled
//! input, then resized to the resolution the block was given.

use burn::{
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    prelude::*,
    tensor::{
        activation::softmax,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};

use crate::error::{NhdrrNetError, Result};
use crate::padded_conv::{PaddedConv2d, PaddedConv2dConfig};

#[derive(Module, Debug)]
pub struct GlobalNonLocal<B: Backend> {
    pool: AdaptiveAvgPool2d,
    /// Query projection.
    theta: PaddedConv2d<B>,
    /// Key projection.
    phi: PaddedConv2d<B>,
    /// Value projection.
    g: PaddedConv2d<B>,
    output: PaddedConv2d<B>,
    inner_channels: usize,
    size: usize,
}

impl<B: Backend> GlobalNonLocal<B> {
    /// `channels` must be even: queries, keys and values use half of them.
    pub fn new(channels: usize, size: usize, device: &B::Device) -> Result<Self> {
        if channels == 0 || channels % 2 != 0 {
            return Err(NhdrrNetError::InvalidConfig(format!(
                "non-local block needs an even, non-zero channel count, got {channels}"
            )));
        }
        if size == 0 {
            return Err(NhdrrNetError::InvalidConfig(
                "non-local pooling size must be non-zero".to_string(),
            ));
        }
        let inner_channels = channels / 2;
        let project = |input, output| {
            PaddedConv2dConfig::square(input, output, 1, 1).init::<B>(device)
        };

        Ok(Self {
            pool: AdaptiveAvgPool2dConfig::new([size, size]).init(),
            theta: project(channels, inner_channels)?,
            phi: project(channels, inner_channels)?,
            g: project(channels, inner_channels)?,
            output: project(inner_channels, channels)?,
            inner_channels,
            size,
        })
    }

    /// Adaptive average pooling to `[batch, channels, size, size]`.
    pub fn pool(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.pool.forward(x)
    }

    /// Row-stochastic affinity between all positions of a pooled map.
    ///
    /// # Shapes
    ///   - input `[batch, channels, h, w]`
    ///   - output `[batch, h * w, h * w]`, each row sums to 1
    pub fn attention(&self, pooled: Tensor<B, 4>) -> Tensor<B, 3> {
        let [batch, _, height, width] = pooled.dims();
        let positions = height * width;

        let theta = self
            .theta
            .forward(pooled.clone())
            .reshape([batch, self.inner_channels, positions])
            .swap_dims(1, 2);
        let phi = self
            .phi
            .forward(pooled)
            .reshape([batch, self.inner_channels, positions]);

        softmax(theta.matmul(phi), 2)
    }

    /// Attention plus residual on an already pooled map. Shape is preserved.
    pub fn attend(&self, pooled: Tensor<B, 4>) -> Tensor<B, 4> {
        let [batch, _, height, width] = pooled.dims();
        let positions = height * width;

        let affinity = self.attention(pooled.clone());
        let values = self
            .g
            .forward(pooled.clone())
            .reshape([batch, self.inner_channels, positions])
            .swap_dims(1, 2);

        let context = affinity
            .matmul(values)
            .swap_dims(1, 2)
            .reshape([batch, self.inner_channels, height, width]);

        self.output.forward(context) + pooled
    }

    /// Nearest-neighbour resize of an attended map to `[height, width]`.
    pub fn resize(&self, attended: Tensor<B, 4>, size: [usize; 2]) -> Tensor<B, 4> {
        interpolate(
            attended,
            size,
            InterpolateOptions::new(InterpolateMode::Nearest),
        )
    }

    /// Pool, attend, and resize back to the input resolution.
    ///
    /// # Shapes
    ///   - input `[batch, channels, height, width]`
    ///   - output `[batch, channels, height, width]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = x.dims();
        let attended = self.attend(self.pool(x));
        log::debug!(
            "non-local attended {:?}, resizing to {}x{}",
            attended.dims(),
            height,
            width
        );
        self.resize(attended, [height, width])
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuBackend;
    use burn::{
        nn::Initializer,
        tensor::{Distribution, TensorData},
    };

    fn values(x: Tensor<CpuBackend, 4>) -> Vec<f32> {
        x.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn pools_to_fixed_grid_for_any_resolution() {
        let device = Default::default();
        let block = GlobalNonLocal::<CpuBackend>::new(8, 16, &device).unwrap();
        for (h, w) in [(16, 16), (32, 48), (64, 20), (8, 8)] {
            let x = Tensor::random([1, 8, h, w], Distribution::Normal(0.0, 1.0), &device);
            assert_eq!(block.pool(x).dims(), [1, 8, 16, 16]);
        }
    }

    #[test]
    fn attention_rows_sum_to_one() {
        let device = Default::default();
        let block = GlobalNonLocal::<CpuBackend>::new(8, 16, &device).unwrap();
        let x = Tensor::random([2, 8, 32, 32], Distribution::Normal(0.0, 1.0), &device);

        let affinity = block.attention(block.pool(x));
        assert_eq!(affinity.dims(), [2, 256, 256]);
        assert!(affinity.clone().min().into_scalar() >= 0.0);

        let deviation = (affinity.sum_dim(2) - 1.0).abs().max().into_scalar();
        assert!(deviation < 1e-4, "row sums deviate by {deviation}");
    }

    #[test]
    fn attend_matches_direct_softmax_attention() {
        let device = Default::default();
        let block = GlobalNonLocal::<CpuBackend>::new(4, 2, &device).unwrap();
        let (inner, height, width) = (2, 2, 3);
        let positions = height * width;
        let pooled = Tensor::<CpuBackend, 4>::random(
            [1, 4, height, width],
            Distribution::Normal(0.0, 1.0),
            &device,
        );

        // channel-major: value of channel `c` at position `p` is `v[c * positions + p]`
        let theta = values(block.theta.forward(pooled.clone()));
        let phi = values(block.phi.forward(pooled.clone()));
        let g = values(block.g.forward(pooled.clone()));

        let mut affinity = vec![0.0f32; positions * positions];
        for i in 0..positions {
            let logits = (0..positions)
                .map(|j| (0..inner).map(|c| theta[c * positions + i] * phi[c * positions + j]).sum::<f32>())
                .collect::<Vec<_>>();
            let max = logits.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
            let total = logits.iter().map(|l| (l - max).exp()).sum::<f32>();
            for (j, l) in logits.iter().enumerate() {
                affinity[i * positions + j] = (l - max).exp() / total;
            }
        }

        let mut context = vec![0.0f32; inner * positions];
        for c in 0..inner {
            for i in 0..positions {
                context[c * positions + i] = (0..positions)
                    .map(|j| affinity[i * positions + j] * g[c * positions + j])
                    .sum();
            }
        }

        let computed = block.attention(pooled.clone()).into_data().to_vec::<f32>().unwrap();
        for (a, b) in computed.iter().zip(&affinity) {
            assert!((a - b).abs() < 1e-5, "affinity {a} vs {b}");
        }

        let context = Tensor::<CpuBackend, 4>::from_data(
            TensorData::new(context, [1, inner, height, width]),
            &device,
        );
        let expected = block.output.forward(context) + pooled.clone();
        let diff = (block.attend(pooled) - expected).abs().max().into_scalar();
        assert!(diff < 1e-5, "attended map deviates by {diff}");
    }

    #[test]
    fn zero_output_projection_returns_pooled_map() {
        let device = Default::default();
        let mut block = GlobalNonLocal::<CpuBackend>::new(4, 4, &device).unwrap();
        block.output = PaddedConv2dConfig::square(2, 4, 1, 1)
            .with_initializer(Some(Initializer::Zeros))
            .init(&device)
            .unwrap();
        let pooled = Tensor::<CpuBackend, 4>::random([2, 4, 4, 4], Distribution::Normal(0.0, 1.0), &device);

        let diff = (block.attend(pooled.clone()) - pooled).abs().max().into_scalar();
        assert!(diff < 1e-6, "residual path deviates by {diff}");
    }

    #[test]
    fn forward_restores_input_resolution() {
        let device = Default::default();
        let block = GlobalNonLocal::<CpuBackend>::new(4, 16, &device).unwrap();
        let x = Tensor::random([1, 4, 32, 24], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(block.forward(x).dims(), [1, 4, 32, 24]);
    }

    #[test]
    fn odd_channel_count_is_rejected() {
        let device = Default::default();
        assert!(GlobalNonLocal::<CpuBackend>::new(7, 16, &device).is_err());
        assert!(GlobalNonLocal::<CpuBackend>::new(8, 0, &device).is_err());
    }
}
