use burn::prelude::*;
use serde::Serialize;

use crate::decoder::Decoder;
use crate::encoder::{ConvNormRelu, EncoderFeatures, EncoderTower};
use crate::error::{self, NhdrrNetError};
use crate::non_local::GlobalNonLocal;
use crate::padded_conv::PaddedConv2dConfig;
use crate::triple_pass::TriplePassStack;

/// Number of exposures fused by the network, one encoder tower each.
pub const EXPOSURES: usize = 3;

#[derive(Config, Debug)]
pub struct NhdrrNetConfig {
    /// Channels of one exposure image.
    #[config(default = 3)]
    pub image_channels: usize,
    /// Channels entering a tower: one LDR plus one HDR-mapped image.
    #[config(default = 6)]
    pub in_channels: usize,
    #[config(default = 32)]
    pub hidden_dim: usize,
    #[config(default = 3)]
    pub encoder_kernel_size: usize,
    #[config(default = 2)]
    pub encoder_stride: usize,
    /// Width of the fusion, triple-pass and non-local stages.
    #[config(default = 256)]
    pub triple_pass_filter: usize,
    #[config(default = 10)]
    pub triple_pass_blocks: usize,
    /// Side of the pooled grid the non-local block attends over.
    #[config(default = 16)]
    pub non_local_size: usize,
    #[config(default = 0.9)]
    pub encoder_momentum: f64,
    #[config(default = 0.1)]
    pub decoder_momentum: f64,
    #[config(default = 0.01)]
    pub leaky_slope: f64,
}

impl NhdrrNetConfig {
    /// Output channels of the four encoder stages: H, 2H, 4H, 8H.
    pub fn encoder_widths(&self) -> [usize; 4] {
        let h = self.hidden_dim;
        [h, h * 2, h * 4, h * 8]
    }

    /// Input height and width must be multiples of this.
    pub fn required_multiple(&self) -> usize {
        self.encoder_stride.pow(4)
    }

    /// Channels of each stacked `in_LDR` / `in_HDR` tensor.
    pub fn exposure_channels(&self) -> usize {
        EXPOSURES * self.image_channels
    }

    pub fn validate(&self) -> error::Result<()> {
        let widths = [
            ("image_channels", self.image_channels),
            ("hidden_dim", self.hidden_dim),
            ("encoder_kernel_size", self.encoder_kernel_size),
            ("triple_pass_filter", self.triple_pass_filter),
            ("triple_pass_blocks", self.triple_pass_blocks),
            ("non_local_size", self.non_local_size),
        ];
        if let Some((name, _)) = widths.iter().find(|(_, value)| *value == 0) {
            return Err(NhdrrNetError::InvalidConfig(format!("{name} must be non-zero")));
        }
        if self.in_channels != 2 * self.image_channels {
            return Err(NhdrrNetError::InvalidConfig(format!(
                "in_channels {} must pair an LDR and an HDR image of {} channels",
                self.in_channels, self.image_channels
            )));
        }
        if self.triple_pass_filter % 2 != 0 {
            return Err(NhdrrNetError::InvalidConfig(format!(
                "triple_pass_filter {} must be even",
                self.triple_pass_filter
            )));
        }
        if self.encoder_kernel_size < self.encoder_stride {
            return Err(NhdrrNetError::NegativePadding {
                kernel: [self.encoder_kernel_size; 2],
                stride: [self.encoder_stride; 2],
            });
        }
        if self.encoder_stride != 2 {
            return Err(NhdrrNetError::InvalidConfig(format!(
                "encoder_stride {} must be 2 to mirror the decoder's upsampling",
                self.encoder_stride
            )));
        }
        Ok(())
    }

    /// Returns the initialized model.
    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<NhdrrNet<B>> {
        self.validate()?;
        let widths = self.encoder_widths();
        let filter = self.triple_pass_filter;

        // Three structurally identical towers, each with its own weights.
        let towers = (0..EXPOSURES)
            .map(|_| {
                EncoderTower::new(
                    self.in_channels,
                    widths,
                    self.encoder_kernel_size,
                    self.encoder_stride,
                    self.encoder_momentum,
                    device,
                )
            })
            .collect::<error::Result<Vec<_>>>()?;

        let fusion = ConvNormRelu::new(
            &PaddedConv2dConfig::square(widths[3] * EXPOSURES, filter, 3, 1),
            self.encoder_momentum,
            device,
        )?;

        let model = NhdrrNet {
            towers,
            fusion,
            triple_pass: TriplePassStack::new(filter, self.triple_pass_blocks, device)?,
            non_local: GlobalNonLocal::new(filter, self.non_local_size, device)?,
            decoder: Decoder::new(
                filter * 2,
                widths,
                EXPOSURES,
                self.image_channels,
                self.decoder_momentum,
                self.leaky_slope,
                device,
            )?,
            image_channels: self.image_channels,
            required_multiple: self.required_multiple(),
        };

        log::info!(
            "built NHDRRNet: {} parameters, encoder widths {:?}, {} triple-pass blocks",
            model.num_params(),
            widths,
            self.triple_pass_blocks
        );
        Ok(model)
    }
}

/// Three-exposure HDR fusion network.
#[derive(Module, Debug)]
pub struct NhdrrNet<B: Backend> {
    towers: Vec<EncoderTower<B>>,
    fusion: ConvNormRelu<B>,
    triple_pass: TriplePassStack<B>,
    non_local: GlobalNonLocal<B>,
    decoder: Decoder<B>,
    image_channels: usize,
    required_multiple: usize,
}

/// `[batch, channels, height, width]` of every intermediate map of one
/// forward pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ForwardTrace {
    /// Four stage outputs per tower.
    pub towers: Vec<[[usize; 4]; 4]>,
    pub fusion: [usize; 4],
    pub triple_pass: [usize; 4],
    pub non_local_pooled: [usize; 4],
    pub non_local: [usize; 4],
    /// Each decoder stage after skip concatenation, then the restore stage.
    pub decoder: Vec<[usize; 4]>,
    pub output: [usize; 4],
}

impl ForwardTrace {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Pairs the LDR and HDR-mapped image of each exposure along channels.
///
/// # Shapes
///   - ldr, hdr `[batch, 3 * image_channels, height, width]`
///   - each output `[batch, 2 * image_channels, height, width]`
pub fn split_exposures<B: Backend>(
    ldr: Tensor<B, 4>,
    hdr: Tensor<B, 4>,
    image_channels: usize,
) -> Vec<Tensor<B, 4>> {
    let [batch, _, height, width] = ldr.dims();
    (0..EXPOSURES)
        .map(|exposure| {
            let channels = exposure * image_channels..(exposure + 1) * image_channels;
            let ranges = [0..batch, channels, 0..height, 0..width];
            Tensor::cat(
                vec![ldr.clone().slice(ranges.clone()), hdr.clone().slice(ranges)],
                1,
            )
        })
        .collect()
}

impl<B: Backend> NhdrrNet<B> {
    /// Checks channel counts and spatial sizes of a forward input pair.
    pub fn check_inputs(&self, ldr: &Tensor<B, 4>, hdr: &Tensor<B, 4>) -> error::Result<()> {
        let expected = EXPOSURES * self.image_channels;
        for (input, tensor) in [("in_LDR", ldr), ("in_HDR", hdr)] {
            let [_, channels, _, _] = tensor.dims();
            if channels != expected {
                return Err(NhdrrNetError::ChannelMismatch {
                    input,
                    expected,
                    actual: channels,
                });
            }
        }
        if ldr.dims() != hdr.dims() {
            return Err(NhdrrNetError::InputShapeMismatch {
                ldr: ldr.dims(),
                hdr: hdr.dims(),
            });
        }
        let [_, _, height, width] = ldr.dims();
        let multiple = self.required_multiple;
        if height == 0 || width == 0 || height % multiple != 0 || width % multiple != 0 {
            return Err(NhdrrNetError::SpatialMismatch {
                height,
                width,
                multiple,
            });
        }
        Ok(())
    }

    /// # Shapes
    ///   - in_ldr, in_hdr `[batch, 9, height, width]`, height and width multiples of 16
    ///   - output `[batch, 3, height, width]`, values in [-1, 1]
    ///
    /// # Panics
    /// On inputs rejected by [`NhdrrNet::check_inputs`].
    pub fn forward(&self, in_ldr: Tensor<B, 4>, in_hdr: Tensor<B, 4>) -> Tensor<B, 4> {
        self.forward_traced(in_ldr, in_hdr).0
    }

    pub fn try_forward(&self, in_ldr: Tensor<B, 4>, in_hdr: Tensor<B, 4>) -> error::Result<Tensor<B, 4>> {
        self.check_inputs(&in_ldr, &in_hdr)?;
        Ok(self.evaluate(in_ldr, in_hdr).0)
    }

    /// Forward pass that also records the dims of every stage.
    ///
    /// # Panics
    /// On inputs rejected by [`NhdrrNet::check_inputs`].
    pub fn forward_traced(
        &self,
        in_ldr: Tensor<B, 4>,
        in_hdr: Tensor<B, 4>,
    ) -> (Tensor<B, 4>, ForwardTrace) {
        if let Err(err) = self.check_inputs(&in_ldr, &in_hdr) {
            panic!("{err}");
        }
        self.evaluate(in_ldr, in_hdr)
    }

    fn evaluate(&self, in_ldr: Tensor<B, 4>, in_hdr: Tensor<B, 4>) -> (Tensor<B, 4>, ForwardTrace) {
        let mut trace = ForwardTrace::default();

        let images = split_exposures(in_ldr, in_hdr, self.image_channels);
        let features: Vec<EncoderFeatures<B>> = self
            .towers
            .iter()
            .zip(images)
            .map(|(tower, image)| tower.forward(image))
            .collect();
        for (index, tower) in features.iter().enumerate() {
            let dims = [
                tower.stage1.dims(),
                tower.stage2.dims(),
                tower.stage3.dims(),
                tower.stage4.dims(),
            ];
            log::debug!("tower {} stages {:?}", index + 1, dims);
            trace.towers.push(dims);
        }

        let deepest = features.iter().map(|f| f.stage4.clone()).collect();
        let fused = self.fusion.forward(Tensor::cat(deepest, 1));
        trace.fusion = fused.dims();
        log::debug!("fusion {:?}", trace.fusion);

        // Both branches only read the fusion output.
        let residual = self.triple_pass.forward(fused.clone());
        trace.triple_pass = residual.dims();

        let [batch, channels, _, _] = trace.fusion;
        let size = self.non_local.size();
        trace.non_local_pooled = [batch, channels, size, size];
        let global = self.non_local.forward(fused);
        trace.non_local = global.dims();
        log::debug!(
            "triple-pass {:?}, non-local {:?} -> {:?}",
            trace.triple_pass,
            trace.non_local_pooled,
            trace.non_local
        );

        let merged = Tensor::cat(vec![residual, global], 1);
        let (output, decoder_dims) = self.decoder.forward_with_dims(merged, &features);
        trace.decoder = decoder_dims;
        trace.output = output.dims();

        (output, trace)
    }

    pub fn towers(&self) -> &[EncoderTower<B>] {
        &self.towers
    }

    pub fn fusion(&self) -> &ConvNormRelu<B> {
        &self.fusion
    }

    pub fn triple_pass(&self) -> &TriplePassStack<B> {
        &self.triple_pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuBackend;
    use burn::tensor::Distribution;

    fn small_config() -> NhdrrNetConfig {
        NhdrrNetConfig::new()
            .with_hidden_dim(2)
            .with_triple_pass_filter(8)
            .with_triple_pass_blocks(2)
    }

    #[test]
    fn default_config_matches_reference_widths() {
        let config = NhdrrNetConfig::new();
        assert_eq!(config.encoder_widths(), [32, 64, 128, 256]);
        assert_eq!(config.triple_pass_filter, 256);
        assert_eq!(config.triple_pass_blocks, 10);
        assert_eq!(config.required_multiple(), 16);
        assert_eq!(config.exposure_channels(), 9);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let odd_filter = NhdrrNetConfig::new().with_triple_pass_filter(255);
        assert!(matches!(odd_filter.validate(), Err(NhdrrNetError::InvalidConfig(_))));

        let bad_pairing = NhdrrNetConfig::new().with_in_channels(5);
        assert!(matches!(bad_pairing.validate(), Err(NhdrrNetError::InvalidConfig(_))));

        let small_kernel = NhdrrNetConfig::new().with_encoder_kernel_size(1);
        assert!(matches!(
            small_kernel.validate(),
            Err(NhdrrNetError::NegativePadding { .. })
        ));

        let zero_hidden = NhdrrNetConfig::new().with_hidden_dim(0);
        assert!(zero_hidden.init::<CpuBackend>(&Default::default()).is_err());

        let no_blocks = NhdrrNetConfig::new().with_triple_pass_blocks(0);
        assert_eq!(
            no_blocks.validate(),
            Err(NhdrrNetError::InvalidConfig(
                "triple_pass_blocks must be non-zero".to_string()
            ))
        );
    }

    #[test]
    fn split_pairs_ldr_and_hdr_per_exposure() {
        let device = Default::default();
        let ldr = Tensor::<CpuBackend, 1, Int>::arange(0..9, &device)
            .float()
            .reshape([1, 9, 1, 1]);
        let hdr = ldr.clone() + 100.0;

        let images = split_exposures(ldr, hdr, 3);
        assert_eq!(images.len(), 3);
        let second: Vec<f32> = images[1].clone().into_data().to_vec().unwrap();
        assert_eq!(second, vec![3.0, 4.0, 5.0, 103.0, 104.0, 105.0]);
    }

    #[test]
    fn non_local_branch_pools_to_configured_size() {
        let device = Default::default();
        let model = small_config()
            .with_non_local_size(2)
            .init::<CpuBackend>(&device)
            .unwrap();
        let ldr = Tensor::<CpuBackend, 4>::random([1, 9, 64, 32], Distribution::Uniform(0.0, 1.0), &device);
        let hdr = Tensor::<CpuBackend, 4>::random([1, 9, 64, 32], Distribution::Uniform(0.0, 1.0), &device);

        let (output, trace) = model.forward_traced(ldr, hdr);
        assert_eq!(trace.fusion, [1, 8, 4, 2]);
        assert_eq!(trace.non_local_pooled, [1, 8, 2, 2]);
        assert_eq!(trace.non_local, trace.fusion);
        assert_eq!(output.dims(), [1, 3, 64, 32]);
    }

    #[test]
    fn check_inputs_reports_each_failure() {
        let device = Default::default();
        let model = small_config().init::<CpuBackend>(&device).unwrap();
        let input = |c, h, w| Tensor::<CpuBackend, 4>::zeros([1, c, h, w], &device);

        assert!(model.check_inputs(&input(9, 32, 48), &input(9, 32, 48)).is_ok());
        assert_eq!(
            model.check_inputs(&input(6, 32, 32), &input(9, 32, 32)),
            Err(NhdrrNetError::ChannelMismatch {
                input: "in_LDR",
                expected: 9,
                actual: 6
            })
        );
        assert!(matches!(
            model.check_inputs(&input(9, 32, 32), &input(9, 16, 32)),
            Err(NhdrrNetError::InputShapeMismatch { .. })
        ));
        assert_eq!(
            model.check_inputs(&input(9, 40, 32), &input(9, 40, 32)),
            Err(NhdrrNetError::SpatialMismatch {
                height: 40,
                width: 32,
                multiple: 16
            })
        );
    }

    #[test]
    fn try_forward_returns_errors_instead_of_panicking() {
        let device = Default::default();
        let model = small_config().init::<CpuBackend>(&device).unwrap();
        let ldr = Tensor::random([1, 9, 24, 24], Distribution::Uniform(0.0, 1.0), &device);
        let hdr = Tensor::random([1, 9, 24, 24], Distribution::Uniform(0.0, 1.0), &device);
        assert!(model.try_forward(ldr, hdr).is_err());
    }

    #[test]
    #[should_panic(expected = "expected 9")]
    fn forward_fails_fast_on_wrong_channels() {
        let device = Default::default();
        let model = small_config().init::<CpuBackend>(&device).unwrap();
        let ldr = Tensor::zeros([1, 6, 16, 16], &device);
        let hdr = Tensor::zeros([1, 6, 16, 16], &device);
        model.forward(ldr, hdr);
    }
}
