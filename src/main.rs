use burn::tensor::{Distribution, Tensor};
use nhdrrnet::{
    NhdrrNetConfig,
    benchmark::ForwardBenchmark,
    device::{Backend, init_device},
    logging::init_logging,
};

fn main() {
    if let Err(err) = init_logging() {
        eprintln!("{err}");
    }

    // Initialize device with centralized setup
    let device = init_device();
    println!("WGPU device selected: {:?}", device);

    let config = NhdrrNetConfig::new();
    let model = match config.init::<Backend>(&device) {
        Ok(model) => model,
        Err(err) => {
            eprintln!("failed to build NHDRRNet: {err}");
            std::process::exit(1);
        }
    };

    // Three stacked RGB exposures per input, 256x256
    let shape = [1, config.exposure_channels(), 256, 256];
    let in_ldr = Tensor::<Backend, 4>::random(shape, Distribution::Uniform(0.0, 1.0), &device);
    let in_hdr = Tensor::<Backend, 4>::random(shape, Distribution::Uniform(0.0, 1.0), &device);

    let (output, trace) = model.forward_traced(in_ldr, in_hdr);
    println!("Forward pass successful, output shape: {:?}", output.dims());
    match trace.to_json() {
        Ok(json) => println!("Stage shapes:\n{json}"),
        Err(err) => eprintln!("could not serialize trace: {err}"),
    }

    let benchmark =
        ForwardBenchmark::<Backend>::new(&device, 1, config.exposure_channels(), 256, 256);
    let result = benchmark.run(&model, 3);
    println!("\n{}", benchmark.generate_report(&[result]));
}
