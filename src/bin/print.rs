#![recursion_limit = "256"]

use burn::{backend::WebGpu, module::Module};
use nhdrrnet::{NhdrrNetConfig, logging::init_logging};

fn main() {
    if let Err(err) = init_logging() {
        eprintln!("{err}");
    }
    type MyBackend = WebGpu<f32, i32>;

    let device = Default::default();
    let config = NhdrrNetConfig::new();
    let model = match config.init::<MyBackend>(&device) {
        Ok(model) => model,
        Err(err) => {
            eprintln!("failed to build NHDRRNet: {err}");
            std::process::exit(1);
        }
    };

    println!("{model}");
    println!("Parameters: {}", model.num_params());
    println!("Config: {config}");
}
