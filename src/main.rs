use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;
use clap::Parser;

use yolov4_neck::{FeatureShape, NeckConfig, NeckModel};

type BackendType = NdArray;

#[derive(Parser, Debug)]
#[command(author, version, about = "Build the YOLOv4 neck and print its structure")]
struct Args {
    /// Backbone output shapes, coarse to fine (e.g. 13x13x1024,26x26x512,52x52x256)
    #[arg(short, long, value_delimiter = ',')]
    shapes: Vec<FeatureShape>,

    /// YAML neck config; --shapes overrides its input shapes
    #[arg(short, long)]
    config: Option<String>,

    /// Print signature and layers as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Run one random batch through the neck and report tensor dims
    #[arg(long)]
    forward: bool,

    /// Save the freshly initialized weights to this path
    #[arg(long)]
    save_weights: Option<String>,
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => NeckConfig::from_yaml(path)?,
        None => NeckConfig::default(),
    };
    if !args.shapes.is_empty() {
        config = config.with_input_shapes(args.shapes.clone());
    }

    let device = NdArrayDevice::default();
    let model = NeckModel::<BackendType>::build(&device, &config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(model.summary())?);
    } else {
        println!("{}", model.summary());
    }

    if args.forward {
        run_forward(&model, &device);
    }

    if let Some(path) = &args.save_weights {
        model.save_weights(path.as_str())?;
        println!("Weights saved to {path}.bin");
    }

    Ok(())
}

fn run_forward(model: &NeckModel<BackendType>, device: &NdArrayDevice) {
    let shapes = model.signature().input_shapes();
    let input = |i: usize| {
        Tensor::<BackendType, 4>::random(shapes[i].to_nchw(1), Distribution::Default, device)
    };

    let (output_1, output_2, output_3) = model.forward(input(0), input(1), input(2));
    println!();
    println!("Forward pass (batch 1):");
    for (slot, dims) in model
        .signature()
        .outputs
        .iter()
        .zip([output_1.dims(), output_2.dims(), output_3.dims()])
    {
        println!("  {}: {:?} -> {}", slot.name, dims, FeatureShape::from_nchw(dims));
    }
}
