use layered::{AdjustmentKind, AdjustmentOp, Context, EngineConfig, Layer};

const USAGE: &str = "usage: layered <input> <output> [exposure]";

fn main() {
    env_logger::init();

    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let (input, output) = match args.as_slice() {
        [input, output] | [input, output, _] => (input, output),
        _ => {
            eprintln!("{}", USAGE);
            std::process::exit(2);
        }
    };
    let exposure = match args.get(2).map(|s| s.parse::<f32>()) {
        Some(Ok(v)) => v,
        Some(Err(_)) => {
            eprintln!("exposure must be a number\n{}", USAGE);
            std::process::exit(2);
        }
        None => 25.0,
    };

    // `LAYERED_CONFIG` can point at a JSON config file; otherwise the defaults are used
    let config = match std::env::var_os("LAYERED_CONFIG") {
        Some(path) => EngineConfig::load(path).unwrap(),
        None => EngineConfig::default(),
    };

    // Load the image, and put an exposure adjustment over it
    let mut context = Context::from_image(config, input).unwrap();
    let op = AdjustmentOp::with(AdjustmentKind::Exposure, "amount", exposure).unwrap();
    context
        .add_layer_on_top(Layer::adjustment("Exposure", op))
        .unwrap();

    let warnings = context.export(output).unwrap();
    for warning in warnings {
        eprintln!("warning: {}", warning);
    }
}
