// easel - generate one image, remembering the last-used settings between runs

use std::path::PathBuf;
use std::thread;

use anyhow::{anyhow, Result};
use clap::Parser;
use easel_core::{
    AsyncExecutionBridge, DeviceMap, GenerationEngine, ModelRegistry, Seed, SessionConfig,
    SessionConfigStore, StableDiffusionLoader, StatusMessage, DEFAULT_POLL_INTERVAL,
    DEFAULT_SESSION_FILE,
};
use rand::Rng;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Flags left unset keep the value restored from the session file.
#[derive(Parser, Debug)]
#[command(author, version, about = "Generate an image from a text prompt", long_about = None)]
struct Args {
    /// Text prompt describing the image to generate
    #[arg(short, long)]
    prompt: Option<String>,

    /// Things the image should not contain
    #[arg(short, long)]
    negative_prompt: Option<String>,

    /// Display name of the model (see --list-models)
    #[arg(short, long)]
    model: Option<String>,

    /// Number of inference steps
    #[arg(short, long)]
    steps: Option<u32>,

    /// Classifier-free guidance scale
    #[arg(short, long)]
    cfg: Option<f64>,

    /// Seed for reproducibility, -1 for a random one
    #[arg(long, allow_hyphen_values = true)]
    seed: Option<i64>,

    /// Draw a fresh fixed seed now and keep it in the session
    #[arg(long, conflicts_with = "seed")]
    randomize_seed: bool,

    /// Output file path (PNG format)
    #[arg(short, long, default_value = "generated_image.png")]
    output: PathBuf,

    /// Session file to restore settings from and save them to
    #[arg(long, default_value = DEFAULT_SESSION_FILE)]
    session: PathBuf,

    /// Force CPU usage (default: use GPU if available)
    #[arg(long)]
    cpu: bool,

    /// Accelerator ordinal to use when one is available
    #[arg(long, default_value_t = 0)]
    device: usize,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Print the available models and exit
    #[arg(long)]
    list_models: bool,
}

impl Args {
    fn apply<R: Rng + ?Sized>(&self, config: &mut SessionConfig, rng: &mut R) {
        if let Some(prompt) = &self.prompt {
            config.prompt = prompt.clone();
        }
        if let Some(negative_prompt) = &self.negative_prompt {
            config.neg_prompt = negative_prompt.clone();
        }
        if let Some(model) = &self.model {
            config.model_name = model.clone();
        }
        if let Some(steps) = self.steps {
            config.steps = steps;
        }
        if let Some(cfg) = self.cfg {
            config.cfg = cfg;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.randomize_seed {
            config.seed = Seed::randomized(rng).to_raw();
            tracing::info!("Randomized seed: {}", config.seed);
        }
    }
}

fn init_tracing(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("easel_cli={level},easel_core={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(e) = dotenv {
        tracing::debug!("No .env file loaded: {e}");
    }
    // hf-hub reads HUGGING_FACE_HUB_TOKEN only
    if let Ok(token) = std::env::var("HF_TOKEN") {
        if std::env::var("HUGGING_FACE_HUB_TOKEN").is_err() {
            std::env::set_var("HUGGING_FACE_HUB_TOKEN", token);
        }
    }

    if args.list_models {
        let default = ModelRegistry::default_descriptor();
        for model in ModelRegistry::all() {
            let marker = if model == &default { " (default)" } else { "" };
            println!("{}{marker}\t{}", model.display_name, model.identifier);
        }
        return Ok(());
    }

    let store = SessionConfigStore::new(&args.session);
    let mut config = store.load();
    args.apply(&mut config, &mut rand::thread_rng());

    let outcome = run(&args, &config);

    // the session is written whether or not generation succeeded
    if let Err(e) = store.save(&config) {
        eprintln!("Could not save session to {}: {e}", store.path().display());
    }
    outcome
}

fn run(args: &Args, config: &SessionConfig) -> Result<()> {
    let request = config.to_request()?;

    let loader = StableDiffusionLoader::new()?;
    let engine = GenerationEngine::new(loader, DeviceMap::from_flags(args.cpu, args.device));
    let mut bridge = AsyncExecutionBridge::new(engine);
    bridge.submit(request)?;

    loop {
        while let Some(message) = bridge.poll() {
            match message {
                StatusMessage::Progress(text) => println!("{text}"),
                StatusMessage::Done(Ok(image)) => {
                    image.save_png(&args.output)?;
                    println!("Image saved to: {}", args.output.display());
                    println!("Seed: {}", image.seed);
                    return Ok(());
                }
                StatusMessage::Done(Err(e)) => {
                    return Err(anyhow!("{} ({})", e, e.category()));
                }
            }
        }
        thread::sleep(DEFAULT_POLL_INTERVAL);
    }
}
