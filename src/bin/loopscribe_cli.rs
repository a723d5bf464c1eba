use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use loopscribe::analysis::spectrum::SpectrumAnalyzer;
use loopscribe::analysis::Transcriber;
use loopscribe::config::AppConfig;
use loopscribe::pattern::{self, DrumEvent, DrumPattern};
use loopscribe::track::fit;
use loopscribe::variation::{self, VariationKind};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(
    name = "loopscribe_cli",
    about = "Offline tools for the Loopscribe drum transcription core"
)]
struct Cli {
    /// Log debug output (pipeline decisions, skipped lines)
    #[arg(long, short, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transcribe a WAV file into a drum pattern
    Transcribe {
        #[arg(long)]
        wav: PathBuf,
        /// Write the pattern file here instead of printing hits as JSON lines
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Fit a raw loop duration to a master duration
    Fit {
        #[arg(long)]
        raw: f64,
        #[arg(long)]
        master: f64,
    },
    /// Print a pattern file as JSON
    Inspect { file: PathBuf },
    /// Generate an algorithmic variation of a pattern file
    Vary {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        kind: VariationKind,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli.command) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::from(1)
        }
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Transcribe { wav, out, config } => run_transcribe(&wav, out, config),
        Commands::Fit { raw, master } => run_fit(raw, master),
        Commands::Inspect { file } => run_inspect(&file),
        Commands::Vary {
            input,
            kind,
            seed,
            out,
        } => run_vary(&input, kind, seed, out),
    }
}

#[derive(Serialize)]
struct HitReport {
    class: String,
    time_secs: f64,
    intensity: f32,
    flux: f32,
}

fn run_transcribe(wav: &Path, out: Option<PathBuf>, config: Option<PathBuf>) -> Result<ExitCode> {
    let mut config = config
        .map(AppConfig::load_from_file)
        .unwrap_or_default();
    let (samples, sample_rate) = read_wav(wav)?;
    config.analysis.sample_rate = sample_rate;
    config.validate().context("validating configuration")?;

    let mut analyzer = SpectrumAnalyzer::new(config.analysis.window_size);
    let mut transcriber = Transcriber::from_config(&config);
    let hits = transcriber.transcribe_samples(&mut analyzer, &samples);
    tracing::info!(
        "Transcribed {} hits from {} ({} classifier)",
        hits.len(),
        wav.display(),
        transcriber.classifier_name()
    );

    match out {
        Some(path) => {
            let loop_duration = samples.len() as f64 / sample_rate as f64;
            let events = hits
                .iter()
                .map(|hit| DrumEvent::new(hit.class, hit.time_secs, hit.intensity))
                .collect();
            let pattern = DrumPattern::new(events, loop_duration);
            pattern::save_file(&path, &pattern)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("{} events written to {}", pattern.len(), path.display());
        }
        None => {
            for hit in hits {
                let report = HitReport {
                    class: hit.class.to_string(),
                    time_secs: hit.time_secs,
                    intensity: hit.intensity,
                    flux: hit.features.flux(),
                };
                println!("{}", serde_json::to_string(&report)?);
            }
        }
    }
    Ok(ExitCode::from(0))
}

fn run_fit(raw: f64, master: f64) -> Result<ExitCode> {
    if !(raw > 0.0 && master > 0.0) {
        bail!("durations must be positive (raw={}, master={})", raw, master);
    }
    let result = fit(raw, master);
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::from(0))
}

fn run_inspect(file: &Path) -> Result<ExitCode> {
    let pattern = load_pattern(file)?;
    println!("{}", serde_json::to_string_pretty(&pattern)?);
    Ok(ExitCode::from(0))
}

fn run_vary(
    input: &Path,
    kind: VariationKind,
    seed: Option<u64>,
    out: Option<PathBuf>,
) -> Result<ExitCode> {
    let original = load_pattern(input)?;
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let varied = variation::generate(&original, kind, &mut rng);

    match out {
        Some(path) => {
            pattern::save_file(&path, &varied)
                .with_context(|| format!("writing {}", path.display()))?;
            println!(
                "{} variation ({} events) written to {}",
                kind,
                varied.len(),
                path.display()
            );
        }
        None => print!("{}", pattern::to_text(&varied)),
    }
    Ok(ExitCode::from(0))
}

fn load_pattern(path: &Path) -> Result<DrumPattern> {
    pattern::load_file(path).with_context(|| format!("loading {}", path.display()))
}

/// Read a WAV file as mono f32, averaging channels
fn read_wav(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).with_context(|| format!("opening {}", path.display()))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            match spec.bits_per_sample {
                8 | 16 | 24 | 32 => reader
                    .samples::<i32>()
                    .map(|sample| {
                        sample
                            .map(|value| value as f32 / max)
                            .map_err(|err| anyhow!(err))
                    })
                    .collect::<Result<Vec<f32>>>()?,
                other => bail!(
                    "Unsupported bits per sample {} in {}",
                    other,
                    path.display()
                ),
            }
        }
    };

    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}
