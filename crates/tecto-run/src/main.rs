/// Offline runner: builds a preset (or restores a snapshot), advances it a
/// fixed number of steps and writes the final state as a JSON snapshot.
use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::{info, warn};
use serde::Serialize;
use tecto_core::{Model, Preset, SimConfig, StepOutcome};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetName {
    TwoPlates,
    Procedural,
}

#[derive(Parser, Debug)]
#[command(name = "tecto-run", about = "Run the plate simulation headless and write a snapshot")]
struct Args {
    /// Preset used when no snapshot is restored
    #[arg(long, value_enum, default_value = "procedural")]
    preset: PresetName,

    /// Seed for the procedural preset
    #[arg(long, default_value = "0")]
    seed: u64,

    /// Plate count for the procedural preset
    #[arg(long, default_value = "8")]
    plates: usize,

    /// SimConfig JSON; missing keys take defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the grid subdivision
    #[arg(long)]
    divisions: Option<u32>,

    /// Start from this snapshot instead of a preset
    #[arg(long)]
    restore: Option<PathBuf>,

    #[arg(short = 'n', long, default_value = "100")]
    steps: u64,

    /// Print a summary line every N steps (0 disables)
    #[arg(long, default_value = "10")]
    report_every: u64,

    /// Where to write the final snapshot
    #[arg(short, long, default_value = "snapshot.json")]
    output: PathBuf,
}

// ── Summary ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Summary {
    step_idx: u64,
    time: f64,
    plates: usize,
    fields: usize,
    continental_fields: usize,
    subducting_fields: usize,
    kinetic_energy: f64,
    diverged: bool,
}

impl Summary {
    fn of(model: &Model) -> Self {
        let fields = || model.plates().iter().flat_map(|p| p.fields.values());
        Self {
            step_idx: model.step_idx(),
            time: model.time(),
            plates: model.plates().len(),
            fields: model.field_count(),
            continental_fields: fields().filter(|f| f.is_continental()).count(),
            subducting_fields: fields().filter(|f| f.subduction.is_some()).count(),
            kinetic_energy: model.total_kinetic_energy(),
            diverged: model.is_diverged(),
        }
    }
}

fn load_config(args: &Args) -> Result<SimConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            SimConfig::from_json(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SimConfig::default(),
    };
    if let Some(d) = args.divisions {
        config.divisions = d;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn build_model(args: &Args, config: SimConfig) -> Result<Model> {
    if let Some(path) = &args.restore {
        let json = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return Model::from_json(config, &json).with_context(|| format!("restoring {}", path.display()));
    }
    let preset = match args.preset {
        PresetName::TwoPlates => Preset::TwoPlates,
        PresetName::Procedural => Preset::Procedural { seed: args.seed, plates: args.plates },
    };
    preset.build(config).context("building preset")
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = load_config(&args)?;
    let mut model = build_model(&args, config)?;
    if model.plates().is_empty() {
        bail!("model has no plates");
    }
    info!(
        "starting at step {} with {} plates on {} grid fields",
        model.step_idx(),
        model.plates().len(),
        model.grid().len()
    );

    for _ in 0..args.steps {
        if model.step() == StepOutcome::Diverged {
            warn!("stopping early: model diverged at step {}", model.step_idx());
            break;
        }
        if args.report_every > 0 && model.step_idx() % args.report_every == 0 {
            println!("{}", serde_json::to_string(&Summary::of(&model))?);
        }
    }

    let json = model.to_json().context("serialising snapshot")?;
    fs::write(&args.output, json).with_context(|| format!("writing {}", args.output.display()))?;
    info!("wrote snapshot at step {} to {}", model.step_idx(), args.output.display());
    Ok(())
}
