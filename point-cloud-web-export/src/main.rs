/// `pcwe`: export lidar sequences for the web viewer and validate the output.
use clap::{Args, Parser, Subcommand};
use constants::container::MANIFEST_FILE;
use point_cloud_web_export::container::{read_frame, read_header};
use point_cloud_web_export::input::discover_frames;
use point_cloud_web_export::manifest::{load_manifest, normalize_branches, write_manifest};
use point_cloud_web_export::config::load_branches;
use point_cloud_web_export::pipeline::{print_plan, print_summary};
use point_cloud_web_export::{
    ExportConfig, ExportError, Frame, QuantizationMode, Result, SequenceExporter, Tier,
    run_validators,
};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pcwe", version, about = "Point cloud web export")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Arguments of `pcwe convert`.
#[derive(Args, Debug, Default)]
struct ConvertArgs {
    /// Directory of .las/.laz/.bin frames
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    out_dir: PathBuf,
    #[arg(long)]
    seq_id: String,
    /// Inclusive frame index range, e.g. 0:49
    #[arg(long)]
    frames: Option<String>,
    /// high (100k) or low (50k)
    #[arg(long)]
    tier: Option<String>,
    /// off, half or normalized-integer
    #[arg(long)]
    quantize: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    /// JSON export config; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON branch list, `{"branches": [...]}` or a bare array
    #[arg(long)]
    branches: Option<PathBuf>,
    /// Sample frames and print the planned output without writing
    #[arg(long)]
    dry_run: bool,
    /// Run the validators on the written sequence
    #[arg(long)]
    validate: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a directory of frames into a web sequence
    Convert(ConvertArgs),
    /// Validate an exported sequence directory
    Validate {
        #[arg(long)]
        out_dir: PathBuf,
        /// Defaults to <out-dir>/manifest.json
        #[arg(long)]
        manifest: Option<PathBuf>,
        /// full or fallback
        #[arg(long)]
        tier: String,
        #[arg(long)]
        expected_frames: usize,
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the header of a frame container
    Inspect { file: PathBuf },
    /// Sync manifest branches with the detection files of the first frame
    NormalizeBranches {
        #[arg(long)]
        seq_dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("point_cloud_web_export=info,pcwe=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Convert(args) => convert(&args),
        Commands::Validate {
            out_dir,
            manifest,
            tier,
            expected_frames,
            json,
        } => validate(&out_dir, manifest, &tier, expected_frames, json),
        Commands::Inspect { file } => inspect(&file),
        Commands::NormalizeBranches { seq_dir } => normalize(&seq_dir),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{e}");
            ExitCode::from(1)
        }
    }
}

impl ConvertArgs {
    /// Config file (if any) with flag overrides applied on top.
    fn export_config(&self) -> Result<ExportConfig> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading export config from {}", path.display());
                ExportConfig::load(path)?
            }
            None => ExportConfig::default(),
        };
        if let Some(tier) = &self.tier {
            config.tier = tier.parse::<Tier>()?;
        }
        if let Some(mode) = &self.quantize {
            config.quantization = mode.parse::<QuantizationMode>()?;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(path) = &self.branches {
            config.branches = load_branches(path)?;
        }
        Ok(config)
    }
}

/// Parse an inclusive `start:end` frame index range.
fn parse_frame_range(range: &str) -> Result<(usize, usize)> {
    let invalid = || {
        ExportError::InvalidArgument(format!(
            "Invalid frame range '{range}': expected start:end with 0 <= start <= end"
        ))
    };
    let (start, end) = range.split_once(':').ok_or_else(invalid)?;
    let start: usize = start.trim().parse().map_err(|_| invalid())?;
    let end: usize = end.trim().parse().map_err(|_| invalid())?;
    if start > end {
        return Err(invalid());
    }
    Ok((start, end))
}

fn convert(args: &ConvertArgs) -> Result<ExitCode> {
    let config = args.export_config()?;

    let mut sources = discover_frames(&args.input)?;
    if let Some(range) = &args.frames {
        let (start, end) = parse_frame_range(range)?;
        sources = sources
            .into_iter()
            .enumerate()
            .filter(|(index, _)| (start..=end).contains(index))
            .map(|(_, source)| source)
            .collect();
    }
    if sources.is_empty() {
        return Err(ExportError::InvalidArgument(format!(
            "no frames found in {}",
            args.input.display()
        )));
    }
    info!("Loading {} frames from {}", sources.len(), args.input.display());

    let frames: Vec<Frame> = sources
        .par_iter()
        .map(|source| -> Result<Frame> { Ok(Frame::new(source.id.clone(), source.load()?)) })
        .collect::<Result<_>>()?;

    let budget = match config.tier {
        Tier::High => "full",
        Tier::Low => "fallback",
    };
    let exporter = SequenceExporter::new(&args.out_dir, &args.seq_id, config);

    if args.dry_run {
        print_plan(&exporter.plan(frames)?);
        return Ok(ExitCode::SUCCESS);
    }

    let summary = exporter.export(frames)?;
    print_summary(&summary);

    if args.validate {
        let report = run_validators(
            &args.out_dir,
            &summary.manifest_path,
            budget,
            summary.frame_count,
        );
        report.print();
        if !report.passed() {
            return Ok(ExitCode::from(2));
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn validate(
    out_dir: &Path,
    manifest: Option<PathBuf>,
    tier: &str,
    expected_frames: usize,
    json: bool,
) -> Result<ExitCode> {
    let manifest_path = manifest.unwrap_or_else(|| out_dir.join(MANIFEST_FILE));
    let report = run_validators(out_dir, &manifest_path, tier, expected_frames);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        report.print();
    }

    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}

fn inspect(file: &Path) -> Result<ExitCode> {
    for line in describe_container(file)? {
        println!("{line}");
    }
    Ok(ExitCode::SUCCESS)
}

/// Header summary of a container; the payload is only decoded for known modes.
fn describe_container(file: &Path) -> Result<Vec<String>> {
    let header = read_header(file)?;
    let mut lines = vec![format!("{}:", file.display())];

    match header.mode() {
        Some(mode) => {
            let (_, points) = read_frame(file)?;
            lines.push(format!("  Mode: {mode}"));
            lines.push(format!("  Points: {}", header.point_count));
            lines.push(format!("  Values per point: {}", points.width().len()));
        }
        None => {
            lines.push(format!("  Mode: unknown ({})", header.mode_tag));
            lines.push(format!("  Points: {}", header.point_count));
        }
    }
    for (axis, name) in ['X', 'Y', 'Z'].into_iter().enumerate() {
        lines.push(format!(
            "  {name}: {:.3} to {:.3}",
            header.aabb.min[axis], header.aabb.max[axis]
        ));
    }
    Ok(lines)
}

fn normalize(seq_dir: &Path) -> Result<ExitCode> {
    let path = seq_dir.join(MANIFEST_FILE);
    let mut manifest = load_manifest(&path)?;
    let before = manifest.branches.clone();

    if normalize_branches(&mut manifest) {
        write_manifest(&manifest, &path)?;
        println!(
            "Updated {}: {:?} -> {:?}",
            path.display(),
            before,
            manifest.branches
        );
    } else {
        println!("{} already consistent", path.display());
    }
    Ok(ExitCode::SUCCESS)
}
