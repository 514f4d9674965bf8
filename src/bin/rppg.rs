//! rppg CLI - Command-line interface for rPPG Flux
//!
//! Commands:
//! - analyze: Estimate vitals from raw rgb24 video (file or stdin), an image
//!   sequence directory, or (with the opencv feature) a video file
//! - synth: Write a synthetic raw rgb24 face video
//! - config: Print the default configuration as TOML
//! - doctor: Diagnose configuration and environment

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use rppg_flux::config::AnalysisConfig;
use rppg_flux::pipeline::VitalsProcessor;
use rppg_flux::source::{FrameSource, ImageSequenceSource, RawRgbSource};
use rppg_flux::synthetic::{SyntheticFaceVideo, FRAME_HEIGHT, FRAME_WIDTH};
use rppg_flux::types::SignalChannel;
use rppg_flux::{ComputeError, DetectionStrategy, PRODUCER_NAME, RPPG_VERSION};

/// rPPG Flux - camera-based heart rate and HRV estimation
#[derive(Parser)]
#[command(name = "rppg")]
#[command(author = "Synheart AI Inc")]
#[command(version = RPPG_VERSION)]
#[command(about = "Estimate vitals from face video", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate vitals from face video
    ///
    /// Raw input is headerless rgb24, e.g.
    /// `ffmpeg -i face.mp4 -f rawvideo -pix_fmt rgb24 - | rppg analyze -i - -W 640 -H 480 --fps 30`
    Analyze {
        /// Input file path (use - for stdin), or a directory of PNG/JPEG frames
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, value_enum, default_value = "raw")]
        format: FormatArg,

        /// Frame width in pixels (raw input)
        #[arg(short = 'W', long)]
        width: Option<u32>,

        /// Frame height in pixels (raw input)
        #[arg(short = 'H', long)]
        height: Option<u32>,

        /// Frame rate of the stream (raw and image input)
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Haar cascade XML file (opencv builds)
        #[arg(long)]
        cascade: Option<PathBuf>,

        /// Configuration file (TOML)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the detection strategy
        #[arg(long)]
        strategy: Option<StrategyArg>,

        /// Override the signal channel
        #[arg(long)]
        channel: Option<ChannelArg>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Write a synthetic rgb24 face video (160x120)
    Synth {
        /// Output file path (use - for stdout)
        #[arg(short, long)]
        output: PathBuf,

        /// Duration in seconds
        #[arg(long, default_value = "20")]
        seconds: f64,

        /// Frame rate
        #[arg(long, default_value = "30")]
        fps: f64,

        /// Mean pulse rate
        #[arg(long, default_value = "75")]
        bpm: f64,

        /// Random seed
        #[arg(long, default_value = "1")]
        seed: u64,
    },

    /// Print the default configuration as TOML
    Config {
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Diagnose configuration and environment
    Doctor {
        /// Configuration file to check
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    /// Landmark model with cascade fallback
    Landmark,
    /// Classical cascade only
    Cascade,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    /// Green channel
    Green,
    /// 3G - 2R chrominance
    Chrom,
    /// Plane orthogonal to skin
    Pos,
}

#[derive(Clone, Copy, PartialEq, ValueEnum)]
enum FormatArg {
    /// Headerless rgb24 frames
    Raw,
    /// Directory of PNG/JPEG frames in name order
    Images,
    /// Video container decoded by OpenCV
    Video,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), RppgCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            format,
            width,
            height,
            fps,
            cascade,
            config,
            strategy,
            channel,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            apply_overrides(&mut config, strategy, channel, cascade);
            let mut source = open_source(&input, format, width.zip(height), fps)?;
            cmd_analyze(config, source.as_mut(), &output)
        }
        Commands::Synth {
            output,
            seconds,
            fps,
            bpm,
            seed,
        } => cmd_synth(&output, seconds, fps, bpm, seed),
        Commands::Config { output } => cmd_config(output.as_deref()),
        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn is_stdio(path: &Path) -> bool {
    path.to_string_lossy() == "-"
}

fn load_config(path: Option<&Path>) -> Result<AnalysisConfig, RppgCliError> {
    match path {
        Some(path) => Ok(AnalysisConfig::load_from_file(path)?),
        None => Ok(AnalysisConfig::default()),
    }
}

fn write_output(path: &Path, contents: &str) -> Result<(), RppgCliError> {
    if is_stdio(path) {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{contents}")?;
        stdout.flush()?;
    } else {
        fs::write(path, format!("{contents}\n"))?;
    }
    Ok(())
}

fn apply_overrides(
    config: &mut AnalysisConfig,
    strategy: Option<StrategyArg>,
    channel: Option<ChannelArg>,
    cascade: Option<PathBuf>,
) {
    if let Some(strategy) = strategy {
        config.detection.strategy = match strategy {
            StrategyArg::Landmark => DetectionStrategy::Landmark,
            StrategyArg::Cascade => DetectionStrategy::Cascade,
        };
    }
    if let Some(channel) = channel {
        config.signal.channel = match channel {
            ChannelArg::Green => SignalChannel::Green,
            ChannelArg::Chrom => SignalChannel::Chrom,
            ChannelArg::Pos => SignalChannel::Pos,
        };
    }
    if cascade.is_some() {
        config.detection.haar.model_path = cascade;
    }
}

fn open_source(
    input: &Path,
    format: FormatArg,
    dims: Option<(u32, u32)>,
    fps: f64,
) -> Result<Box<dyn FrameSource>, RppgCliError> {
    match format {
        FormatArg::Raw => {
            let (width, height) = dims.ok_or_else(|| {
                ComputeError::InvalidConfig("raw input needs --width and --height".to_string())
            })?;
            let reader: Box<dyn Read> = if is_stdio(input) {
                if atty::is(atty::Stream::Stdin) {
                    return Err(RppgCliError::NoInput);
                }
                Box::new(BufReader::new(io::stdin().lock()))
            } else {
                Box::new(BufReader::new(fs::File::open(input)?))
            };
            Ok(Box::new(RawRgbSource::new(reader, width, height, fps)?))
        }
        FormatArg::Images => Ok(Box::new(ImageSequenceSource::from_dir(input, fps)?)),
        FormatArg::Video => open_video(input),
    }
}

#[cfg(feature = "opencv")]
fn open_video(input: &Path) -> Result<Box<dyn FrameSource>, RppgCliError> {
    Ok(Box::new(rppg_flux::source::VideoFileSource::open(input)?))
}

#[cfg(not(feature = "opencv"))]
fn open_video(_input: &Path) -> Result<Box<dyn FrameSource>, RppgCliError> {
    Err(ComputeError::Unsupported(
        "video decoding needs the opencv feature; decode to rgb24 or an image directory first".to_string(),
    )
    .into())
}

fn cmd_analyze(
    config: AnalysisConfig,
    source: &mut dyn FrameSource,
    output: &Path,
) -> Result<(), RppgCliError> {
    let processor = VitalsProcessor::new(config)?;
    let report = processor.process_to_json(source)?;
    write_output(output, &report)
}

fn cmd_synth(output: &Path, seconds: f64, fps: f64, bpm: f64, seed: u64) -> Result<(), RppgCliError> {
    let mut video = SyntheticFaceVideo::new(fps, seconds, bpm, seed);

    let writer: Box<dyn Write> = if is_stdio(output) {
        Box::new(io::stdout().lock())
    } else {
        Box::new(fs::File::create(output)?)
    };
    let mut writer = BufWriter::new(writer);

    let mut frames = 0usize;
    while let Some(frame) = video.next_frame()? {
        writer.write_all(frame.as_bytes())?;
        frames += 1;
    }
    writer.flush()?;

    eprintln!(
        "Wrote {frames} frames ({FRAME_WIDTH}x{FRAME_HEIGHT} rgb24 @ {fps} fps, ~{bpm} BPM)"
    );
    Ok(())
}

fn cmd_config(output: Option<&Path>) -> Result<(), RppgCliError> {
    let toml = AnalysisConfig::default().to_toml()?;
    match output {
        Some(path) => write_output(path, &toml),
        None => write_output(Path::new("-"), &toml),
    }
}

fn cmd_doctor(config: Option<&Path>, json: bool) -> Result<(), RppgCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "rppg_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("rppg-flux version {RPPG_VERSION}"),
    });

    match config {
        Some(path) if !path.exists() => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Warning,
            message: "Config file does not exist".to_string(),
        }),
        Some(path) => match AnalysisConfig::load_from_file(path) {
            Ok(cfg) => {
                checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Config valid (strategy {:?}, band {}-{} Hz)",
                        cfg.detection.strategy, cfg.signal.band_low_hz, cfg.signal.band_high_hz
                    ),
                });
                if cfg.detection.strategy == DetectionStrategy::Landmark {
                    checks.push(DoctorCheck {
                        name: "landmark_model".to_string(),
                        status: CheckStatus::Warning,
                        message: "No landmark model is bundled with the CLI; cascade will be used"
                            .to_string(),
                    });
                }
            }
            Err(e) => checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: e.to_string(),
            }),
        },
        None => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using built-in defaults".to_string(),
        }),
    }

    checks.push(detector_check());

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass frames with -i <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (ready for -i -)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: RPPG_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("rPPG Doctor Report");
        println!("==================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(RppgCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

#[cfg(feature = "opencv")]
fn detector_check() -> DoctorCheck {
    match rppg_flux::tracker::HaarCascadeDetector::locate() {
        Some(path) => DoctorCheck {
            name: "face_detector".to_string(),
            status: CheckStatus::Ok,
            message: format!("Haar cascade found at {}", path.display()),
        },
        None => DoctorCheck {
            name: "face_detector".to_string(),
            status: CheckStatus::Warning,
            message: "No Haar cascade found (set HAARCASCADE_PATH); skin-colour cascade will be used"
                .to_string(),
        },
    }
}

#[cfg(not(feature = "opencv"))]
fn detector_check() -> DoctorCheck {
    DoctorCheck {
        name: "face_detector".to_string(),
        status: CheckStatus::Ok,
        message: "Built without OpenCV; using the skin-colour cascade".to_string(),
    }
}

// Error types

#[derive(Debug)]
enum RppgCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoInput,
    DoctorFailed,
}

impl From<io::Error> for RppgCliError {
    fn from(e: io::Error) -> Self {
        RppgCliError::Io(e)
    }
}

impl From<ComputeError> for RppgCliError {
    fn from(e: ComputeError) -> Self {
        RppgCliError::Compute(e)
    }
}

impl From<serde_json::Error> for RppgCliError {
    fn from(e: serde_json::Error) -> Self {
        RppgCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

/// `InsufficientDetectionError` -> `INSUFFICIENT_DETECTION_ERROR`
fn screaming_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        out.push(c.to_ascii_uppercase());
    }
    out
}

impl From<RppgCliError> for CliError {
    fn from(e: RppgCliError) -> Self {
        match e {
            RppgCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            RppgCliError::Compute(e) => CliError {
                code: screaming_snake(e.kind()),
                message: e.to_string(),
                hint: Some(e.hint().to_string()),
            },
            RppgCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            RppgCliError::NoInput => CliError {
                code: "NO_INPUT".to_string(),
                message: "stdin is a terminal, no frames to read".to_string(),
                hint: Some(
                    "Pipe rgb24 frames, e.g. ffmpeg -i face.mp4 -f rawvideo -pix_fmt rgb24 - | rppg analyze -i - ..."
                        .to_string(),
                ),
            },
            RppgCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
