//! charuco-calib CLI: calibrate a camera from ChArUco images, undistort
//! images with saved parameters, preview marker detection and print boards.

use charuco_calib::aruco::{MarkerDetector, MarkerDetectorParams};
use charuco_calib::charuco::BoardConfig;
use charuco_calib::core::{init_with_level, level_from_verbosity};
use charuco_calib::detection::{write_detection_images, DETECTION_DIR};
use charuco_calib::io::{
    load_result, save_result, summary, undistort_images, ResultFormat, UNDISTORT_DIR,
};
use charuco_calib::pipeline::{list_images, CalibrationPipeline, PipelineConfig};
use charuco_calib::print::{render_board_page, write_png};
use charuco_calib::undistort::UndistortParams;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "charuco-calib")]
#[command(about = "Camera calibration with ChArUco boards")]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log through `tracing` instead of the plain logger (JSON lines with --json-log).
    #[cfg(feature = "tracing")]
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate from a directory of board images.
    Calibrate(CalibrateArgs),

    /// Undistort images with saved camera parameters.
    Undistort(UndistortArgs),

    /// Draw detected markers onto copies of board images.
    Detect(DetectArgs),

    /// Render a printable board image.
    PrintBoard(PrintBoardArgs),
}

#[derive(Debug, Clone, Args)]
struct CalibrateArgs {
    /// Board configuration table (CSV key/value or JSON).
    #[arg(long)]
    board: PathBuf,

    /// Directory containing the calibration images.
    #[arg(long)]
    image_dir: PathBuf,

    /// Extension of the calibration images.
    #[arg(long, default_value = "png")]
    image_format: String,

    /// Result file format.
    #[arg(long, value_enum, default_value_t = ResultFormat::Binary)]
    result_format: ResultFormat,

    /// Directory for the result file.
    #[arg(long, default_value = "../result")]
    result_dir: PathBuf,

    /// Keep one in N marker-bearing images (1 keeps all) [default: 2, or the --config value].
    #[arg(long)]
    decimation: Option<usize>,

    /// Optional JSON pipeline configuration; --decimation overrides its interval.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the full calibration report.
    #[arg(long)]
    show_result: bool,

    /// Undistort the calibration images afterwards.
    #[arg(long)]
    undistortion_on: bool,

    /// Free scaling of the undistorted images (0 = valid pixels only, 1 = all pixels).
    #[arg(long, default_value_t = 1.0)]
    alpha: f64,
}

#[derive(Debug, Clone, Args)]
struct UndistortArgs {
    /// Saved camera parameters (`.json` or `.bin`).
    #[arg(long)]
    params: PathBuf,

    /// Directory containing the images to undistort.
    #[arg(long)]
    image_dir: PathBuf,

    #[arg(long, default_value = "png")]
    image_format: String,

    /// Output directory (defaults to `<image-dir>/undistort_result`).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1.0)]
    alpha: f64,
}

#[derive(Debug, Clone, Args)]
struct DetectArgs {
    /// Board configuration table (selects the dictionary).
    #[arg(long)]
    board: PathBuf,

    /// Directory containing the images.
    #[arg(long)]
    image_dir: PathBuf,

    #[arg(long, default_value = "png")]
    image_format: String,

    /// Output directory (defaults to `<image-dir>/detection_result`).
    #[arg(long)]
    out_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct PrintBoardArgs {
    /// Board configuration table.
    #[arg(long)]
    board: PathBuf,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[arg(long, default_value_t = 10.0)]
    pixels_per_mm: f64,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli);
    if let Err(err) = run(cli.command) {
        log::error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) {
    if cli.json_log {
        charuco_calib::core::init_tracing(true);
        return;
    }
    let _ = init_with_level(level_from_verbosity(cli.verbose));
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) {
    let _ = init_with_level(level_from_verbosity(cli.verbose));
}

fn run(command: Commands) -> CliResult<()> {
    match command {
        Commands::Calibrate(args) => run_calibrate(args),
        Commands::Undistort(args) => run_undistort(args),
        Commands::Detect(args) => run_detect(args),
        Commands::PrintBoard(args) => run_print_board(args),
    }
}

fn images_in(dir: &Path, ext: &str) -> CliResult<Vec<PathBuf>> {
    let images = list_images(dir, ext).map_err(|e| format!("{}: {e}", dir.display()))?;
    if images.is_empty() {
        return Err(format!("no *.{ext} images in {}", dir.display()).into());
    }
    log::info!("found {} images in {}", images.len(), dir.display());
    Ok(images)
}

fn load_pipeline_config(path: Option<&Path>) -> CliResult<PipelineConfig> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let raw = std::fs::read_to_string(path).map_err(|e| format!("{}: {e}", path.display()))?;
    Ok(serde_json::from_str(&raw)?)
}

fn run_calibrate(args: CalibrateArgs) -> CliResult<()> {
    let board = BoardConfig::load(&args.board)?.build_board()?;
    let mut config = load_pipeline_config(args.config.as_deref())?;
    if let Some(interval) = args.decimation {
        config.decimation.interval = interval.max(1);
    }

    let images = images_in(&args.image_dir, &args.image_format)?;
    let pipeline = CalibrationPipeline::new(board, config)?;
    let run = pipeline.run(&images)?;

    println!("Used {} images for this calibration.", run.report.used);
    if args.show_result {
        print!("{}", summary(&run.model));
    }
    let path = save_result(&run.model, &args.result_dir, args.result_format)?;
    println!("Saved {}", path.display());

    if args.undistortion_on {
        let params = UndistortParams {
            alpha: args.alpha,
            ..UndistortParams::default()
        };
        let out_dir = args.image_dir.join(UNDISTORT_DIR);
        let written = undistort_images(&run.model, &images, &out_dir, params)?;
        println!("Undistorted {} images into {}", written.len(), out_dir.display());
    }
    Ok(())
}

fn run_undistort(args: UndistortArgs) -> CliResult<()> {
    let model = load_result(&args.params)?;
    let images = images_in(&args.image_dir, &args.image_format)?;
    let out_dir = args
        .out_dir
        .unwrap_or_else(|| args.image_dir.join(UNDISTORT_DIR));
    let params = UndistortParams {
        alpha: args.alpha,
        ..UndistortParams::default()
    };
    let written = undistort_images(&model, &images, &out_dir, params)?;
    println!("Undistorted {} images into {}", written.len(), out_dir.display());
    Ok(())
}

fn run_detect(args: DetectArgs) -> CliResult<()> {
    let board = BoardConfig::load(&args.board)?.build_board()?;
    let detector = MarkerDetector::new(board.dictionary().clone(), MarkerDetectorParams::default())?;
    let images = images_in(&args.image_dir, &args.image_format)?;
    let out_dir = args
        .out_dir
        .unwrap_or_else(|| args.image_dir.join(DETECTION_DIR));
    let outcomes = write_detection_images(&detector, &images, &out_dir)?;
    for o in &outcomes {
        println!("{}: {} markers", o.source.display(), o.ids.len());
    }
    let written = outcomes.iter().filter(|o| o.written.is_some()).count();
    println!("Annotated {written} images into {}", out_dir.display());
    Ok(())
}

fn run_print_board(args: PrintBoardArgs) -> CliResult<()> {
    let config = BoardConfig::load(&args.board)?;
    let board = config.build_board()?;
    let raster = render_board_page(&board, &config, args.pixels_per_mm)?;
    write_png(&raster.image, &args.out, Some(args.pixels_per_mm))?;
    println!(
        "Wrote {} ({}x{} px)",
        args.out.display(),
        raster.image.width,
        raster.image.height
    );
    Ok(())
}
