use anyhow::{Context, Result};
use change_analyzer::error::AnalysisError;
use change_analyzer::parallel::AsyncParallelExecutor;
use change_analyzer::{AggMethod, AnalysisOrchestrator, AnalysisRequest, EngineConfig, TabularDataset};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "change-analyzer")]
#[command(about = "Before/after comparison of tabular datasets")]
#[command(version)]
struct Args {
    /// Engine configuration file (or set ANALYZER_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two CSV snapshots
    Analyze {
        /// CSV file for the "before" period
        before: PathBuf,

        /// CSV file for the "after" period
        after: PathBuf,

        /// Grouping column
        #[arg(long, required_unless_present = "request")]
        group_by: Option<String>,

        /// Value column
        #[arg(long, required_unless_present = "request")]
        value: Option<String>,

        /// Aggregation method: sum, mean or count
        #[arg(long, default_value = "sum")]
        agg: String,

        /// Breakdown column (repeatable)
        #[arg(long = "breakdown")]
        breakdown: Vec<String>,

        /// Significance level for the statistical tests
        #[arg(long, default_value_t = 0.05)]
        alpha: f64,

        #[arg(long)]
        no_stats: bool,

        #[arg(long)]
        no_trend: bool,

        #[arg(long)]
        no_correlation: bool,

        /// Read the full request from a JSON file instead of the flags above
        #[arg(long)]
        request: Option<PathBuf>,

        /// Write the result here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(long)]
        pretty: bool,
    },
    /// Print the column profile of a CSV file
    Inspect {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        if let Some(analysis_error) = e.downcast_ref::<AnalysisError>() {
            if let Ok(report) = serde_json::to_string_pretty(&analysis_error.report()) {
                eprintln!("{}", report);
            }
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = load_config(args.config)?;

    match args.command {
        Commands::Analyze {
            before,
            after,
            group_by,
            value,
            agg,
            breakdown,
            alpha,
            no_stats,
            no_trend,
            no_correlation,
            request,
            output,
            pretty,
        } => {
            let request = match request {
                Some(path) => read_request(&path)?,
                None => {
                    // clap enforces both flags when no request file is given
                    let group_by = group_by.context("--group-by is required")?;
                    let value = value.context("--value is required")?;
                    let agg_method: AggMethod = agg.parse()?;
                    let mut request = AnalysisRequest::new(group_by, value, agg_method);
                    request.breakdown_cols = breakdown;
                    request.advanced_options.significance_level = alpha;
                    request.advanced_options.enable_statistical_tests = !no_stats;
                    request.advanced_options.enable_trend_analysis = !no_trend;
                    request.advanced_options.enable_correlation_analysis = !no_correlation;
                    request
                }
            };
            analyze(config, before, after, request, output, pretty).await
        }
        Commands::Inspect { file } => {
            let dataset = TabularDataset::from_csv(&file)?;
            let profile = dataset.profile()?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
            Ok(())
        }
    }
}

fn load_config(flag: Option<PathBuf>) -> Result<EngineConfig> {
    let path = flag.or_else(|| std::env::var("ANALYZER_CONFIG").ok().map(PathBuf::from));
    match path {
        Some(path) => {
            info!("Loading engine config from {:?}", path);
            EngineConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
        }
        None => Ok(EngineConfig::default()),
    }
}

fn read_request(path: &Path) -> Result<AnalysisRequest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read request {}", path.display()))?;
    let request = serde_json::from_str(&content).map_err(AnalysisError::from)?;
    Ok(request)
}

async fn analyze(
    config: EngineConfig,
    before: PathBuf,
    after: PathBuf,
    request: AnalysisRequest,
    output: Option<PathBuf>,
    pretty: bool,
) -> Result<()> {
    info!("Loading {:?} and {:?}", before, after);
    let (before, after) = AsyncParallelExecutor::execute_pair(
        move || TabularDataset::from_csv(before),
        move || TabularDataset::from_csv(after),
    )
    .await?;

    let orchestrator = AnalysisOrchestrator::new(config);
    let result = tokio::task::spawn_blocking(move || orchestrator.analyze(&before, &after, &request))
        .await
        .context("Analysis task failed")??;

    let json = if pretty {
        serde_json::to_string_pretty(&result)?
    } else {
        serde_json::to_string(&result)?
    };

    match output {
        Some(path) => {
            std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Result written to {:?}", path);
        }
        None => println!("{}", json),
    }
    Ok(())
}
