use std::error::Error;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

use anemodx::config::{self, ScreeningConfig};
use anemodx::db::SqliteProfileStore;
use anemodx::models::NewProfile;
use anemodx::pipeline::orchestrator::{AttemptOutcome, ScanOrchestrator};
use anemodx::pipeline::preparation::{CapturedImage, JpegPreparer};
use anemodx::pipeline::transport::{BackendContract, CaptureDeviceClient, HttpInferenceClient};
use anemodx::stub_server::{StubBackend, StubBehavior};

#[derive(Debug, Parser)]
#[command(
    name = "anemodx",
    version,
    about = "Fingernail-photo anemia screening client",
    long_about = "anemodx prepares a fingernail photo, sends it to a hemoglobin inference\n\
        service, classifies the estimate into a risk tier, and keeps per-profile history.\n\n\
        Configuration comes from ANEMODX_* environment variables.\n\n\
        EXAMPLES:\n\
        \n  anemodx stub --hb 9.1 --anemic              Run a local fake backend\n\
        \n  anemodx analyze nail.jpg --save              Analyze and save to the default profile\n\
        \n  anemodx capture --analyze                    Grab a frame from the camera and analyze it\n\
        \n  anemodx history <profile-id>                 Show a profile's scan history"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Analyze a photo already on disk
    Analyze(AnalyzeArgs),
    /// Pull a frame from the capture peripheral
    Capture(CaptureArgs),
    /// Manage profiles
    #[command(subcommand)]
    Profiles(ProfileCommand),
    /// Show scan history and summary for a profile
    History { profile: Uuid },
    /// Serve a local stand-in for the inference backend
    Stub(StubArgs),
}

#[derive(Debug, Args)]
struct SaveArgs {
    /// Profile to save under (defaults to the first profile)
    #[arg(long)]
    profile: Option<Uuid>,
    /// Save a successful result to the profile's history
    #[arg(long)]
    save: bool,
    /// Override the backend contract
    #[arg(long)]
    contract: Option<BackendContract>,
}

#[derive(Debug, Args)]
struct AnalyzeArgs {
    image: PathBuf,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Debug, Args)]
struct CaptureArgs {
    /// Directory for captured frames (defaults to the data directory)
    #[arg(long)]
    out: Option<PathBuf>,
    /// Analyze the frame right after capturing it
    #[arg(long)]
    analyze: bool,
    #[command(flatten)]
    save: SaveArgs,
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<String>,
    },
    Rename {
        id: Uuid,
        name: String,
    },
    Delete {
        id: Uuid,
    },
}

#[derive(Debug, Args)]
struct StubArgs {
    #[arg(long, default_value_t = 8000)]
    port: u16,
    /// Hemoglobin estimate to return, g/dL
    #[arg(long, default_value_t = 13.2)]
    hb: f64,
    #[arg(long)]
    anemic: bool,
    #[arg(long)]
    confidence: Option<f64>,
    /// Artificial latency per prediction
    #[arg(long, default_value_t = 0)]
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    anemodx::init_tracing();
    let cli = Cli::parse();
    let config = ScreeningConfig::from_env()?;

    tracing::debug!(version = config::APP_VERSION, ?config, "Configuration loaded");

    match cli.command {
        Command::Analyze(args) => {
            analyze(&config, CapturedImage::new(args.image), &args.save).await
        }
        Command::Capture(args) => capture(&config, args).await,
        Command::Profiles(command) => profiles(&config, command),
        Command::History { profile } => history(&config, profile),
        Command::Stub(args) => stub(args).await,
    }
}

fn open_store(config: &ScreeningConfig) -> Result<SqliteProfileStore, Box<dyn Error>> {
    Ok(SqliteProfileStore::open(&config::database_path(&config.data_dir))?)
}

async fn analyze(
    config: &ScreeningConfig,
    captured: CapturedImage,
    save: &SaveArgs,
) -> Result<(), Box<dyn Error>> {
    let mut backend = config.backend.clone();
    if let Some(contract) = save.contract {
        backend.contract = contract;
    }

    let orchestrator = ScanOrchestrator::new(
        Arc::new(JpegPreparer::new(config.preparation.clone())),
        Arc::new(HttpInferenceClient::new(backend)?),
        config.risk_policy,
    )
    .with_skip_health_check(config.skip_health_check);

    match orchestrator.run(captured).await? {
        AttemptOutcome::Success(result) => {
            println!("{}", result.risk_level());
            println!("Hemoglobin: {:.1} g/dL", result.hemoglobin_level());
            match result.confidence() {
                Some(confidence) => println!("Confidence: {confidence:.0}%"),
                None => println!("Confidence: not reported"),
            }
            println!("Recommendations:");
            for recommendation in result.recommendations() {
                println!("  - {recommendation}");
            }

            if save.save {
                let store = open_store(config)?;
                let profile_id = match save.profile {
                    Some(id) => id,
                    None => store.ensure_default_profile()?.id,
                };
                let record = orchestrator.confirm_save(&store, profile_id)?;
                println!("Saved scan {} to profile {}", record.id, profile_id);
            }
            Ok(())
        }
        AttemptOutcome::Failed(failure) => {
            tracing::error!(kind = %failure.kind, "Analysis failed");
            Err(failure.user_message().into())
        }
        AttemptOutcome::Cancelled => Err("Analysis cancelled".into()),
    }
}

async fn capture(config: &ScreeningConfig, args: CaptureArgs) -> Result<(), Box<dyn Error>> {
    let client = CaptureDeviceClient::new(config.device.clone())?;
    if !client.check_availability().await {
        return Err(format!("Capture device at {} is not reachable", config.device.base_url).into());
    }
    let info = client.device_info().await?;
    println!("Connected to {}", info.device);

    let out = args
        .out
        .unwrap_or_else(|| config::capture_cache_dir(&config.data_dir));
    let captured = client.capture(&out).await?;
    println!("Captured {}", captured.reference());

    if args.analyze {
        analyze(config, captured, &args.save).await?;
    }
    Ok(())
}

fn profiles(config: &ScreeningConfig, command: ProfileCommand) -> Result<(), Box<dyn Error>> {
    let store = open_store(config)?;
    match command {
        ProfileCommand::List => {
            store.ensure_default_profile()?;
            for profile in store.list_profiles()? {
                println!("{}  {}  {}", profile.id, profile.color, profile.name);
            }
        }
        ProfileCommand::Add { name, age, gender } => {
            let profile = store.create_profile(&NewProfile { name, age, gender })?;
            println!("Added {} ({})", profile.name, profile.id);
        }
        ProfileCommand::Rename { id, name } => {
            store.rename_profile(&id, &name)?;
            println!("Renamed {id}");
        }
        ProfileCommand::Delete { id } => {
            store.delete_profile(&id)?;
            println!("Deleted {id}");
        }
    }
    Ok(())
}

fn history(config: &ScreeningConfig, profile: Uuid) -> Result<(), Box<dyn Error>> {
    let store = open_store(config)?;
    let summary = store.summary(&profile)?;

    println!("Scans: {}", summary.scan_count);
    if let Some(latest) = summary.latest_risk {
        println!("Latest: {latest}");
    }
    match summary.mean_confidence {
        Some(mean) => println!("Average confidence: {mean:.0}%"),
        None => println!("Average confidence: n/a"),
    }
    for scan in store.scans(&profile)? {
        println!(
            "{}  {:<11}  {:>4.1} g/dL",
            scan.created_at.format("%Y-%m-%d %H:%M"),
            scan.risk_level.label(),
            scan.hemoglobin_level
        );
    }
    Ok(())
}

async fn stub(args: StubArgs) -> Result<(), Box<dyn Error>> {
    let behavior = StubBehavior {
        hb_pred: args.hb,
        is_anemic: args.anemic,
        confidence: args.confidence,
        delay: Duration::from_millis(args.delay_ms),
        ..StubBehavior::default()
    };
    let server = StubBackend::bind(SocketAddr::from(([0, 0, 0, 0], args.port)), behavior).await?;
    println!("Stub backend listening on {}", server.base_url());

    tokio::signal::ctrl_c().await?;
    server.shutdown().await;
    Ok(())
}
