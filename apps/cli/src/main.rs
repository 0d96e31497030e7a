use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rendershare_printing::{
    ArtifactStore, CallReply, DirectoryDistributor, Pipeline, PipelineConfig, RenderRequest,
    RenderTarget, SceneView, SpoolPrintService, ViewSurface,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

#[derive(Parser)]
#[command(
    name = "rendershare-cli",
    about = "Render scene documents to PDF, then share or print them",
    author,
    version
)]
struct Cli {
    /// 設定檔路徑（JSON）。 / Path to a JSON configuration file.
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// 覆寫暫存目錄。 / Override the scratch directory.
    #[arg(long, global = true, value_name = "DIR")]
    scratch_dir: Option<PathBuf>,

    /// 日誌輸出格式。 / Log output format (written to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Compact,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// 產生 PDF 但不分享。 / Render a scene to PDF without sharing it.
    Render(RenderArgs),
    /// 產生 PDF 並分享。 / Render a scene to PDF and share it.
    Share(ShareArgs),
    /// 分享既有的 PDF。 / Share a PDF that already exists.
    ShareExisting(ShareExistingArgs),
    /// 透過列印佇列輸出並分享。 / Print a scene through the spool service and share the result.
    Print(PrintArgs),
    /// 清除過期的暫存檔。 / Delete expired artifacts from the scratch directory.
    Sweep(SweepArgs),
}

#[derive(Args)]
struct SceneArgs {
    /// 場景描述檔（JSON）。 / Scene description (JSON).
    #[arg(long, value_name = "PATH")]
    scene: PathBuf,

    /// 輸出檔名的基底。 / Base name for the generated file.
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// 文件或分享標題。 / Document and share-sheet title.
    #[arg(long)]
    title: Option<String>,
}

#[derive(Args)]
struct RenderArgs {
    #[command(flatten)]
    scene: SceneArgs,
}

#[derive(Args)]
struct ShareArgs {
    #[command(flatten)]
    scene: SceneArgs,

    /// 分享目的資料夾。 / Directory receiving shared files.
    #[arg(long, value_name = "DIR")]
    outbox: PathBuf,

    /// 同時寫入的鏡像資料夾。 / Also write the PDF into this directory.
    #[arg(long, value_name = "DIR")]
    mirror: Option<PathBuf>,
}

#[derive(Args)]
struct ShareExistingArgs {
    /// 要分享的 PDF。 / PDF file to share.
    #[arg(value_name = "PATH")]
    path: PathBuf,

    /// 分享目的資料夾。 / Directory receiving shared files.
    #[arg(long, value_name = "DIR")]
    outbox: PathBuf,

    /// 分享標題。 / Share-sheet title.
    #[arg(long)]
    title: Option<String>,
}

#[derive(Args)]
struct PrintArgs {
    #[command(flatten)]
    scene: SceneArgs,

    /// 列印佇列輸出資料夾。 / Spool directory where print jobs land.
    #[arg(long, value_name = "DIR")]
    spool: Option<PathBuf>,

    /// 分享目的資料夾。 / Directory receiving shared files.
    #[arg(long, value_name = "DIR")]
    outbox: PathBuf,
}

#[derive(Args)]
struct SweepArgs {
    /// 保留秒數；預設沿用設定。 / Maximum age in seconds; defaults to the configured retention.
    #[arg(long, value_name = "SECS")]
    max_age_secs: Option<u64>,
}

#[tokio::main]
async fn main() {
    match run().await {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

/// Returns whether the request resolved.
async fn run() -> Result<bool> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(dir) = &cli.scratch_dir {
        config.scratch_dir = dir.clone();
    }
    config.sanitize();
    debug!(scratch = %config.scratch_dir.display(), "configuration ready");

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let reply = match cli.command {
        Commands::Render(args) => {
            let request = scene_request(&args.scene, RenderTarget::RenderOnly);
            let pipeline = scene_pipeline(config, &args.scene, None)?;
            CallReply::from_result(pipeline.run_with_cancel(request, &cancel).await)
        }
        Commands::Share(args) => {
            if let Some(mirror) = &args.mirror {
                config.mirror_dir = Some(mirror.clone());
            }
            let request = scene_request(&args.scene, RenderTarget::ShareAfterRender);
            let pipeline = scene_pipeline(config, &args.scene, Some(args.outbox))?;
            CallReply::from_result(pipeline.run_with_cancel(request, &cancel).await)
        }
        Commands::ShareExisting(args) => {
            let mut request = RenderRequest::share_existing(args.path);
            request.title = args.title;
            let spool = SpoolPrintService::from_config(&config);
            let pipeline = Pipeline::new(
                config,
                None,
                Arc::new(spool),
                DirectoryDistributor::new(args.outbox),
            );
            CallReply::from_result(pipeline.run_with_cancel(request, &cancel).await)
        }
        Commands::Print(args) => {
            if let Some(spool) = &args.spool {
                config.print.spool_dir = Some(spool.clone());
            }
            let request = scene_request(&args.scene, RenderTarget::SystemPrint);
            let pipeline = scene_pipeline(config, &args.scene, Some(args.outbox))?;
            CallReply::from_result(pipeline.run_with_cancel(request, &cancel).await)
        }
        Commands::Sweep(args) => {
            let store = ArtifactStore::new(
                config.scratch_dir.clone(),
                config.extension.clone(),
                config.default_base_name.clone(),
            );
            let max_age = args
                .max_age_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.retention());
            let report = store.sweep(max_age);
            let summary = serde_json::json!({
                "dir": store.dir(),
                "deleted": report.deleted,
                "retained": report.retained,
                "failed": report.failed,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(report.failed == 0);
        }
    };

    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(reply.is_resolved())
}

fn scene_request(args: &SceneArgs, target: RenderTarget) -> RenderRequest {
    let mut request = RenderRequest::new(args.name.clone(), target);
    request.title = args.title.clone();
    request
}

fn scene_pipeline(
    config: PipelineConfig,
    args: &SceneArgs,
    outbox: Option<PathBuf>,
) -> Result<Pipeline<SpoolPrintService, DirectoryDistributor>> {
    let scene = SceneView::load(&args.scene)
        .with_context(|| format!("failed to load scene {}", args.scene.display()))?;
    let outbox = outbox.unwrap_or_else(|| config.scratch_dir.join("outbox"));
    let spool = SpoolPrintService::from_config(&config);
    let view: Arc<dyn ViewSurface> = Arc::new(scene);
    Ok(Pipeline::new(
        config,
        Some(view),
        Arc::new(spool),
        DirectoryDistributor::new(outbox),
    ))
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling request");
            cancel.cancel();
        }
    });
}

fn init_tracing(format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env_lossy();

    let fmt_layer = match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("failed to install tracing subscriber")
}
