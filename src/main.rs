use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use vidtrack::annotate::Annotator;
use vidtrack::config::{AppConfig, DetectorConfig, DetectorUse, FaqConfig};
use vidtrack::evaluate::{evaluate_detector, load_manifest};
use vidtrack::faq::{Embedder, FaqMatcher, HashingEmbedder, load_faq};
use vidtrack::integration::{DynDetector, TrackerPipeline};
use vidtrack::server::{AppState, VideoIo, create_router, serve};
use vidtrack::translate::Translator;
use vidtrack::video::check_extension;

#[derive(Parser, Debug)]
#[command(author, version, about = "Video object detection and tracking service")]
struct Cli {
    /// TOML configuration file; every setting has a default.
    #[arg(long, short, global = true, env = "VIDTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// YOLOv8 ONNX model, overrides `[detector] model`.
    #[arg(long, global = true)]
    model: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP API.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        /// FAQ JSON file enabling `/chat`.
        #[arg(long)]
        faq: Option<PathBuf>,
        /// Azure Translator key enabling `/api/translate`.
        #[arg(long, env = "TRANSLATOR_KEY", hide_env_values = true)]
        translator_key: Option<String>,
        #[arg(long, env = "TRANSLATOR_ENDPOINT")]
        translator_endpoint: Option<String>,
        #[arg(long, env = "TRANSLATOR_REGION")]
        translator_region: Option<String>,
    },
    /// Track objects in a video and print the sampled JSON report.
    Analyze {
        video: PathBuf,
        /// Write the report here instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Write a copy of a video with confirmed tracks drawn on every frame.
    Annotate { video: PathBuf, output: PathBuf },
    /// Answer one question from the FAQ.
    Ask {
        message: String,
        #[arg(long)]
        faq: Option<PathBuf>,
    },
    /// Score the detector on a labelled image manifest.
    Evaluate { manifest: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = AppConfig::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(model) = cli.model {
        config.detector.model = Some(model);
    }

    match cli.command {
        Command::Serve {
            host,
            port,
            faq,
            translator_key,
            translator_endpoint,
            translator_region,
        } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(faq) = faq {
                config.faq.path = Some(faq);
            }
            if translator_key.is_some() {
                config.translator.key = translator_key;
            }
            if let Some(endpoint) = translator_endpoint {
                config.translator.endpoint = endpoint;
            }
            if translator_region.is_some() {
                config.translator.region = translator_region;
            }
            run_server(config).await
        }
        Command::Analyze { video, output } => analyze(&config, &video, output.as_deref()),
        Command::Annotate { video, output } => annotate(&config, &video, &output),
        Command::Ask { message, faq } => {
            if let Some(faq) = faq {
                config.faq.path = Some(faq);
            }
            let matcher = load_matcher(&config)?.context("no FAQ file configured")?;
            println!("{}", matcher.reply(&message)?);
            Ok(())
        }
        Command::Evaluate { manifest } => {
            let samples = load_manifest(&manifest)?;
            let mut detector = load_detector(&config.detector, DetectorUse::Evaluation)?;
            let metrics = evaluate_detector(&mut detector, &samples)?;
            println!("{}", serde_json::to_string_pretty(&metrics)?);
            Ok(())
        }
    }
}

/// Start the API with whatever backends are available; the routes of a
/// missing one answer 503.
async fn run_server(config: AppConfig) -> Result<()> {
    let addr = config.server.socket_addr()?;
    let mut state = AppState::new(config.tracker.clone())
        .with_annotator(load_annotator(&config)?)
        .with_upload_limit(config.server.max_upload_mb * 1024 * 1024);
    match load_detector(&config.detector, DetectorUse::Service) {
        Ok(detector) => state = state.with_detector(detector),
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "no detector, video endpoints are disabled"),
    }
    match video_io(&config) {
        Ok(io) => state.video = Some(Arc::from(io)),
        Err(e) => tracing::warn!(error = %e, "video endpoints are disabled"),
    }
    match load_matcher(&config)? {
        Some(matcher) => state = state.with_faq(matcher),
        None => tracing::warn!("no FAQ file configured, /chat is disabled"),
    }
    match Translator::from_config(&config.translator)? {
        Some(translator) => state = state.with_translator(translator),
        None => tracing::warn!("no translator key configured, /api/translate is disabled"),
    }

    serve(addr, create_router(state))
        .await
        .with_context(|| format!("server on {addr} failed"))
}

fn analyze(config: &AppConfig, video: &Path, output: Option<&Path>) -> Result<()> {
    check_extension(&video.display().to_string())?;
    let mut source = video_io(config)?.open(video)?;
    let detector = load_detector(&config.detector, DetectorUse::Service)?;
    let mut pipeline = TrackerPipeline::new(detector, config.tracker.clone())?;
    let analysis = pipeline.analyze(source.as_mut())?;

    let json = serde_json::to_string_pretty(&analysis)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}

fn annotate(config: &AppConfig, video: &Path, output: &Path) -> Result<()> {
    check_extension(&video.display().to_string())?;
    let io = video_io(config)?;
    let mut source = io.open(video)?;
    let mut sink = io.create(output, &source.info())?;
    let detector = load_detector(&config.detector, DetectorUse::Service)?;
    let mut pipeline = TrackerPipeline::new(detector, config.tracker.clone())?;
    let frames = pipeline.annotate(source.as_mut(), sink.as_mut(), &load_annotator(config)?)?;
    tracing::info!(frames, output = %output.display(), "done");
    Ok(())
}

fn load_annotator(config: &AppConfig) -> Result<Annotator> {
    Ok(match &config.annotate.font {
        Some(font) => Annotator::with_font_file(font)?,
        None => {
            tracing::warn!("no label font configured, drawing boxes only");
            Annotator::default()
        }
    })
}

fn load_matcher(config: &AppConfig) -> Result<Option<FaqMatcher>> {
    let Some(path) = &config.faq.path else {
        return Ok(None);
    };
    let entries = load_faq(path)?;
    let embedder = load_embedder(&config.faq)?;
    let matcher = FaqMatcher::new(entries, embedder)?.with_threshold(config.faq.threshold);
    tracing::info!(path = %path.display(), entries = matcher.len(), "FAQ loaded");
    Ok(Some(matcher))
}

fn load_embedder(config: &FaqConfig) -> Result<Arc<dyn Embedder>> {
    match (&config.model, &config.tokenizer) {
        (Some(model), Some(tokenizer)) => load_sentence_model(model, tokenizer),
        _ => Ok(Arc::new(HashingEmbedder::new(config.dimension)?)),
    }
}

#[cfg(feature = "onnx")]
fn load_sentence_model(model: &Path, tokenizer: &Path) -> Result<Arc<dyn Embedder>> {
    let embedder = vidtrack::faq::SentenceEmbedder::load(model, tokenizer)
        .with_context(|| format!("cannot load sentence model {}", model.display()))?;
    Ok(Arc::new(embedder))
}

#[cfg(not(feature = "onnx"))]
fn load_sentence_model(_model: &Path, _tokenizer: &Path) -> Result<Arc<dyn Embedder>> {
    anyhow::bail!("`[faq] model` needs a build with `--features onnx`")
}

#[cfg(feature = "ffmpeg")]
fn video_io(config: &AppConfig) -> Result<Box<dyn VideoIo>> {
    Ok(Box::new(vidtrack::server::FfmpegIo(config.video.clone())))
}

#[cfg(not(feature = "ffmpeg"))]
fn video_io(_config: &AppConfig) -> Result<Box<dyn VideoIo>> {
    anyhow::bail!("built without video support, rebuild with `--features ffmpeg`")
}

#[cfg(feature = "onnx")]
fn load_detector(config: &DetectorConfig, usage: DetectorUse) -> Result<DynDetector> {
    use vidtrack::integration::{ConfidenceFilter, YoloDetector, YoloOptions, boxed};

    let model = config
        .model
        .as_deref()
        .context("no detector model configured, set `[detector] model` or pass --model")?;
    let thresholds = config.thresholds(usage);
    let options = YoloOptions {
        input_size: config.input_size,
        conf_threshold: thresholds.decode,
        iou_threshold: config.iou_threshold,
    };
    let yolo = YoloDetector::load(model, options)
        .with_context(|| format!("cannot load model {}", model.display()))?;
    Ok(match thresholds.filter {
        Some(threshold) => boxed(ConfidenceFilter::with_threshold(yolo, threshold)),
        None => boxed(yolo),
    })
}

#[cfg(not(feature = "onnx"))]
fn load_detector(_config: &DetectorConfig, _usage: DetectorUse) -> Result<DynDetector> {
    anyhow::bail!("built without a detector backend, rebuild with `--features onnx`")
}
