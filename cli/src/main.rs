//! docvl CLI - batch document OCR with vision-language models

mod server;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

use docvl::inference::{
    ChatCompletionsBackend, ChatCompletionsConfig, InferenceBackend, ServiceBackend,
    ServiceClient, ServiceConfig,
};
use docvl::pipeline::{Checkpoint, ExtractOptions, ImageExtraction, ProgressObserver};
use docvl::report::Summary;
use docvl::{
    DocVl, DocumentLoader, DocumentSource, GroundTruth, InferenceGateway, PageRecord,
    PipelineOptions,
};

#[derive(Parser)]
#[command(name = "docvl")]
#[command(author = "iyulab")]
#[command(version)]
#[command(about = "Batch document OCR with vision-language models", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Transcribe a PDF or image and write text, JSON and CSV results
    Process {
        /// Input PDF or image file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output directory
        #[arg(short, long, value_name = "DIR", default_value = "docvl_results")]
        output_dir: PathBuf,

        /// Ground-truth text file, one line per page
        #[arg(long, value_name = "FILE")]
        ground_truth: Option<PathBuf>,

        /// First page to process (0-based)
        #[arg(long, default_value = "0")]
        start_page: u32,

        /// Number of pages to process (default: through the last page)
        #[arg(long)]
        num_pages: Option<u32>,

        /// Rendering resolution for PDF pages
        #[arg(long, default_value = "150")]
        dpi: u32,

        /// Maximum tokens to generate per page
        #[arg(long, default_value = "512")]
        max_tokens: u32,

        /// Longest-edge cap in pixels
        #[arg(long, default_value = "1200")]
        max_edge: u32,

        /// Release accelerator memory and report progress every N pages
        #[arg(long, default_value = "10")]
        release_every: u32,

        /// Stop processing new pages after this many seconds
        #[arg(long, value_name = "SECS")]
        deadline: Option<u64>,

        /// Directory containing the pdfium library
        #[arg(long, value_name = "DIR")]
        pdfium_dir: Option<PathBuf>,

        /// Password for encrypted PDFs
        #[arg(long)]
        password: Option<String>,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Transcribe a single image
    Extract {
        /// Input image file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Output file (stdout if not specified)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Maximum tokens to generate
        #[arg(long, default_value = "512")]
        max_tokens: u32,

        /// Longest-edge cap in pixels
        #[arg(long, default_value = "1200")]
        resize_max: u32,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Run the HTTP OCR service
    Serve {
        /// Address to listen on
        #[arg(long, env = "DOCVL_ADDR", default_value = "0.0.0.0:8000")]
        addr: String,

        #[command(flatten)]
        backend: BackendArgs,
    },

    /// Check whether a docvl service is healthy
    Health {
        /// Service URL
        #[arg(long, env = "DOCVL_SERVICE_URL", default_value = "http://localhost:8000")]
        url: String,
    },

    /// Show the model status of a docvl service
    Status {
        /// Service URL
        #[arg(long, env = "DOCVL_SERVICE_URL", default_value = "http://localhost:8000")]
        url: String,
    },

    /// Show document information
    Info {
        /// Input PDF or image file
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Rendering resolution used for the pixel size estimate
        #[arg(long, default_value = "150")]
        dpi: u32,

        /// Directory containing the pdfium library
        #[arg(long, value_name = "DIR")]
        pdfium_dir: Option<PathBuf>,
    },

    /// Show version information
    Version,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    /// A remote docvl service
    Service,
    /// An OpenAI-compatible chat completions endpoint
    Chat,
}

#[derive(Args)]
struct BackendArgs {
    /// Inference backend (default: service; chat for `serve`)
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// docvl service URL
    #[arg(long, env = "DOCVL_SERVICE_URL", default_value = "http://localhost:8000")]
    service_url: String,

    /// Chat completions base URL
    #[arg(long, env = "DOCVL_BACKEND_URL", default_value = "http://localhost:8000/v1")]
    backend_url: String,

    /// Model name served by the chat endpoint
    #[arg(long, env = "DOCVL_MODEL")]
    model: Option<String>,

    /// API key for the chat endpoint
    #[arg(long, env = "DOCVL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value = "120")]
    timeout: u64,
}

impl BackendArgs {
    fn build(&self, default: BackendKind) -> Box<dyn InferenceBackend> {
        let timeout = Duration::from_secs(self.timeout);
        match self.backend.unwrap_or(default) {
            BackendKind::Service => Box::new(ServiceBackend::new(
                ServiceConfig::new(&self.service_url).with_timeout(timeout),
            )),
            BackendKind::Chat => {
                let mut config =
                    ChatCompletionsConfig::new(&self.backend_url).with_timeout(timeout);
                if let Some(model) = &self.model {
                    config = config.with_model(model);
                }
                if let Some(key) = &self.api_key {
                    config = config.with_api_key(key);
                }
                Box::new(ChatCompletionsBackend::new(config))
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve { .. } => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match cli.command {
        Commands::Process {
            input,
            output_dir,
            ground_truth,
            start_page,
            num_pages,
            dpi,
            max_tokens,
            max_edge,
            release_every,
            deadline,
            pdfium_dir,
            password,
            backend,
        } => {
            let mut options = PipelineOptions::new()
                .with_dpi(dpi)
                .with_max_tokens(max_tokens)
                .with_max_edge(max_edge)
                .with_release_every(release_every)
                .with_pages(start_page, num_pages);
            if let Some(secs) = deadline {
                options = options.with_deadline(Duration::from_secs(secs));
            }

            let mut runner = DocVl::new().with_options(options);
            if let Some(dir) = pdfium_dir {
                runner = runner.with_pdfium_dir(dir);
            }
            if let Some(password) = password {
                runner = runner.with_password(password);
            }

            cmd_process(
                runner,
                &input,
                &output_dir,
                ground_truth.as_deref(),
                &backend,
            )
        }
        Commands::Extract {
            input,
            output,
            max_tokens,
            resize_max,
            json,
            backend,
        } => {
            let options = ExtractOptions::new()
                .with_max_tokens(max_tokens)
                .with_max_edge(resize_max);
            cmd_extract(&input, output.as_deref(), options, json, &backend)
        }
        Commands::Serve { addr, backend } => cmd_serve(&addr, &backend),
        Commands::Health { url } => cmd_health(&url),
        Commands::Status { url } => cmd_status(&url),
        Commands::Info {
            input,
            dpi,
            pdfium_dir,
        } => cmd_info(&input, dpi, pdfium_dir),
        Commands::Version => {
            cmd_version();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

/// Drives a progress bar from pipeline notifications.
struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                .progress_chars("#>-"),
        );
        Ok(Self { bar })
    }
}

impl ProgressObserver for BarObserver {
    fn run_started(&mut self, total: u32) {
        self.bar.set_length(u64::from(total));
        self.bar.set_message("Transcribing...");
    }

    fn page_finished(&mut self, record: &PageRecord) {
        match (record.latency_seconds(), record.failure_stage(), record.error()) {
            (Some(latency), _, _) => self.bar.set_message(format!(
                "page {} ({:.1}s)",
                record.page_number, latency
            )),
            (None, Some(stage), Some(error)) => self.bar.println(format!(
                "  {} page {} [{}]: {}",
                "✗".red(),
                record.page_number,
                stage,
                error
            )),
            _ => {}
        }
        self.bar.inc(1);
    }

    fn checkpoint(&mut self, checkpoint: &Checkpoint) {
        self.bar.println(format!(
            "  {} {}/{} pages, avg {:.2}s/page, ETA {:.1} min",
            "•".dimmed(),
            checkpoint.processed,
            checkpoint.total,
            checkpoint.mean_latency,
            checkpoint.eta.as_secs_f64() / 60.0
        ));
    }

    fn run_finished(&mut self, _records: &[PageRecord]) {
        self.bar.finish_with_message("Done!");
    }
}

fn open_gateway(
    backend: &BackendArgs,
    default: BackendKind,
) -> Result<InferenceGateway, Box<dyn std::error::Error>> {
    let mut gateway = InferenceGateway::new(backend.build(default));
    println!(
        "{} {}",
        "Connecting to backend".cyan(),
        gateway.backend_info().name
    );
    gateway.open()?;

    let info = gateway.backend_info();
    print!("{} {}", "Backend ready:".green(), info.name);
    if let Some(model) = &info.model {
        print!(" ({})", model);
    }
    if let Some(device) = &info.device {
        print!(" on {}", device);
    }
    println!();
    Ok(gateway)
}

fn cmd_process(
    runner: DocVl,
    input: &Path,
    output_dir: &Path,
    ground_truth: Option<&Path>,
    backend: &BackendArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let runner = match ground_truth {
        Some(path) => {
            let truth = GroundTruth::from_file(path)?;
            println!(
                "{} {} lines of ground truth",
                "Loaded".green(),
                truth.len()
            );
            runner.with_ground_truth(truth)
        }
        None => runner,
    };

    let mut gateway = open_gateway(backend, BackendKind::Service)?;

    let mut observer = BarObserver::new()?;
    let report = runner.process_with_observer(input, &mut gateway, &mut observer)?;
    gateway.close();

    let files = report.write_to_dir(output_dir)?;

    println!();
    print_summary(&report.summary);

    println!("\n{}", "Output files:".green().bold());
    println!("  {} {}", "├─".dimmed(), files.text.display());
    println!("  {} {}", "├─".dimmed(), files.json.display());
    println!("  {} {}", "└─".dimmed(), files.csv.display());

    Ok(())
}

fn print_summary(summary: &Summary) {
    println!("{}", "Summary".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());

    println!("{}: {}", "Pages".bold(), summary.total_pages);
    println!("{}: {}", "Successful".bold(), summary.succeeded.to_string().green());
    let failed = summary.failed.to_string();
    if summary.failed > 0 {
        println!("{}: {}", "Failed".bold(), failed.red());
    } else {
        println!("{}: {}", "Failed".bold(), failed);
    }

    match summary.mean_time {
        Some(mean) => {
            println!("{}: {:.2}s", "Total time".bold(), summary.total_time);
            println!("{}: {:.2}s", "Average per page".bold(), mean);
            println!("{}: {}", "Tokens".bold(), summary.total_tokens);
        }
        None => println!("{}: {}", "Timing".bold(), "no data".yellow()),
    }

    match &summary.quality {
        Some(quality) => {
            println!(
                "{}: mean {:.4} ({:.2}%), median {:.4}",
                "CER".bold(),
                quality.mean_cer,
                quality.mean_cer * 100.0,
                quality.median_cer
            );
            println!(
                "{}: mean {:.4} ({:.2}%), median {:.4}",
                "Accuracy".bold(),
                quality.mean_accuracy,
                quality.mean_accuracy * 100.0,
                quality.median_accuracy
            );
        }
        None => println!("{}: {}", "Quality".bold(), "no data".yellow()),
    }
}

fn cmd_extract(
    input: &Path,
    output: Option<&Path>,
    options: ExtractOptions,
    json: bool,
    backend: &BackendArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let document = docvl::document::ImageDocument::open(input)?;
    let image = document.render_page(0, docvl::document::DEFAULT_DPI)?;
    let mut gateway = open_gateway(backend, BackendKind::Service)?;
    let extraction = docvl::extract_image(&mut gateway, image, &options)?;
    gateway.close();

    let content = if json {
        serde_json::to_string_pretty(&extraction)?
    } else {
        extraction.result.extracted_text.clone()
    };

    if let Some(path) = output {
        fs::write(path, &content)?;
        println!("{} {}", "Saved to".green(), path.display());
        print_extraction_stats(&extraction);
    } else {
        println!("{}", content);
    }

    Ok(())
}

fn print_extraction_stats(extraction: &ImageExtraction) {
    println!(
        "{} {}x{} -> {}x{}, {} tokens in {:.2}s",
        "Image".dimmed(),
        extraction.original.width,
        extraction.original.height,
        extraction.processed.width,
        extraction.processed.height,
        extraction.result.token_count,
        extraction.result.latency_seconds
    );
}

fn cmd_serve(addr: &str, backend: &BackendArgs) -> Result<(), Box<dyn std::error::Error>> {
    let gateway = InferenceGateway::new(backend.build(BackendKind::Chat));
    let state = server::ApiState::new(gateway);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let loader = state.clone();
        tokio::spawn(async move {
            match loader.load().await {
                Ok(()) => log::info!("Model loaded; service is ready"),
                Err(e) => log::error!("Failed to load backend: {}", e),
            }
        });

        server::start_server(addr, state).await
    })?;

    Ok(())
}

fn service_client(url: &str) -> docvl::Result<ServiceClient> {
    ServiceClient::new(ServiceConfig::new(url).with_timeout(Duration::from_secs(10)))
}

fn cmd_health(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = service_client(url)?;
    let health = client.health()?;
    println!(
        "{} {} ({})",
        "Service is".green(),
        health.status.green().bold(),
        health.backend
    );
    Ok(())
}

fn cmd_status(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = service_client(url)?;
    let status = client.status()?;

    println!("{}", "Service Status".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());
    println!("{}: {}", "URL".bold(), client.url());
    println!(
        "{}: {}",
        "Model loaded".bold(),
        if status.model_loaded {
            "Yes".green()
        } else {
            "No".red()
        }
    );
    println!("{}: {}", "Backend".bold(), status.backend);
    if let Some(model) = &status.model {
        println!("{}: {}", "Model".bold(), model);
    }
    if let Some(device) = &status.device {
        println!("{}: {}", "Device".bold(), device);
    }
    Ok(())
}

fn cmd_info(
    input: &Path,
    dpi: u32,
    pdfium_dir: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let loader = match pdfium_dir {
        Some(dir) => DocumentLoader::new().with_library_dir(dir),
        None => DocumentLoader::new(),
    };
    let document = loader.open(input)?;

    println!("{}", "Document Information".cyan().bold());
    println!("{}", "─".repeat(40).dimmed());

    println!("{}: {}", "File".bold(), input.display());
    println!("{}: {}", "Format".bold(), document.format());
    println!("{}: {}", "Pages".bold(), document.page_count());

    if let docvl::Document::Pdf(pdf) = &document {
        if document.page_count() > 0 {
            let (width, height) = pdf.page_size(0)?;
            println!(
                "{}: {:.0}x{:.0} pt ({}x{} px at {} DPI)",
                "First page".bold(),
                width,
                height,
                docvl::document::points_to_pixels(width, dpi),
                docvl::document::points_to_pixels(height, dpi),
                dpi
            );
        }
    } else if let docvl::Document::Image(image) = &document {
        let raster = image.render_page(0, dpi.max(1))?;
        println!(
            "{}: {}x{} px",
            "Size".bold(),
            raster.width(),
            raster.height()
        );
    }

    Ok(())
}

fn cmd_version() {
    println!("{} {}", "docvl".cyan().bold(), env!("CARGO_PKG_VERSION"));
    println!("Batch document OCR with vision-language models");
    println!();
    println!("Repository: {}", "https://github.com/iyulab/docvl".dimmed());
    println!("License: MIT");
}
