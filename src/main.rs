use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use sd_export::logtail::LogFileTail;
use sd_export::naming::{NamingOptions, build_filename, prompt_dir_name, suffix_token};
use sd_export::paths::resolve_available_path;
use sd_export::pipeline::sink::ChannelSink;
use sd_export::pipeline::{ExportPipeline, spawn_export_loop};
use sd_export::session::{Backend, GenerationSession, Liveness, SessionRuntime};
use sd_export::{config, logging, metadata, output};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sd-export")]
#[command(about = "Export Stable Diffusion images under names built from their metadata")]
#[command(long_about = "\
Export Stable Diffusion images under names built from their metadata

Watches the directory a generation backend writes into, waits until each
new image is fully written, reads the generation metadata embedded in it
and moves it into the output directory under a descriptive name:

  outputs/000001.3357757885.png
    → exported/20240131-142501-1-a_lighthouse-3357757885-scale7.50-k_lms.png

Recognised metadata:
  sd-metadata   InvokeAI 2.x JSON
  Dream         InvokeAI dream string (old CLI flags)
  parameters    Automatic1111 key/value block
  Nmkdiffusers  NMKD flat JSON

Names never exceed 255 bytes of path. Optional parts (seed, scale, sampler,
prompt, model) are dropped in reverse priority when space runs out.

Run 'sd-export gen-config' to generate a documented config.toml.")]
#[command(version)]
struct Cli {
    /// Directory containing config.toml
    #[arg(long, default_value = ".", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Export images from a watched directory until generation ends
    Watch(WatchArgs),
    /// Print the generation metadata embedded in images
    Inspect {
        /// PNG files to read
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Show the name an image would be exported under, without moving it
    Name {
        file: PathBuf,
        /// Output directory
        #[arg(long)]
        out: PathBuf,
        /// Running image index
        #[arg(long, default_value_t = 1)]
        index: usize,
        /// Number of images in the batch (sets the index padding)
        #[arg(long, default_value_t = 1)]
        target: usize,
    },
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(clap::Args)]
struct WatchArgs {
    /// Directory the backend writes images into
    dir: PathBuf,
    /// Output directory
    #[arg(long)]
    out: PathBuf,
    /// Number of images the run will produce
    #[arg(long, default_value_t = 1)]
    target: usize,
    #[arg(long, value_enum, default_value_t = BackendArg::InvokeAi)]
    backend: BackendArg,
    /// File that exists while the backend is running
    #[arg(long)]
    sentinel: Option<PathBuf>,
    /// Backend log file, for matching saved file names
    #[arg(long)]
    log_file: Option<PathBuf>,
    /// Inpainting mask to composite over each image
    #[arg(long)]
    mask: Option<PathBuf>,
    /// Model name for filenames (default: from metadata)
    #[arg(long)]
    model: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendArg {
    InvokeAi,
    Nmkd,
    Comfy,
}

impl From<BackendArg> for Backend {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::InvokeAi => Backend::InvokeAi,
            BackendArg::Nmkd => Backend::NmkdDiffusers,
            BackendArg::Comfy => Backend::Comfy,
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let export_config = config::load_config(&cli.config)?;
    logging::init_logging(&export_config.logging)?;
    init_thread_pool(&export_config.processing);

    match cli.command {
        Command::Watch(args) => watch(&export_config, args)?,
        Command::Inspect { files, json } => {
            let mut results = Vec::with_capacity(files.len());
            for file in files {
                let outcome = metadata::read_metadata(&file)?;
                results.push((file, outcome));
            }
            if json {
                let values: Vec<serde_json::Value> = results
                    .iter()
                    .map(|(path, outcome)| output::format_inspect_json(path, outcome))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&values)?);
            } else {
                output::print_inspect(&results);
            }
        }
        Command::Name {
            file,
            out,
            index,
            target,
        } => {
            let destination = dry_run_name(&export_config, &file, &out, index, target)?;
            println!("{}", output::format_name(&file, &destination));
        }
        Command::GenConfig => {}
    }

    Ok(())
}

fn watch(export_config: &config::ExportConfig, args: WatchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut session = GenerationSession::new(&args.dir, &args.out, args.target);
    session.naming = export_config.naming_options(args.model.as_deref());
    session.subfolders_per_prompt = export_config.output.subfolders_per_prompt;
    if export_config.output.session_subfolder {
        session.session_subdir_name = Some(GenerationSession::subdir_name_for(session.start_time));
    }
    session.backend = args.backend.into();
    session.liveness = match args.sentinel {
        Some(path) => Liveness::SentinelFile(path),
        None => Liveness::ImageCount,
    };
    session.mask_path = args.mask;

    let runtime = Arc::new(SessionRuntime::new());
    let (tx, rx) = std::sync::mpsc::channel();
    let mut pipeline = ExportPipeline::new(
        Arc::new(session),
        runtime.clone(),
        export_config.pipeline.settings(),
    )?
    .with_sink(Arc::new(ChannelSink::new(tx)));
    if let Some(log_file) = args.log_file {
        pipeline = pipeline.with_log_tail(Arc::new(LogFileTail::new(log_file)));
    }

    let printer = std::thread::spawn(move || {
        let mut shown: Vec<PathBuf> = Vec::new();
        for published in rx {
            for line in output::format_exported(&published, &shown) {
                println!("{}", line);
            }
            for path in published {
                if !shown.contains(&path) {
                    shown.push(path);
                }
            }
        }
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let summary = rt.block_on(async {
        let cancel = runtime.cancel().clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Received Ctrl+C, stopping export");
                cancel.cancel("interrupted");
            }
        });
        spawn_export_loop(pipeline).await
    })?;

    printer
        .join()
        .map_err(|_| "output printer thread panicked")?;
    println!();
    println!("{}", output::format_summary(&summary));
    Ok(())
}

fn dry_run_name(
    export_config: &config::ExportConfig,
    file: &Path,
    out: &Path,
    index: usize,
    target: usize,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let record = metadata::read_metadata(file)?.into_record();
    let now = Local::now();
    let mut naming = export_config.naming_options(None);

    let dir = if export_config.output.subfolders_per_prompt {
        naming = NamingOptions {
            include_prompt: false,
            ..naming
        };
        out.join(prompt_dir_name(
            &record.prompt,
            naming.strip_wildcards,
            out.as_os_str().len(),
            now,
        ))
    } else {
        out.to_path_buf()
    };

    let extension = file
        .extension()
        .map(|e| e.to_string_lossy().to_string())
        .unwrap_or_else(|| "png".to_string());
    let filename = build_filename(
        &record,
        &naming,
        dir.as_os_str().len(),
        &suffix_token(index, target),
        &extension,
        now,
    );
    Ok(resolve_available_path(&dir.join(filename)))
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores; config can constrain down, not up.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
