//! Jetbook CLI tool
//!
//! A command-line tool for generating QR-marked notebooks from PDF templates.

use std::io::IsTerminal as _;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use glob::{glob, Pattern};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jetbook::marker::{
    LocalQrProvider, MarkerImageProvider, QrServerProvider, DEFAULT_SERVICE_URL,
};
use jetbook::pdf::extract_metadata;
use jetbook::{preview_payloads, AssemblyOptions, BookAssembler, TemplateSource};

/// Jetbook - Generate notebooks whose pages carry unique QR codes
#[derive(Parser)]
#[command(name = "jetbook")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Generate a 36 page notebook from templates/dot-grid.pdf
    jetbook generate --template dot-grid --pages 36

    # Render QR codes locally instead of calling the QR service
    jetbook generate -t lined -n 48 --backend local -o lined.pdf --open

    # Show the payload every page would carry
    jetbook preview -t lined -n 5

    # List available templates
    jetbook list")]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only report errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Directory holding `<name>.pdf` templates and their `<name>.toml` configurations
    #[arg(long, global = true, default_value = "templates")]
    templates_dir: PathBuf,
}

#[derive(Args)]
struct TemplateArgs {
    /// Template name (without extension)
    #[arg(short, long)]
    template: String,

    /// Number of pages to generate
    #[arg(short = 'n', long)]
    pages: u32,
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    /// Fetch QR images from an HTTP service
    Remote,
    /// Render QR images in-process
    Local,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a notebook from a template
    Generate {
        #[command(flatten)]
        target: TemplateArgs,

        /// Output PDF file path [default: results/<template>-result.pdf]
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Where QR images come from
        #[arg(long, value_enum, default_value = "remote")]
        backend: Backend,

        /// QR service endpoint used by the remote backend
        #[arg(long, default_value = DEFAULT_SERVICE_URL)]
        service_url: String,

        /// Network timeout per QR request, in seconds
        #[arg(long, default_value_t = 10)]
        timeout: u64,

        /// QR images fetched concurrently
        #[arg(short, long, default_value_t = 1)]
        jobs: usize,

        /// Open the output file after creation
        #[arg(long)]
        open: bool,
    },

    /// Print the QR payload of every page without building a document
    Preview {
        #[command(flatten)]
        target: TemplateArgs,
    },

    /// Show information about a template
    Info {
        /// Template name (without extension)
        template: String,
    },

    /// List templates available in the templates directory
    List,
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_logging(&cli.global) {
        eprintln!("Warning: {:#}", e);
    }

    let global = &cli.global;
    let result = match cli.command {
        Commands::Generate {
            target,
            output,
            backend,
            service_url,
            timeout,
            jobs,
            open,
        } => cmd_generate(
            global,
            target,
            output,
            backend,
            service_url,
            Duration::from_secs(timeout),
            jobs,
            open,
        ),
        Commands::Preview { target } => cmd_preview(global, target),
        Commands::Info { template } => cmd_info(global, &template),
        Commands::List => cmd_list(global),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Install the stderr subscriber; `RUST_LOG` overrides the flags
fn init_logging(args: &GlobalArgs) -> anyhow::Result<()> {
    let level = derive_level(args);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("jetbook={level}")));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))
}

fn derive_level(args: &GlobalArgs) -> &'static str {
    if args.quiet {
        return "error";
    }
    match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Open a file with the system default application
fn open_file(path: &Path) -> anyhow::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(path).spawn()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(path).spawn()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", "", &path.display().to_string()])
            .spawn()?;
    }
    Ok(())
}

fn default_output(template: &str) -> PathBuf {
    PathBuf::from("results").join(format!("{}-result.pdf", template))
}

/// Build a notebook
#[allow(clippy::too_many_arguments)]
fn cmd_generate(
    global: &GlobalArgs,
    target: TemplateArgs,
    output: Option<PathBuf>,
    backend: Backend,
    service_url: String,
    timeout: Duration,
    jobs: usize,
    open: bool,
) -> anyhow::Result<()> {
    if jobs == 0 {
        bail!("--jobs must be at least 1");
    }

    let source = TemplateSource::new(&global.templates_dir, &target.template);
    let config = source
        .load_config()
        .with_context(|| format!("cannot use template `{}`", target.template))?;
    let output = output.unwrap_or_else(|| default_output(&target.template));

    let provider: Box<dyn MarkerImageProvider> = match backend {
        Backend::Remote => Box::new(QrServerProvider::new(
            service_url,
            timeout,
            config.error_correction,
        )),
        Backend::Local => Box::new(LocalQrProvider::new(config.error_correction)),
    };

    let options = AssemblyOptions {
        jobs,
        ..AssemblyOptions::default()
    };
    let mut assembler = BookAssembler::new(config, provider)?.with_options(options);

    if !global.quiet {
        eprintln!(
            "Generating {} pages from {}...",
            target.pages,
            source.pdf_path().display()
        );
    }

    let report = assembler
        .assemble(&source.pdf_path(), target.pages, &output)
        .with_context(|| format!("failed to generate {}", output.display()))?;

    if !global.quiet {
        eprintln!("Output: {}", report.output.display());
    }

    if open {
        open_file(&report.output)?;
    }

    Ok(())
}

/// Print page payloads
fn cmd_preview(global: &GlobalArgs, target: TemplateArgs) -> anyhow::Result<()> {
    let source = TemplateSource::new(&global.templates_dir, &target.template);
    let config = source
        .load_config()
        .with_context(|| format!("cannot use template `{}`", target.template))?;

    for (index, payload) in preview_payloads(&config, target.pages)?.iter().enumerate() {
        println!("{:>4}  {}", index + 1, payload);
    }

    Ok(())
}

/// Show a template's PDF metadata and configuration
fn cmd_info(global: &GlobalArgs, template: &str) -> anyhow::Result<()> {
    let source = TemplateSource::new(&global.templates_dir, template);
    let pdf_path = source.pdf_path();
    let metadata = extract_metadata(&pdf_path)
        .with_context(|| format!("cannot read {}", pdf_path.display()))?;

    println!("File: {}", pdf_path.display());
    println!("Pages: {}", metadata.page_count);
    println!(
        "Page size: {:.1} x {:.1} pt",
        metadata.page_box.width().pt(),
        metadata.page_box.height().pt()
    );
    if let Some(title) = metadata.title {
        println!("Title: {}", title);
    }
    if let Some(author) = metadata.author {
        println!("Author: {}", author);
    }

    match source.load_config() {
        Ok(config) => {
            println!("Config: {}", source.config_path().display());
            println!(
                "  QR code: {} pt at ({}, {}), error correction {}",
                config.marker_size, config.marker_x, config.marker_y, config.error_correction
            );
            println!("  Page format: {}", config.page_format);
            println!("  Text template: {}", config.text_template);
            match config.max_page_count {
                Some(max) => println!("  Max pages: {}", max),
                None => println!("  Max pages: unlimited"),
            }
        }
        Err(e) => println!("Config: {}", e),
    }

    Ok(())
}

/// List templates that have both a PDF and a configuration
fn cmd_list(global: &GlobalArgs) -> anyhow::Result<()> {
    let templates = find_templates(&global.templates_dir)?;

    if templates.is_empty() {
        if !global.quiet {
            eprintln!("No templates found in {}", global.templates_dir.display());
        }
        return Ok(());
    }

    for name in templates {
        println!("{}", name);
    }

    Ok(())
}

/// Names of `<name>.pdf` files in `dir` that have a matching `<name>.toml`
fn find_templates(dir: &Path) -> anyhow::Result<Vec<String>> {
    let dir_str = dir
        .to_str()
        .with_context(|| format!("templates directory {} is not valid UTF-8", dir.display()))?;
    let pattern = format!("{}/*.pdf", Pattern::escape(dir_str));

    let mut names = Vec::new();
    for entry in glob(&pattern)? {
        match entry {
            Ok(path) => {
                if !path.with_extension("toml").is_file() {
                    tracing::debug!(path = %path.display(), "skipping PDF without configuration");
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
            Err(e) => tracing::warn!("glob error in {}: {}", dir.display(), e),
        }
    }

    names.sort();
    Ok(names)
}
