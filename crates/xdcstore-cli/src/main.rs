use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::info;
use xdcstore_catalog::{DataLayout, Store};
use xdcstore_import::{import_manifest, install_frontend, ImportOptions};
use xdcstore_sync::StoreService;

mod config;
mod logging;
mod render;
mod transport;

use config::{parse_listen_addr, resolve_layout, version_string, DEFAULT_LISTEN};
use render::{
    current_output_style, format_catalog_lines, format_import_report, render_status_line,
    TerminalImportProgress,
};

#[derive(Parser, Debug)]
#[command(name = "xdcstore")]
#[command(about = "Catalog and distribution service for webxdc apps", long_about = None)]
struct Cli {
    /// Directory holding the catalog, artifacts and frontend bundle.
    #[arg(long, global = true, env = "XDCSTORE_DATA_DIR")]
    data_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve sessions until interrupted.
    Start {
        #[arg(long, env = "XDCSTORE_LISTEN", default_value = DEFAULT_LISTEN)]
        listen: String,
    },
    /// Ingest the apps listed in <SOURCE_DIR>/sources.lock.
    Import {
        source_dir: PathBuf,
        /// Drop apps the manifest no longer lists.
        #[arg(long)]
        prune: bool,
    },
    /// Install the store frontend bundle.
    Frontend {
        bundle: PathBuf,
        #[arg(long)]
        tag_name: String,
        #[arg(long)]
        name: Option<String>,
    },
    List,
    Version,
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_tracing();

    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!(
                "{}",
                render_status_line(current_output_style(), "error", &format!("{err:#}"))
            );
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<()> {
    let layout = resolve_layout(cli.data_dir);
    match cli.command {
        Commands::Start { listen } => run_start(layout, &listen),
        Commands::Import { source_dir, prune } => run_import(layout, &source_dir, prune),
        Commands::Frontend {
            bundle,
            tag_name,
            name,
        } => run_frontend(&layout, &bundle, &tag_name, name.as_deref()),
        Commands::List => run_list(layout),
        Commands::Version => {
            println!("{}", version_string());
            Ok(())
        }
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout();
            write_completions_script(shell, &mut stdout)
        }
    }
}

fn run_start(layout: DataLayout, listen: &str) -> Result<()> {
    let addr = parse_listen_addr(listen)?;
    let service = Arc::new(StoreService::open(layout, version_string())?);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed building async runtime")?;

    runtime.block_on(async move {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed binding {addr}"))?;
        info!(addr = %listener.local_addr()?, "listening");
        transport::serve(listener, service, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    })
}

fn run_import(layout: DataLayout, source_dir: &Path, prune: bool) -> Result<()> {
    let style = current_output_style();
    let store = Store::open(layout)?;
    let mut progress = TerminalImportProgress::new(style);
    let report = import_manifest(&store, source_dir, ImportOptions { prune }, &mut progress)
        .with_context(|| format!("import from {} failed", source_dir.display()))?;
    for line in format_import_report(&report, style) {
        println!("{line}");
    }
    Ok(())
}

fn run_frontend(
    layout: &DataLayout,
    bundle: &Path,
    tag_name: &str,
    name: Option<&str>,
) -> Result<()> {
    let manifest = install_frontend(layout, bundle, tag_name, name)?;
    println!(
        "{}",
        render_status_line(
            current_output_style(),
            "installed",
            &format!(
                "frontend {} {} (restart running services to serve it)",
                manifest.name, manifest.tag_name
            ),
        )
    );
    Ok(())
}

fn run_list(layout: DataLayout) -> Result<()> {
    let store = Store::open(layout)?;
    let snapshot = store.catalog().snapshot()?;
    for line in format_catalog_lines(&snapshot, current_output_style()) {
        println!("{line}");
    }
    Ok(())
}

fn write_completions_script<W: Write>(shell: Shell, writer: &mut W) -> Result<()> {
    let mut command = Cli::command();
    let mut generated = Vec::new();
    clap_complete::generate(shell, &mut command, "xdcstore", &mut generated);
    writer
        .write_all(&generated)
        .with_context(|| "failed writing generated completion script")
}
