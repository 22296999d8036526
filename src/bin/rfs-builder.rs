use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use rfs_builder::artifact::archive::ArchiveReader;
use rfs_builder::artifact::header::{ContainerHeader, HEADER_LEN};
use rfs_builder::artifact::symbols::SymbolTable;
use rfs_builder::artifact::ContainerKind;
use rfs_builder::config::{load_config, BuildConfig, RootfsSettings, SymbolsSettings};
use rfs_builder::preflight::check_required_tools;
use rfs_builder::process::SystemRunner;
use rfs_builder::stages::rootfs::pack_rootfs;
use rfs_builder::stages::symbols::export_symbols;
use rfs_builder::StageReport;

#[derive(Parser, Debug)]
#[command(name = "rfs-builder", version, about = "Pack root filesystem archives and kernel symbol tables")]
struct Cli {
    /// TOML file describing the [rootfs] and [symbols] jobs
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Pack a directory tree into a root filesystem archive
    Pack(PackArgs),
    /// Build the kernel symbol table from a debug binary
    Symbols(SymbolsArgs),
    /// Print the records of an archive or symbol table
    List(ListArgs),
    /// Run the symbols job, then the rootfs job, from --config
    All {
        /// Rebuild even if the manifests match
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args, Debug)]
struct PackArgs {
    /// Root of the tree to pack
    #[arg(long)]
    input: Option<PathBuf>,
    /// Archive to write
    #[arg(long)]
    output: Option<PathBuf>,
    /// Manifest path (default: <output>.cache)
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Rebuild even if the manifest matches
    #[arg(long)]
    force: bool,
}

#[derive(Args, Debug)]
struct SymbolsArgs {
    /// Debug binary to list
    #[arg(long)]
    input: Option<PathBuf>,
    /// Symbol table to write
    #[arg(long)]
    output: Option<PathBuf>,
    /// Manifest path (default: <output>.cache)
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Rebuild even if the manifest matches
    #[arg(long)]
    force: bool,
    /// Symbol listing tool
    #[arg(long)]
    nm: Option<String>,
    /// Filter the listing is piped through
    #[arg(long, conflicts_with = "no_demangle")]
    demangler: Option<String>,
    /// Keep mangled names
    #[arg(long)]
    no_demangle: bool,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// Archive or symbol table
    file: PathBuf,
    /// Print JSON instead of columns
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => BuildConfig::default(),
    };

    match cli.command {
        Commands::Pack(args) => run_pack(config, args),
        Commands::Symbols(args) => run_symbols(config, args),
        Commands::List(args) => run_list(&args),
        Commands::All { force } => {
            if cli.config.is_none() {
                bail!("`all` needs --config <file> with [rootfs] and [symbols] sections");
            }
            run_all(config, force)
        }
    }
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn run_pack(config: BuildConfig, args: PackArgs) -> Result<()> {
    let job = config
        .rootfs
        .overlay(RootfsSettings {
            input: args.input,
            output: args.output,
            manifest: args.manifest,
        })
        .into_job()?;

    let report = pack_rootfs(&job, args.force)
        .with_context(|| format!("packing '{}'", job.input.display()))?;
    print_report("pack", "file(s)", &report);
    Ok(())
}

fn run_symbols(config: BuildConfig, args: SymbolsArgs) -> Result<()> {
    let demangler = if args.no_demangle {
        Some(String::new())
    } else {
        args.demangler
    };
    let job = config
        .symbols
        .overlay(SymbolsSettings {
            input: args.input,
            output: args.output,
            manifest: args.manifest,
            nm: args.nm,
            demangler,
        })
        .into_job_outside(config.rootfs.input.as_deref())?;

    let report = export_symbols(&job, args.force, &SystemRunner, &check_required_tools)
        .with_context(|| format!("exporting symbols of '{}'", job.input.display()))?;
    print_report("symbols", "symbol(s)", &report);
    Ok(())
}

fn run_all(config: BuildConfig, force: bool) -> Result<()> {
    let rootfs = config.rootfs.into_job().context("resolving [rootfs] job")?;
    let symbols = config
        .symbols
        .into_job_outside(Some(rootfs.input.as_path()))
        .context("resolving [symbols] job")?;

    let report = export_symbols(&symbols, force, &SystemRunner, &check_required_tools)
        .with_context(|| format!("exporting symbols of '{}'", symbols.input.display()))?;
    print_report("symbols", "symbol(s)", &report);

    let report = pack_rootfs(&rootfs, force)
        .with_context(|| format!("packing '{}'", rootfs.input.display()))?;
    print_report("pack", "file(s)", &report);
    Ok(())
}

fn print_report(stage: &str, unit: &str, report: &StageReport) {
    match (report.records, report.bytes_written) {
        (Some(records), Some(bytes)) => println!(
            "[{}] wrote {} {} ({} bytes, {}) to {}",
            stage,
            records,
            unit,
            bytes,
            report.state,
            report.output.display()
        ),
        _ => println!(
            "[{}] {} input(s) unchanged, nothing to do for {}",
            stage,
            report.entries,
            report.output.display()
        ),
    }
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Listing {
    Archive { records: Vec<ArchiveRow> },
    SymbolTable { symbols: Vec<SymbolRow> },
}

#[derive(Serialize)]
struct ArchiveRow {
    path: String,
    offset: u64,
    length: u64,
}

#[derive(Serialize)]
struct SymbolRow {
    address: String,
    #[serde(rename = "type")]
    type_code: String,
    name: String,
}

fn run_list(args: &ListArgs) -> Result<()> {
    let bytes =
        fs::read(&args.file).with_context(|| format!("reading '{}'", args.file.display()))?;
    if bytes.len() < HEADER_LEN as usize {
        bail!("'{}' is too short to be a container", args.file.display());
    }
    let header = ContainerHeader::read_from(&bytes[..])?;

    let listing = match ContainerKind::detect(&header) {
        Some(ContainerKind::Archive) => {
            let records = ArchiveReader::new(&bytes[..])?.read_all()?;
            Listing::Archive {
                records: records
                    .into_iter()
                    .map(|r| ArchiveRow {
                        length: r.data.len() as u64,
                        path: r.path,
                        offset: r.offset,
                    })
                    .collect(),
            }
        }
        Some(ContainerKind::SymbolTable) => {
            let table = SymbolTable::decode(&bytes)?;
            Listing::SymbolTable {
                symbols: table
                    .records()
                    .iter()
                    .map(|r| SymbolRow {
                        address: format!("{:016x}", r.address),
                        type_code: char::from(r.type_code).to_string(),
                        name: r.name.clone(),
                    })
                    .collect(),
            }
        }
        None => bail!(
            "'{}' is not an archive or symbol table (magic {:#x})",
            args.file.display(),
            header.magic
        ),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    match listing {
        Listing::Archive { records } => {
            println!("[list] archive, {} record(s)", records.len());
            for r in records {
                println!("{:>12} {:>12}  {}", r.offset, r.length, r.path);
            }
        }
        Listing::SymbolTable { symbols } => {
            println!("[list] symbol table, {} symbol(s)", symbols.len());
            for s in symbols {
                println!("{} {} {}", s.address, s.type_code, s.name);
            }
        }
    }
    Ok(())
}
