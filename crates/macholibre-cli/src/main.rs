//! Command-line interface for macholibre.
//!
//! Creates universal binaries from thin Mach-O files and splits them again.

use clap::{CommandFactory, Parser, Subcommand};
use macholibre::fat::DirNamer;
use macholibre::{ArchitectureInfo, ExtractedSlice, Extractor, FatFile, Packager};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "macholibre")]
#[command(about = "Create and split universal (fat) Mach-O binaries")]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a universal binary from thin binaries
    Create {
        /// Output file
        #[arg(short, long)]
        output: PathBuf,

        /// Thin input binaries, in slice order
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Always use 64-bit fat_arch entries
        #[arg(long)]
        fat64: bool,
    },

    /// Extract every slice of a universal binary
    Extract {
        /// Universal binary
        input: PathBuf,

        /// Output directory (default: current directory)
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Only extract these architectures (e.g. x86_64, arm64e)
        #[arg(short, long = "arch")]
        arches: Vec<String>,
    },

    /// List the slices of a universal binary
    Info {
        /// Universal binary
        input: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) -> Result<(), Box<dyn std::error::Error>> {
    let level = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(format!("macholibre={level}").parse()?),
        )
        .init();
    Ok(())
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(cli.verbose)?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    match command {
        Command::Create {
            output,
            inputs,
            fat64,
        } => {
            let layout = Packager::default()
                .force_fat64(fat64)
                .package(&output, &inputs)?;
            println!(
                "Created: {} ({} slices)",
                output.display(),
                layout.entries().len()
            );
        }
        Command::Extract {
            input,
            output,
            arches,
        } => {
            let wanted = parse_arches(&arches)?;
            let slices = if wanted.is_empty() {
                Extractor::new()
                    .parallel(true)
                    .extract_to_dir(&input, &output)?
            } else {
                extract_selected(&input, &output, &wanted)?
            };
            for slice in slices {
                println!("{}: {}", slice.descriptor.arch, slice.path.display());
            }
        }
        Command::Info { input } => {
            let fat = FatFile::open(&input)?;
            println!("{}: {:?}", input.display(), fat.variant());
            for slice in fat.slices() {
                println!(
                    "  {:<10} offset {:#x} size {:#x} align 2^{}",
                    slice.arch.name(),
                    slice.offset,
                    slice.size,
                    slice.align
                );
            }
        }
    }

    Ok(())
}

fn parse_arches(names: &[String]) -> Result<Vec<ArchitectureInfo>, Box<dyn std::error::Error>> {
    names
        .iter()
        .map(|name| {
            ArchitectureInfo::from_name(name)
                .ok_or_else(|| format!("unknown architecture: {name}").into())
        })
        .collect()
}

/// Extract only the slices whose architecture was asked for.
fn extract_selected(
    input: &Path,
    dir: &Path,
    wanted: &[ArchitectureInfo],
) -> Result<Vec<ExtractedSlice>, Box<dyn std::error::Error>> {
    let fat = FatFile::open(input)?;
    let selected: Vec<_> = fat
        .slices()
        .iter()
        .filter(|slice| wanted.iter().any(|arch| arch.same_arch(&slice.arch)))
        .copied()
        .collect();
    if selected.is_empty() {
        return Err(format!(
            "{} contains none of the requested architectures",
            input.display()
        )
        .into());
    }

    std::fs::create_dir_all(dir)?;
    let stem = input
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "slice".to_string());
    let mut namer = DirNamer::new(dir, stem);
    Ok(Extractor::new()
        .parallel(true)
        .extract_file_slices(&fat, &selected, |arch| namer.name(arch))?)
}
