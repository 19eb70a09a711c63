use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Instant;

use ppkdiff::delta::DeltaKind;
use ppkdiff::diff::{diff_packages, DiffMode, DiffRequest, DiffSummary};
use ppkdiff::pack::pack_bundle;
use ppkdiff::snapshot::PackageSpec;
use ppkdiff::util;

#[derive(Parser)]
#[command(name = "ppkdiff", about = "Incremental diff tool for app update packages")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DiffArgs {
    /// Path to the previous (origin) package
    origin: PathBuf,
    /// Path to the next (updated) package
    next: PathBuf,
    /// Output path for the patch package; `${time}` expands to the current timestamp
    #[arg(long, short, default_value = "diff-${time}.ppk-patch")]
    output: String,
    /// Delta algorithm for the bundle payload
    #[arg(long, value_enum, default_value = "bsdiff")]
    algo: DeltaKind,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff two update packages (.ppk)
    Diff(DiffArgs),
    /// Diff an installed Android package (.apk) against a new update package
    DiffApk(DiffArgs),
    /// Diff an installed HarmonyOS package (.app) against a new update package
    DiffApp(DiffArgs),
    /// Diff an installed iOS package (.ipa) against a new update package
    DiffIpa(DiffArgs),
    /// Zip a bundle output directory into an update package
    Pack {
        /// Bundle output directory
        dir: PathBuf,
        /// Output path for the package; `${time}` expands to the current timestamp
        #[arg(long, short, default_value = "output-${time}.ppk")]
        output: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Diff(args) => run_diff(args, PackageSpec::bundle(), DiffMode::BundleToBundle).await,
        Commands::DiffApk(args) => run_diff(args, PackageSpec::apk(), DiffMode::PackageToBundle).await,
        Commands::DiffApp(args) => {
            run_diff(args, PackageSpec::harmony_app(), DiffMode::PackageToBundle).await
        }
        Commands::DiffIpa(args) => run_diff(args, PackageSpec::ipa(), DiffMode::PackageToBundle).await,
        Commands::Pack { dir, output } => {
            let output = PathBuf::from(util::expand_output_path(&output));
            println!("Packing {} ...", dir.display());

            let printable = output.clone();
            let summary =
                tokio::task::spawn_blocking(move || pack_bundle(&dir, &output)).await??;

            println!("\n{} generated.", printable.display());
            println!("  Files: {}", summary.files);
            println!("  Directories: {}", summary.dirs);
            Ok(())
        }
    }
}

async fn run_diff(args: DiffArgs, old_spec: PackageSpec, mode: DiffMode) -> anyhow::Result<()> {
    let output = PathBuf::from(util::expand_output_path(&args.output));
    println!("Creating patch package...");
    println!("  Origin: {}", args.origin.display());
    println!("  Next: {}", args.next.display());
    println!("  Output: {}", output.display());

    let start = Instant::now();
    let printable = output.clone();
    let summary: DiffSummary = tokio::task::spawn_blocking(move || {
        diff_packages(&DiffRequest {
            old: &args.origin,
            new: &args.next,
            output: &output,
            algorithm: args.algo,
            old_spec,
            mode,
        })
    })
    .await??;
    let elapsed = start.elapsed();

    println!("\n{} generated.", printable.display());
    println!("  Payload delta: {} bytes", summary.delta_size);
    println!("  Files added: {}", summary.files_added);
    println!("  Directories added: {}", summary.dirs_added);
    println!("  Copies: {}", summary.copies);
    println!("  Deletes: {}", summary.deletes);
    println!("  Time elapsed: {:.3}s", elapsed.as_secs_f64());
    Ok(())
}
