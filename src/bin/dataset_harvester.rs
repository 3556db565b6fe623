use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use dataset_harvester::app::{App, ErrorLog, RunOptions, RunResult, read_dataset_list};
use dataset_harvester::config::{ConfigLoader, ConfigOverrides, ResolvedConfig};
use dataset_harvester::error::HarvestError;
use dataset_harvester::fetch::DhisHttpClient;
use dataset_harvester::output::{BarProgress, JsonOutput, OutputMode};
use dataset_harvester::remap::Remapper;
use dataset_harvester::store::Store;

#[derive(Parser)]
#[command(name = "dataset-harvester")]
#[command(about = "Download DHIS2 dataValueSets as CSV, remap sentinel option combos and split into parts")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reset the output root, then download and split every listed dataset")]
    Run(RunArgs),
    #[command(about = "Only reset the output root")]
    Reset(OutputArgs),
    #[command(about = "Remap and split an already downloaded CSV file (the file is consumed)")]
    Remap(RemapArgs),
}

#[derive(Args, Clone, Default)]
struct OutputArgs {
    #[arg(long)]
    output: Option<Utf8PathBuf>,
}

#[derive(Args, Clone, Default)]
struct RunArgs {
    #[arg(long)]
    datasets: Option<Utf8PathBuf>,

    #[command(flatten)]
    output: OutputArgs,

    #[arg(long, value_name = "BYTES")]
    threshold: Option<u64>,

    #[arg(long)]
    json_export: bool,
}

#[derive(Args, Clone)]
struct RemapArgs {
    file: PathBuf,

    #[command(flatten)]
    output: OutputArgs,

    #[arg(long, value_name = "BYTES")]
    threshold: Option<u64>,

    #[arg(long)]
    json_export: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_)
        | HarvestError::MissingCredentials
        | HarvestError::DatasetListRead(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run(RunArgs::default())) {
        Commands::Run(args) => {
            let config = config.with_overrides(ConfigOverrides {
                datasets_file: args.datasets,
                output_root: args.output.output,
                part_threshold: args.threshold,
                export_json: args.json_export,
            })?;
            let client = DhisHttpClient::new(&config)?;
            run_batch(&config, client, output_mode)
        }
        Commands::Reset(args) => {
            let config = config.with_overrides(ConfigOverrides {
                output_root: args.output,
                ..ConfigOverrides::default()
            })?;
            let report = Store::new(config.output_root.clone()).reset(&config.reset_keep)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_reset(&report).into_diagnostic(),
                OutputMode::Interactive => {
                    println!(
                        "reset {}: {} removed, {} kept, {} failed",
                        config.output_root,
                        report.removed.len(),
                        report.kept.len(),
                        report.failed.len()
                    );
                    Ok(())
                }
            }
        }
        Commands::Remap(args) => {
            let config = config.with_overrides(ConfigOverrides {
                output_root: args.output.output,
                part_threshold: args.threshold,
                export_json: args.json_export,
                ..ConfigOverrides::default()
            })?;
            let store = Store::new(config.output_root.clone());
            let remapper = Remapper::new(&store, &config.remap, config.part_threshold)
                .export_json(config.export_json);
            match output_mode {
                OutputMode::NonInteractive => {
                    let outcome = remapper.process_file(&args.file, &JsonOutput)?;
                    JsonOutput::print_remap(&outcome).into_diagnostic()
                }
                OutputMode::Interactive => {
                    let outcome = remapper.process_file(&args.file, &BarProgress::new())?;
                    println!(
                        "{} rows, {} remapped, {} parts",
                        outcome.rows,
                        outcome.remapped,
                        outcome.parts.len()
                    );
                    for part in &outcome.parts {
                        println!("  {part}");
                    }
                    Ok(())
                }
            }
        }
    }
}

fn run_batch(
    config: &ResolvedConfig,
    client: DhisHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let entries = read_dataset_list(&config.datasets_file)?;
    let app = App::new(
        Store::new(config.output_root.clone()),
        client,
        ErrorLog::new(config.error_log.clone()),
        RunOptions::from_config(config),
    );

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.run(&entries, &JsonOutput)?;
            JsonOutput::print_run(&result).into_diagnostic()
        }
        OutputMode::Interactive => {
            let progress = BarProgress::new();
            let result = app.run(&entries, &progress)?;
            print_run_summary(&result, config);
            Ok(())
        }
    }
}

fn print_run_summary(result: &RunResult, config: &ResolvedConfig) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}dataset-harvester summary{reset}");
    println!("{green}done: {}{reset}", result.succeeded());
    println!("{yellow}parts written: {}{reset}", result.parts_written());
    if result.failed() > 0 {
        println!(
            "{red}failed: {} (see {}){reset}",
            result.failed(),
            config.error_log
        );
    }

    for report in &result.datasets {
        let color = if report.state.is_failure() { red } else { green };
        println!("{color}  {} {}{reset}", report.id, report.state.as_str());
        if let Some(error) = &report.error {
            println!("{color}    {error}{reset}");
        }
    }
}
