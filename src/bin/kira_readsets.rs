use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kira_readsets::app::{App, FetchOptions, ProgressSink, TracingSink, read_genome_list};
use kira_readsets::config::{ConfigLoader, ResolvedConfig};
use kira_readsets::discovery::ExternalDiscovery;
use kira_readsets::domain::{TransportKind, UrlScheme};
use kira_readsets::error::KiraError;
use kira_readsets::manifest::run_manifest;
use kira_readsets::ngdc::NgdcSessionFactory;
use kira_readsets::output::{JsonOutput, OutputMode, print_batch_summary, print_manifest_summary};
use kira_readsets::store::Store;
use kira_readsets::transport::SystemTransport;

#[derive(Parser)]
#[command(name = "kira-readsets")]
#[command(about = "Per-species GSA readset acquisition and read-topology manifests")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Discover, filter, annotate and download readsets for a list of genomes")]
    Fetch(FetchArgs),
    #[command(about = "Write a read manifest for an existing directory tree")]
    Manifest(ManifestArgs),
}

#[derive(Args)]
struct FetchArgs {
    /// Text file with one scientific name per line.
    #[arg(short, long)]
    input: PathBuf,

    #[arg(short, long, alias = "download_dir")]
    download_dir: PathBuf,

    /// Worker count for metadata and download phases.
    #[arg(short, long)]
    threads: Option<usize>,

    #[arg(long)]
    no_headless: bool,

    /// Stop after RunInfo filtering and metadata.
    #[arg(long, alias = "dry_run")]
    dry_run: bool,

    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    discovery_command: Option<PathBuf>,

    #[arg(long, value_enum)]
    transport: Option<TransportKind>,

    #[arg(long)]
    allow_https: bool,

    #[arg(long)]
    verify_gzip: bool,
}

#[derive(Args)]
struct ManifestArgs {
    #[arg(long)]
    input: PathBuf,

    #[arg(long)]
    output: PathBuf,

    /// Directory levels between the input root and the sample directories.
    #[arg(long, default_value_t = 2)]
    depth: usize,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::InputList(_)
        | KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConcurrency(_)
        | KiraError::InvalidScheme(_) => 2,
        KiraError::DiscoverySetup(_) | KiraError::MissingTool(_) => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Fetch(args) => run_fetch(args, output_mode),
        Commands::Manifest(args) => run_manifest_command(args, output_mode),
    }
}

fn apply_overrides(config: &mut ResolvedConfig, args: &FetchArgs) -> Result<(), KiraError> {
    if let Some(threads) = args.threads {
        if threads == 0 {
            return Err(KiraError::InvalidConcurrency(threads));
        }
        config.concurrency = threads;
    }
    if args.no_headless {
        config.discovery.headless = false;
    }
    if let Some(command) = &args.discovery_command {
        config.discovery.command = Some(command.clone());
    }
    if let Some(kind) = args.transport {
        config.transfer.kind = kind;
    }
    if args.allow_https {
        config.allow_scheme(UrlScheme::Https);
    }
    if args.verify_gzip {
        config.verify_gzip = true;
    }
    Ok(())
}

fn run_fetch(args: FetchArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut config = ConfigLoader::resolve(args.config.as_deref())?;
    apply_overrides(&mut config, &args)?;

    let genomes = read_genome_list(&args.input)?;
    info!(genomes = genomes.len(), "genome list loaded");

    let store = Store::new(&args.download_dir)?;
    let discovery = ExternalDiscovery::acquire(&config.discovery)?;
    let transport = SystemTransport::from_settings(&config.transfer)?;
    info!(transport = transport.name(), "file transport selected");
    let metadata = NgdcSessionFactory::new(config.metadata.clone());

    let options = FetchOptions {
        dry_run: args.dry_run,
    };
    let app = App::new(store, metadata, transport, config);
    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Interactive => &TracingSink,
        OutputMode::NonInteractive => &JsonOutput,
    };
    let result = app.run_batch(discovery, &genomes, &options, sink)?;

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_batch(&result).into_diagnostic()?,
        OutputMode::Interactive => print_batch_summary(&result),
    }
    Ok(())
}

fn run_manifest_command(args: ManifestArgs, output_mode: OutputMode) -> miette::Result<()> {
    let result = run_manifest(&args.input, &args.output, args.depth)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_manifest(&result).into_diagnostic()?,
        OutputMode::Interactive => print_manifest_summary(&result),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn exit_codes() {
        assert_eq!(map_exit_code(&KiraError::InputList(PathBuf::from("x"))), 2);
        assert_eq!(map_exit_code(&KiraError::DiscoverySetup("x".to_string())), 3);
        assert_eq!(map_exit_code(&KiraError::Filesystem("x".to_string())), 1);
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::parse_from([
            "kira-readsets",
            "fetch",
            "-i",
            "genomes.txt",
            "--download_dir",
            "out",
            "-t",
            "3",
            "--no-headless",
            "--allow-https",
            "--transport",
            "http",
        ]);
        let Commands::Fetch(args) = cli.command else {
            panic!("expected fetch");
        };
        let mut config = ResolvedConfig::default();
        apply_overrides(&mut config, &args).unwrap();
        assert_eq!(config.concurrency, 3);
        assert!(!config.discovery.headless);
        assert!(config.allowed_schemes.contains(&UrlScheme::Https));
        assert_eq!(config.transfer.kind, TransportKind::Http);
    }
}
