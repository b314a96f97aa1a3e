use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{ArgAction, Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_ena::app::App;
use kira_ena::config::{ConfigLoader, ResolvedConfig, normalize_scheme};
use kira_ena::domain::{AccessionKind, FileType, parse_accessions};
use kira_ena::error::KiraError;
use kira_ena::metadata::{MetadataSource, TsvMetadata, write_metadata_tsv};
use kira_ena::output::JsonOutput;
use kira_ena::transfer::HttpTransferClient;

#[derive(Parser)]
#[command(name = "kira-ena")]
#[command(about = "Download and verify ENA run files; re-runs skip what is already verified")]
#[command(version, author)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Download the files listed in an ENA read_run report")]
    Fetch(FetchArgs),
    #[command(about = "Write the (filtered) metadata report to the output directory")]
    Metadata(SourceArgs),
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Tab-separated ENA portal read_run report
    #[arg(long)]
    metadata: PathBuf,

    /// File with one accession per line; restricts the report to these
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Kind of accessions listed in --input
    #[arg(short = 't', long = "type", value_enum, default_value_t = AccessionKind::Run)]
    accession_type: AccessionKind,

    #[arg(short, long)]
    output_dir: Option<String>,

    #[arg(long)]
    config: Option<String>,
}

#[derive(Args, Clone)]
struct FetchArgs {
    #[command(flatten)]
    source: SourceArgs,

    #[arg(long, value_enum)]
    file_type: Option<FileType>,

    /// Retries per file after the first attempt
    #[arg(short, long)]
    retries: Option<u32>,

    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Ignore the progress ledger and download everything again
    #[arg(long)]
    no_cache: bool,

    /// Put each study's files in its own folder
    #[arg(short = 'c', long)]
    create_study_folders: bool,

    #[arg(long)]
    scheme: Option<String>,

    #[arg(long)]
    log_full_path: bool,

    /// Also write metadata.tsv to the output directory
    #[arg(short = 'm', long)]
    write_metadata: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(kira) = report.downcast_ref::<KiraError>() {
                return ExitCode::from(map_exit_code(kira));
            }
            ExitCode::from(1)
        }
    }
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::NoSuccessfulDownloads { .. }
        | KiraError::Transfer(_)
        | KiraError::TransferStatus { .. } => 3,
        KiraError::ConfigRead(_)
        | KiraError::ConfigParse(_)
        | KiraError::InvalidConfig(_)
        | KiraError::MetadataRead(_)
        | KiraError::MissingField { .. }
        | KiraError::LedgerFormat { .. } => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<ExitCode> {
    let cli = Cli::parse();
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Fetch(args) => run_fetch(args),
        Commands::Metadata(args) => {
            let config = resolve_config(&args, None)?;
            let source = build_source(&args)?;
            let rows = source.metadata()?;
            fs::create_dir_all(config.output_dir.as_std_path()).into_diagnostic()?;
            write_metadata_tsv(&rows, config.output_dir.join("metadata.tsv").as_std_path())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_fetch(args: FetchArgs) -> miette::Result<ExitCode> {
    let config = resolve_config(&args.source, Some(&args))?;
    let source = build_source(&args.source)?;

    if args.write_metadata {
        let rows = source.metadata()?;
        fs::create_dir_all(config.output_dir.as_std_path()).into_diagnostic()?;
        write_metadata_tsv(&rows, config.output_dir.join("metadata.tsv").as_std_path())?;
    }

    let client = HttpTransferClient::new()?;
    let app = App::new(source, client, config);
    let report = app.fetch()?;
    JsonOutput::print_fetch(&report).into_diagnostic()?;

    if report.failed() > 0 {
        return Ok(ExitCode::from(3));
    }
    Ok(ExitCode::SUCCESS)
}

fn resolve_config(source: &SourceArgs, fetch: Option<&FetchArgs>) -> miette::Result<ResolvedConfig> {
    let mut config = ConfigLoader::resolve(source.config.as_deref())?;
    if let Some(dir) = &source.output_dir {
        config.output_dir = Utf8PathBuf::from(dir);
    }
    let Some(args) = fetch else {
        return Ok(config);
    };

    if let Some(file_type) = args.file_type {
        config.file_type = file_type;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if let Some(max_concurrent) = args.max_concurrent {
        if max_concurrent == 0 {
            return Err(KiraError::InvalidConfig("max_concurrent must be at least 1".to_string()).into());
        }
        config.max_concurrent = max_concurrent;
    }
    if let Some(scheme) = &args.scheme {
        config.scheme = normalize_scheme(scheme)?;
    }
    config.cache &= !args.no_cache;
    config.group_by_study |= args.create_study_folders;
    config.log_full_path |= args.log_full_path;
    Ok(config)
}

fn build_source(args: &SourceArgs) -> miette::Result<TsvMetadata> {
    let source = TsvMetadata::new(&args.metadata);
    let Some(input) = &args.input else {
        return Ok(source);
    };
    let content = fs::read_to_string(input)
        .map_err(|err| KiraError::Filesystem(format!("read {}: {err}", input.display())))?;
    let accessions = parse_accessions(content.lines(), args.accession_type);
    if accessions.is_empty() {
        return Err(miette::Report::msg(format!(
            "no valid {} accessions in {}",
            args.accession_type.as_str(),
            input.display()
        )));
    }
    Ok(source.with_accessions(args.accession_type, &accessions))
}
