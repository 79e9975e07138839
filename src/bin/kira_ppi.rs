use std::fs;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_ppi::app::{App, BuildOutcome, NetworkRequest, ProgressSink};
use kira_ppi::builder::NetworkBuilder;
use kira_ppi::config::{ConfigLoader, ResolvedConfig};
use kira_ppi::domain::{IdFormat, NetworkType, Species};
use kira_ppi::error::{ErrorKind, KiraError};
use kira_ppi::expression::{ExpressionTable, load_expression_table};
use kira_ppi::memo::MemoryCache;
use kira_ppi::output::{ConsoleProgress, DeleteResult, JsonOutput, OutputMode};
use kira_ppi::resolver::{CachedIdentifier, IdentifierResolver, ResolutionReport};
use kira_ppi::store::{
    DEFAULT_PAGE_LIMIT, NetworkFilter, NetworkPage, NetworkStore, PageRequest, StoredNetwork,
};
use kira_ppi::stringdb::StringHttpClient;

type HttpApp = App<StringHttpClient, StringHttpClient, MemoryCache<CachedIdentifier>>;

#[derive(Parser)]
#[command(name = "kira-ppi")]
#[command(about = "Build and cache protein-interaction networks for gene sets")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    /// Path to a kira-ppi.json config file.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Overrides the network database location.
    #[arg(long, global = true)]
    database: Option<Utf8PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Build, inspect and delete stored networks")]
    Network(NetworkArgs),
    #[command(about = "Map gene identifiers to STRING ids without building")]
    Resolve(ResolveArgs),
}

#[derive(Args)]
struct NetworkArgs {
    #[command(subcommand)]
    command: NetworkCommand,
}

#[derive(Subcommand)]
enum NetworkCommand {
    #[command(about = "Build a network, or return the stored one for the same gene set")]
    Build(BuildArgs),
    #[command(about = "Show one stored network")]
    Show(ShowArgs),
    #[command(about = "List stored networks, newest first")]
    List(ListArgs),
    #[command(about = "Delete a stored network with its nodes and edges")]
    Delete(DeleteArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// Comparison the gene set came from, e.g. treated-vs-control.
    #[arg(long)]
    label: String,

    /// Genes, comma-separated or repeated.
    #[arg(long, value_delimiter = ',')]
    genes: Vec<String>,

    /// File with one gene per line.
    #[arg(long)]
    genes_file: Option<Utf8PathBuf>,

    #[arg(long, default_value_t = 400)]
    threshold: u32,

    #[arg(long, value_enum, default_value_t = NetworkType::Full)]
    network_type: NetworkType,

    #[arg(long, value_enum)]
    id_format: Option<IdFormat>,

    #[arg(long)]
    species: Option<Species>,

    /// Differential-expression table (.csv, .tsv or .json) to annotate nodes.
    #[arg(long)]
    expression: Option<Utf8PathBuf>,
}

#[derive(Args)]
struct ShowArgs {
    id: i64,

    /// Skip nodes and edges.
    #[arg(long)]
    summary: bool,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long)]
    label: Option<String>,

    #[arg(long, value_enum)]
    network_type: Option<NetworkType>,

    /// Only successful networks.
    #[arg(long, conflicts_with = "failed")]
    successful: bool,

    /// Only failed attempts.
    #[arg(long)]
    failed: bool,

    #[arg(long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: usize,

    #[arg(long, default_value_t = 0)]
    offset: usize,
}

#[derive(Args)]
struct DeleteArgs {
    id: i64,
}

#[derive(Args)]
struct ResolveArgs {
    #[arg(required = true, value_delimiter = ',')]
    genes: Vec<String>,

    #[arg(long, value_enum)]
    id_format: Option<IdFormat>,

    #[arg(long)]
    species: Option<Species>,
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
    match error.kind() {
        ErrorKind::Validation | ErrorKind::Config => 2,
        ErrorKind::Resolution | ErrorKind::Build => 3,
        ErrorKind::Persistence => 4,
        ErrorKind::NotFound => 5,
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
    let app = build_app(&config, cli.database)?;

    match cli.command {
        Commands::Network(args) => match args.command {
            NetworkCommand::Build(args) => run_build(args, &app, &config, output_mode),
            NetworkCommand::Show(args) => run_show(args, &app, output_mode),
            NetworkCommand::List(args) => run_list(args, &app, output_mode),
            NetworkCommand::Delete(args) => run_delete(args, &app, output_mode),
        },
        Commands::Resolve(args) => run_resolve(args, &app, &config, output_mode),
    }
}

fn build_app(config: &ResolvedConfig, database: Option<Utf8PathBuf>) -> miette::Result<HttpApp> {
    let store = match database.or_else(|| config.database.clone()) {
        Some(path) => NetworkStore::open(&path)?,
        None => NetworkStore::open_default()?,
    };
    let client = StringHttpClient::new(config.client_options())?;
    let resolver = IdentifierResolver::new(
        client.clone(),
        MemoryCache::new(),
        config.resolver_options(),
    );
    Ok(App::new(store, resolver, NetworkBuilder::new(client)))
}

fn sink_for(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &ConsoleProgress,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

fn run_build(
    args: BuildArgs,
    app: &HttpApp,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let mut genes = args.genes;
    if let Some(path) = &args.genes_file {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("{path}: {err}")))?;
        genes.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(str::to_string),
        );
    }
    let expression = match &args.expression {
        Some(path) => load_expression_table(path)?,
        None => ExpressionTable::new(),
    };
    let request = NetworkRequest {
        comparison_label: args.label,
        genes,
        confidence_threshold: args.threshold,
        network_type: args.network_type,
        id_format: args.id_format.unwrap_or(config.id_format),
        species: args.species.unwrap_or(config.species),
        expression,
    };

    let result = app.create_network(&request, sink_for(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_build(&result).into_diagnostic(),
        OutputMode::Interactive => {
            print_build_summary(&result);
            Ok(())
        }
    }
}

fn run_show(args: ShowArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let network = app.get_network(args.id, !args.summary)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_network(&network).into_diagnostic(),
        OutputMode::Interactive => {
            print_network_summary(&network);
            Ok(())
        }
    }
}

fn run_list(args: ListArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    let success = match (args.successful, args.failed) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };
    let filter = NetworkFilter {
        comparison_label: args.label,
        network_type: args.network_type,
        success,
    };
    let page = app.query_networks(
        &filter,
        PageRequest {
            limit: args.limit,
            offset: args.offset,
        },
    )?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_page(&page).into_diagnostic(),
        OutputMode::Interactive => {
            print_page(&page);
            Ok(())
        }
    }
}

fn run_delete(args: DeleteArgs, app: &HttpApp, output_mode: OutputMode) -> miette::Result<()> {
    app.delete_network(args.id)?;
    let result = DeleteResult {
        id: args.id,
        deleted: true,
    };
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_delete(&result).into_diagnostic(),
        OutputMode::Interactive => {
            println!("\x1b[32m🗑️  deleted network {}\x1b[0m", args.id);
            Ok(())
        }
    }
}

fn run_resolve(
    args: ResolveArgs,
    app: &HttpApp,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let report = app.resolve_identifiers(
        &args.genes,
        args.id_format.unwrap_or(config.id_format),
        args.species.unwrap_or(config.species),
        sink_for(output_mode),
    )?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_resolution(&report).into_diagnostic(),
        OutputMode::Interactive => {
            print_resolution(&report);
            Ok(())
        }
    }
}

fn print_build_summary(result: &BuildOutcome) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";
    let record = &result.network.record;

    println!("{cyan}🧬 KIRA-PPI network {}{reset}", record.id);
    let (icon, action) = if result.cached {
        ("♻️", "reused stored network")
    } else {
        ("✅", "built new network")
    };
    println!("{green}{icon} {action}: {}{reset}", record.comparison_label);
    println!(
        "{green}   {} nodes, {} edges (threshold {}, {}){reset}",
        record.node_count, record.edge_count, record.confidence_threshold, record.network_type
    );
    println!(
        "{green}   {}/{} genes resolved{reset}",
        result.total_genes - result.unresolved.len(),
        result.total_genes
    );
    if let Some(chunk) = &result.chunk {
        println!(
            "{yellow}⚠️ kept chunk {}/{} ({} ids); cross-chunk interactions are missing{reset}",
            chunk.chunk_index + 1,
            chunk.chunk_count,
            chunk.kept_ids
        );
    }
    if result.annotated_nodes > 0 {
        println!("{cyan}   {} nodes carry expression data{reset}", result.annotated_nodes);
    }
    for mapping in result.unresolved.iter().take(10) {
        println!(
            "{yellow}   • unresolved {}: {}{reset}",
            mapping.input_id,
            mapping.error_reason.as_deref().unwrap_or("no match")
        );
    }
    if result.unresolved.len() > 10 {
        println!("{yellow}   … {} more unresolved{reset}", result.unresolved.len() - 10);
    }
}

fn print_network_summary(network: &StoredNetwork) {
    let record = &network.record;
    let color = if record.success { "\x1b[32m" } else { "\x1b[31m" };
    let reset = "\x1b[0m";
    println!(
        "{color}#{} {} [{}] threshold {}: {} nodes, {} edges{reset}",
        record.id,
        record.comparison_label,
        record.network_type,
        record.confidence_threshold,
        record.node_count,
        record.edge_count
    );
    println!("   hash {}  created {}", record.gene_set_hash, record.created_at);
    if let Some(message) = &record.error_message {
        println!("{color}   error: {message}{reset}");
    }
    if let Some(graph) = &network.graph {
        for edge in &graph.edges {
            println!(
                "   {} - {}  {} ({})",
                edge.source_external_id, edge.target_external_id, edge.score, edge.confidence_level
            );
        }
    }
}

fn print_page(page: &NetworkPage) {
    println!(
        "\x1b[36m📋 {} networks (showing {} from offset {})\x1b[0m",
        page.total,
        page.items.len(),
        page.offset
    );
    for record in &page.items {
        let (icon, color) = if record.success {
            ("✅", "\x1b[32m")
        } else {
            ("❌", "\x1b[31m")
        };
        println!(
            "{color}{icon} #{} {} [{}] {} nodes / {} edges  {}\x1b[0m",
            record.id,
            record.comparison_label,
            record.network_type,
            record.node_count,
            record.edge_count,
            record.created_at
        );
    }
}

fn print_resolution(report: &ResolutionReport) {
    println!(
        "\x1b[36m🔎 {}/{} resolved ({:.0}%) in {} calls\x1b[0m",
        report.resolved_count,
        report.total,
        report.success_rate * 100.0,
        report.batch_calls
    );
    for mapping in &report.mappings {
        match (&mapping.canonical_id, &mapping.error_reason) {
            (Some(id), _) => println!(
                "\x1b[32m   {} → {} ({})\x1b[0m",
                mapping.input_id,
                id,
                mapping.preferred_name.as_deref().unwrap_or("-")
            ),
            (None, reason) => println!(
                "\x1b[33m   {} unresolved: {}\x1b[0m",
                mapping.input_id,
                reason.as_deref().unwrap_or("no match")
            ),
        }
    }
}
