mod conf;
mod error;
mod es_client;
mod flatten;
mod models;
mod output;
mod query;

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgGroup, Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::es_client::{build_reqwest_client, EsClient};
use crate::flatten::Table;
use crate::models::search_response::SearchResponse;
use crate::output::Format;
use crate::query::{Aggregation, SearchRequest, SortOrder, SAMPLES};

#[derive(Parser, Debug)]
#[command(name = "es-flatten", version, about = "Query Elasticsearch and print hits as rows")]
struct Cli {
    /// TOML config file, ESF_* environment variables override it
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Cluster URL, overrides the config
    #[arg(long)]
    url: Option<String>,
    #[arg(short, long)]
    debug: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show node and cluster information
    Info,
    /// Run a search and flatten its hits (or aggregation buckets)
    Search(SearchArgs),
    /// Terms aggregation over one field, flattened buckets
    Aggs(AggsArgs),
    /// List mapped fields of an index
    Mapping(IndexArgs),
    /// List the bundled sample queries
    Samples,
}

#[derive(Args, Debug)]
struct IndexArgs {
    #[arg(short, long)]
    index: Option<String>,
    #[arg(long, value_enum, default_value_t = Format::Table)]
    format: Format,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("source").args(["query", "query_file", "sample"])))]
struct SearchArgs {
    #[command(flatten)]
    target: IndexArgs,
    /// Literal Query DSL document
    #[arg(short, long)]
    query: Option<String>,
    #[arg(long, value_name = "PATH")]
    query_file: Option<PathBuf>,
    /// Name of a bundled sample query, see `samples`
    #[arg(long)]
    sample: Option<String>,
    /// Send the sample as its literal JSON text instead of the builder output
    #[arg(long, requires = "sample")]
    literal: bool,
    #[arg(short, long)]
    size: Option<u64>,
    /// Flatten `aggregations.<NAME>.buckets` instead of the hits
    #[arg(long, value_name = "NAME")]
    buckets: Option<String>,
    #[arg(long)]
    max_level: Option<usize>,
    /// Print the response document as returned by the cluster
    #[arg(long)]
    raw: bool,
}

#[derive(Args, Debug)]
struct AggsArgs {
    #[command(flatten)]
    target: IndexArgs,
    #[arg(long)]
    field: String,
    /// Aggregation name, defaults to `<field>_terms`
    #[arg(long)]
    name: Option<String>,
    /// Number of buckets
    #[arg(short, long)]
    size: Option<u64>,
    /// Order buckets by term instead of by count
    #[arg(long, value_enum)]
    order: Option<SortOrder>,
}

/// Where a search body comes from: raw text or the builder.
#[derive(Debug)]
enum QuerySource {
    Text(String),
    Builder(SearchRequest),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = conf::load(cli.config.as_ref())?;
    if let Some(url) = cli.url {
        config.set_url(url);
    }
    debug!(
        "Config loaded ... url={}, index={:?}, size={}, retries={}",
        config.get_url(),
        config.get_index(),
        config.get_size(),
        config.get_retries()
    );

    let http_client = build_reqwest_client(
        config.get_root_certificates(),
        config.is_insecure(),
        config.get_timeout(),
    )?;
    let client = EsClient::new(config.endpoint(), http_client).with_retries(config.get_retries());

    match cli.command {
        Command::Info => {
            let info = client.server_info().await?;
            info!(
                "{}: hostname={}, name={}, uuid={:?}, version={} (major {:?}), lucene={}",
                config.get_url(),
                info.get_hostname(),
                info.get_name(),
                info.get_uuid(),
                info.get_version(),
                info.get_version_major(),
                info.get_lucene_version()
            );
            let record = serde_json::to_value(&info)?;
            print_table(&flatten::normalize(&[record], None), Format::Table)
        }
        Command::Search(args) => {
            let index = resolve_index(&args.target, &config)?;
            let size = args.size.or(Some(config.get_size()));
            let value = match search_source(&args)? {
                QuerySource::Text(text) => client.search_str(&index, &text, size).await?,
                QuerySource::Builder(request) => client.execute(&index, &request, size).await?,
            };
            let response = SearchResponse::new(value);
            info!(
                "took={:?}ms total_hits={:?}",
                response.get_took(),
                response.get_total_hits()
            );
            if args.raw {
                return print_raw(response.as_value());
            }
            let table = match &args.buckets {
                Some(name) => flatten::buckets_table(&response, name, args.max_level)
                    .inspect_err(|_| {
                        warn!(
                            "Aggregations present in the response: {:?}",
                            response.get_aggregation_names()
                        )
                    })?,
                None => flatten::hits_table(&response, args.max_level)?,
            };
            print_table(&table, args.target.format)
        }
        Command::Aggs(args) => {
            let index = resolve_index(&args.target, &config)?;
            let name = args
                .name
                .clone()
                .unwrap_or_else(|| format!("{}_terms", args.field));
            let request = SearchRequest::new().size(0).aggregate(
                &name,
                Aggregation::Terms {
                    field: args.field.clone(),
                    size: args.size,
                    order: args.order,
                },
            );
            let response = SearchResponse::new(client.execute(&index, &request, None).await?);
            print_table(
                &flatten::buckets_table(&response, &name, None)?,
                args.target.format,
            )
        }
        Command::Mapping(args) => {
            let index = resolve_index(&args, &config)?;
            let mapping = client.mapping(&index).await?;
            print_table(&flatten::mapping_table(&mapping), args.format)
        }
        Command::Samples => {
            let records: Vec<Value> = SAMPLES
                .iter()
                .map(|s| json!({ "name": s.name, "description": s.description }))
                .collect();
            print_table(&flatten::normalize(&records, None), Format::Table)
        }
    }
}

fn resolve_index(args: &IndexArgs, config: &conf::Config) -> Result<String> {
    args.index
        .clone()
        .or_else(|| config.get_index().map(str::to_string))
        .ok_or_else(|| Error::Config("no index given, use --index or set `index`".to_string()))
}

/// Falls back to the `match_all` sample when no query source is given.
fn search_source(args: &SearchArgs) -> Result<QuerySource> {
    if let Some(text) = &args.query {
        return Ok(QuerySource::Text(text.clone()));
    }
    if let Some(path) = &args.query_file {
        return Ok(QuerySource::Text(std::fs::read_to_string(path)?));
    }
    let name = args.sample.as_deref().unwrap_or("match_all");
    let sample = query::sample(name)
        .ok_or_else(|| Error::InvalidQuery(format!("unknown sample `{}`", name)))?;
    if args.literal {
        Ok(QuerySource::Text(sample.literal.to_string()))
    } else {
        Ok(QuerySource::Builder(sample.request()))
    }
}

fn print_table(table: &Table, format: Format) -> Result<()> {
    if table.is_empty() {
        warn!("No rows to print");
    } else {
        debug!("Printing {} row(s) x {} column(s)", table.len(), table.get_columns().len());
    }
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    output::write_table(table, format, &mut out)?;
    out.flush()?;
    Ok(())
}

fn print_raw(value: &Value) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
