use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use cloudrest::credential::{
    CredentialSource, GcpCredential, RefreshTokenExchange, StaticCredential, TokenCache,
    TokenCacheOptions, TokenRequest,
};
use cloudrest::error::ErrorKind;
use cloudrest::operation::{registry_error_types, ArgValue, ParamKind, ReturnShape};
use cloudrest::{Args, Catalog, Dispatcher, OperationDescriptor, Pipeline, PipelineConfig};
use futures::TryStreamExt;
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Call REST operations declared in a catalogue
#[derive(Parser, Debug)]
#[command(name = "cloudrest", version = cloudrest::VERSION, about, long_about = None)]
struct Cli {
    /// Pipeline configuration file (YAML or JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Operation catalogue file; defaults to the embedded container-registry catalogue
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off")]
    log_level: LogLevel,

    /// Answer bearer challenges with this token
    #[arg(long, conflicts_with = "gcp")]
    token: Option<String>,

    /// Answer bearer challenges with Application Default Credentials
    #[arg(long)]
    gcp: bool,

    /// Trade the upstream token for a registry token before answering challenges
    #[arg(long, requires = "endpoint")]
    exchange: bool,

    /// Service endpoint bound to the `endpoint` host placeholder
    #[arg(long)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the operations in the catalogue
    List,
    /// Print the effective pipeline configuration
    Config,
    /// Invoke an operation and print the decoded result
    Call {
        /// Operation name
        operation: String,

        /// Argument as name=value; repeat a name to pass a list
        #[arg(short = 'a', long = "arg", value_parser = parse_arg)]
        args: Vec<(String, String)>,

        /// File used as the request body (JSON if it parses, raw bytes otherwise)
        #[arg(long)]
        body: Option<PathBuf>,

        /// Write byte and stream results to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn parse_arg(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got `{raw}`")),
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(err) => {
            eprintln!("Warning: cannot open log file {}: {}", log_path.display(), err);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    tracing_subscriber::fmt()
        .with_max_level(tracing_level)
        .with_writer(non_blocking.with_max_level(tracing_level))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("cloudrest started with log level: {:?}", level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("cloudrest").join("cloudrest.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".cloudrest").join("cloudrest.log");
    }
    PathBuf::from("cloudrest.log")
}

/// Turn a failure into a short message for the terminal
///
/// Details stay in the log file; only the status category and the server's
/// summary are shown.
fn format_error(error: &anyhow::Error) -> String {
    if let Some(err) = error.downcast_ref::<cloudrest::Error>() {
        if let Some(http) = err.as_http() {
            let hint = match http.kind() {
                ErrorKind::Unauthorized => "Authentication failed. Pass --token or --gcp.",
                ErrorKind::NotFound => "Resource not found.",
                ErrorKind::Conflict => {
                    "Resource conflict. The resource may already exist or be in use."
                }
                ErrorKind::Throttled => "Rate limit exceeded. Please try again later.",
                ErrorKind::Server => "Service temporarily unavailable. Please try again.",
                ErrorKind::Other => "Request rejected.",
            };
            return format!("{} ({})", hint, truncate(http.message()));
        }
    }

    let chain = format!("{error:#}");
    truncate(&chain)
}

fn truncate(message: &str) -> String {
    let sanitized = message
        .chars()
        .filter(|c| c.is_ascii_graphic() || *c == ' ')
        .take(160)
        .collect::<String>();

    if sanitized.len() < message.len() {
        format!("{}...", sanitized)
    } else {
        sanitized
    }
}

fn load_config(cli: &Cli) -> Result<PipelineConfig> {
    let mut config = match &cli.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => PipelineConfig::discover().context("Failed to load config")?,
    };
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    Ok(config)
}

fn load_catalog(cli: &Cli) -> Result<Catalog> {
    match &cli.catalog {
        Some(path) => Catalog::load(path)
            .with_context(|| format!("Failed to load catalogue {}", path.display())),
        None => Ok(Catalog::builtin().clone()),
    }
}

async fn credential(
    cli: &Cli,
    config: &PipelineConfig,
) -> Result<Option<Arc<dyn CredentialSource>>> {
    let upstream: Arc<dyn CredentialSource> = if let Some(token) = &cli.token {
        Arc::new(StaticCredential::from_token(token.clone()))
    } else if cli.gcp {
        Arc::new(GcpCredential::new().await.context("Failed to initialize credentials")?)
    } else {
        if cli.exchange {
            bail!("--exchange needs an upstream credential (--token or --gcp)");
        }
        return Ok(None);
    };

    if !cli.exchange {
        return Ok(Some(upstream));
    }
    let endpoint = config
        .endpoint
        .as_deref()
        .context("--exchange needs an endpoint")?;
    let service = url::Url::parse(endpoint)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| endpoint.to_string());
    let exchange = RefreshTokenExchange::from_config(
        config,
        endpoint,
        upstream,
        TokenRequest::new(service, "https://management.azure.com/.default"),
    )?;
    let exchange: Arc<dyn CredentialSource> = Arc::new(exchange);
    Ok(Some(exchange))
}

async fn dispatcher(cli: &Cli, config: &PipelineConfig) -> Result<Dispatcher> {
    let tokens = credential(cli, config).await?.map(|source| {
        Arc::new(TokenCache::with_options(
            source,
            TokenCacheOptions::from(&config.token),
        ))
    });
    let pipeline = Pipeline::from_config(config, tokens).context("Failed to build pipeline")?;
    tracing::debug!("Pipeline policies: {:?}", pipeline.policy_names());

    let mut dispatcher = Dispatcher::new(pipeline).with_error_types(registry_error_types());
    if let Some(endpoint) = &config.endpoint {
        dispatcher = dispatcher.with_endpoint(endpoint.clone());
    }
    Ok(dispatcher)
}

fn call_args(
    descriptor: &OperationDescriptor,
    raw: &[(String, String)],
    body: Option<&Path>,
) -> Result<Args> {
    let mut grouped: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in raw {
        grouped.entry(name.as_str()).or_default().push(value.clone());
    }

    let mut args = Args::new();
    for (name, mut values) in grouped {
        let value = if values.len() == 1 {
            ArgValue::Text(values.remove(0))
        } else {
            ArgValue::List(values)
        };
        args.set(name, value);
    }

    if let Some(path) = body {
        let Some(binding) = descriptor.params_of(ParamKind::Body).next() else {
            bail!("Operation `{}` takes no body", descriptor.name());
        };
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read body {}", path.display()))?;
        let value = match serde_json::from_slice::<Value>(&bytes) {
            Ok(json) => ArgValue::Json(json),
            Err(_) => ArgValue::from(bytes),
        };
        args.set(binding.name.clone(), value);
    }
    Ok(args)
}

fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Wrote {} bytes to {}", bytes.len(), path.display());
        }
        None => std::io::stdout()
            .write_all(bytes)
            .context("Failed to write to stdout")?,
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn call(
    dispatcher: &Dispatcher,
    descriptor: &OperationDescriptor,
    args: &Args,
    output: Option<&Path>,
) -> Result<()> {
    match descriptor.returns() {
        ReturnShape::Void => {
            let status = dispatcher.invoke_void(descriptor, args).await?;
            println!("{}", status);
        }
        ReturnShape::Exists => {
            println!("{}", dispatcher.exists(descriptor, args).await?);
        }
        ReturnShape::Bytes => {
            let bytes = dispatcher.download(descriptor, args).await?;
            write_output(output, &bytes)?;
        }
        ReturnShape::Stream => {
            let chunks: Vec<bytes::Bytes> = dispatcher
                .open_stream(descriptor, args)
                .await?
                .try_collect()
                .await
                .map_err(cloudrest::Error::from)?;
            write_output(output, &chunks.concat())?;
        }
        ReturnShape::Paged(_) => {
            let items: Vec<Value> = dispatcher
                .items::<Value>(descriptor, args)
                .try_collect()
                .await?;
            print_json(&Value::Array(items))?;
        }
        ReturnShape::Value if descriptor.envelope().is_some_and(|e| e.typed_headers) => {
            let response = dispatcher
                .invoke_response::<Value, Value>(descriptor, args)
                .await?;
            print_json(&serde_json::json!({
                "status": response.status.as_u16(),
                "headers": response.typed_headers,
                "value": response.value,
            }))?;
        }
        ReturnShape::Value => match dispatcher.invoke::<Value>(descriptor, args).await? {
            Some(value) => print_json(&value)?,
            None => println!("(no content)"),
        },
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Config => {
            print!("{}", config.to_yaml()?);
        }
        Command::List => {
            let catalog = load_catalog(&cli)?;
            for op in catalog.iter() {
                println!(
                    "{:<45} {:<7} {:<8} {}",
                    op.name(),
                    op.verb(),
                    op.returns().name(),
                    op.path().as_str()
                );
            }
        }
        Command::Call {
            operation,
            args,
            body,
            output,
        } => {
            let catalog = load_catalog(&cli)?;
            let descriptor = catalog.require(operation)?;
            let call_args = call_args(&descriptor, args, body.as_deref())?;
            let dispatcher = dispatcher(&cli, &config).await?;
            call(&dispatcher, &descriptor, &call_args, output.as_deref()).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let _log_guard = setup_logging(cli.log_level);

    if let Err(err) = run(cli).await {
        tracing::error!("Command failed: {:?}", err);
        eprintln!("Error: {}", format_error(&err));
        std::process::exit(1);
    }
}
