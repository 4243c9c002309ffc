//! CLI subcommand implementations.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{bail, Context, Result};
use apilens_core::network::{ApiTestResult, ExecuteOptions, HttpMethod, HttpRequest};
use apilens_core::schema::{ApiSchema, Endpoint, SchemaCatalog};
use apilens_core::{infer_structure, ProbeSettings, RequestExecutor};
use clap::Args;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use url::Url;

/// Execution flags shared by `request`, `call` and `record`.
#[derive(Args, Debug, Clone, Default)]
pub struct ExecArgs {
    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Use the raw socket transport
    #[arg(long)]
    pub raw: bool,

    /// Total attempts, including the first
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Bypass the per-host circuit breaker
    #[arg(long)]
    pub no_circuit_breaker: bool,

    /// Do not follow redirects
    #[arg(long)]
    pub no_redirects: bool,
}

impl ExecArgs {
    /// Layer the flags over the settings-file options.
    pub fn options(&self, defaults: &ExecuteOptions) -> ExecuteOptions {
        let mut options = defaults.clone();
        if let Some(attempts) = self.max_retries {
            options.max_retries = Some(attempts);
        }
        if self.raw {
            options.raw_mode = true;
        }
        if self.no_circuit_breaker {
            options.disable_circuit_breaker = true;
        }
        if self.no_redirects {
            options.follow_redirects = false;
        }
        options
    }
}

/// An ad-hoc request described on the command line.
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Absolute http(s) URL
    pub url: String,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: String,

    /// Header as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Query parameter as "key=value" (repeatable)
    #[arg(short = 'q', long = "query")]
    pub query: Vec<String>,

    /// Request body; sent as JSON when it parses as JSON
    #[arg(short = 'd', long = "data")]
    pub data: Option<String>,

    #[command(flatten)]
    pub exec: ExecArgs,
}

impl RequestArgs {
    pub fn to_request(&self) -> Result<HttpRequest> {
        let method: HttpMethod = self.method.parse()?;
        let mut request = HttpRequest::new(method, self.url.clone());
        for header in &self.headers {
            let (name, value) = parse_header(header)?;
            request.headers.insert(name, value);
        }
        if !self.query.is_empty() {
            let mut params = BTreeMap::new();
            for pair in &self.query {
                let (key, value) = parse_pair(pair)?;
                params.insert(key, value);
            }
            request.params = Some(params);
        }
        request.body = self.data.as_deref().map(parse_body);
        request.timeout = self.exec.timeout;
        Ok(request)
    }
}

/// Parse `"Name: value"`.
pub fn parse_header(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("Invalid header {:?}, expected \"Name: value\"", raw),
    }
}

/// Parse `"key=value"`.
pub fn parse_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => bail!("Invalid parameter {:?}, expected \"key=value\"", raw),
    }
}

/// JSON if the text parses as JSON, else the text itself.
pub fn parse_body(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn build_executor(settings: &ProbeSettings) -> Result<RequestExecutor> {
    Ok(RequestExecutor::with_config(
        settings.executor.executor_config(),
    )?)
}

/// `scan`: list schemas, their endpoints, and files that failed to load.
pub fn scan(schemas_dir: &Path, as_json: bool) -> Result<()> {
    let catalog = SchemaCatalog::scan(schemas_dir)?;

    if as_json {
        return print_json(&json!({
            "schemas": catalog.summaries(),
            "issues": catalog.issues(),
        }));
    }

    if catalog.is_empty() {
        println!("No schemas found in {}", schemas_dir.display());
    }
    for schema in catalog.schemas() {
        println!("{} ({})", schema.name, schema.base_url);
        for endpoint in &schema.endpoints {
            match &endpoint.description {
                Some(description) => println!("  {}  - {}", endpoint.id(), description),
                None => println!("  {}", endpoint.id()),
            }
        }
    }
    for issue in catalog.issues() {
        println!("! {}: {}", issue.path.display(), issue.message);
    }
    Ok(())
}

/// `request`: execute an ad-hoc request. Returns whether it succeeded.
pub async fn request(settings: &ProbeSettings, args: &RequestArgs) -> Result<bool> {
    let executor = build_executor(settings)?;
    let options = args.exec.options(&settings.executor.execute_options());

    let result = executor.execute_request(args.to_request()?, &options).await;
    print_json(&result)?;
    Ok(result.success)
}

/// `call`: execute an endpoint from a schema. Returns whether it succeeded.
pub async fn call(
    settings: &ProbeSettings,
    schemas_dir: &Path,
    schema: &str,
    endpoint: &str,
    path_params: &[String],
    exec: &ExecArgs,
) -> Result<bool> {
    let catalog = SchemaCatalog::scan(schemas_dir)?;
    let (schema, endpoint) = catalog.find_endpoint(schema, endpoint)?;

    let mut values = BTreeMap::new();
    for pair in path_params {
        let (key, value) = parse_pair(pair)?;
        values.insert(key, value);
    }
    let mut request = schema.to_request_with(endpoint, &values);
    if exec.timeout.is_some() {
        request.timeout = exec.timeout;
    }

    let executor = build_executor(settings)?;
    let options = exec.options(&settings.executor.execute_options());
    let result = executor.execute_request(request, &options).await;
    print_json(&result)?;
    Ok(result.success)
}

/// Arguments for `record`.
#[derive(Args, Debug, Clone)]
pub struct RecordArgs {
    /// Schema file to create or update
    pub schema_file: PathBuf,

    #[command(flatten)]
    pub request: RequestArgs,

    /// Endpoint name (defaults to "METHOD path")
    #[arg(long)]
    pub name: Option<String>,

    /// Schema name when creating the file (defaults to the file stem)
    #[arg(long)]
    pub schema_name: Option<String>,

    /// Base URL when creating the file (defaults to the URL origin)
    #[arg(long)]
    pub base_url: Option<String>,
}

/// `record`: execute a request, infer the response structure and upsert the
/// endpoint into the schema file. Nothing is written when the request fails.
pub async fn record(settings: &ProbeSettings, args: &RecordArgs) -> Result<bool> {
    let request = args.request.to_request()?;
    let executor = build_executor(settings)?;
    let options = args.request.exec.options(&settings.executor.execute_options());

    let result = executor.execute_request(request, &options).await;
    if !result.success {
        print_json(&result)?;
        return Ok(false);
    }

    let mut schema = load_or_create_schema(args)?;
    let endpoint = endpoint_from_result(&schema, &result, args.name.clone())?;
    let id = endpoint.id();
    let replaced = schema.upsert_endpoint(endpoint);
    schema.save(&args.schema_file)?;

    info!(
        "{} endpoint {} in {}",
        if replaced { "Updated" } else { "Recorded" },
        id,
        args.schema_file.display()
    );
    print_json(&json!({
        "schema": schema.name,
        "endpoint": id,
        "replaced": replaced,
        "file": args.schema_file,
        "result": result,
    }))?;
    Ok(true)
}

fn load_or_create_schema(args: &RecordArgs) -> Result<ApiSchema> {
    if args.schema_file.is_file() {
        return Ok(ApiSchema::from_file(&args.schema_file)?);
    }

    let name = match &args.schema_name {
        Some(name) => name.clone(),
        None => args
            .schema_file
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::to_string)
            .context("Cannot derive a schema name from the file name; pass --schema-name")?,
    };
    let base_url = match &args.base_url {
        Some(base) => base.clone(),
        None => origin(&args.request.url)?,
    };
    Ok(ApiSchema::new(name, base_url))
}

fn origin(raw: &str) -> Result<String> {
    let url = Url::parse(raw).with_context(|| format!("Invalid URL: {}", raw))?;
    Ok(url.origin().ascii_serialization())
}

/// Endpoint path relative to `base_url`, or the full URL (without query)
/// when it lies outside the base.
fn relative_path(base_url: &str, url: &str) -> Result<String> {
    let mut parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    parsed.set_query(None);
    parsed.set_fragment(None);
    let full = parsed.to_string();

    let base = base_url.trim_end_matches('/');
    match full.strip_prefix(base) {
        Some("") => Ok("/".to_string()),
        Some(rest) if rest.starts_with('/') => Ok(rest.to_string()),
        _ => Ok(full),
    }
}

fn endpoint_from_result(
    schema: &ApiSchema,
    result: &ApiTestResult,
    name: Option<String>,
) -> Result<Endpoint> {
    let request = &result.request;
    let mut endpoint = Endpoint::new(request.method, relative_path(&schema.base_url, &request.url)?);
    endpoint.name = name;
    endpoint.headers = request
        .headers
        .iter()
        .filter(|(key, value)| schema.headers.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    endpoint.params = request.params.clone().unwrap_or_default();
    endpoint.body = request.body.clone();
    endpoint.response = Some(infer_structure(&result.response).structure.to_value());
    Ok(endpoint)
}
