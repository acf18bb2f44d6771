use std::{path::PathBuf, time::Duration};

use {
    anyhow::{Context, Result, bail},
    bearer_agent::{Agent, AgentBuilder, AgentSettings, Error as AgentError, RequestTimeout},
    bytes::Bytes,
    clap::Parser,
    http::{HeaderName, HeaderValue, Method, Request},
};

/// Send one HTTP request through the bearer agent.
///
/// The request is checked against the remote domain blocklist, forwarded,
/// and reported to the collector. Useful to verify a secret key and to see
/// what the agent records for a given endpoint.
#[derive(Parser, Debug)]
#[command(version)]
struct Args {
    /// Absolute URL to request.
    url: String,

    /// HTTP method.
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, `Name: value`. Repeatable.
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body.
    #[arg(short, long)]
    data: Option<String>,

    /// Upstream timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// TOML settings file. `BEARER_*` variables override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Secret key, overriding the settings file and environment.
    #[arg(long, env = "BEARER_SECRETKEY", hide_env_values = true)]
    secret_key: Option<String>,

    /// How long to wait for the report to reach the collector before exiting.
    #[arg(long, default_value_t = 2000)]
    flush_ms: u64,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json_logs);

    #[cfg(feature = "prometheus")]
    let metrics = bearer_metrics::install_prometheus_recorder()?;

    let agent = build_agent(&args)?;
    let request = build_request(&args)?;

    let result = agent.round_trip(request).await;
    match &result {
        Ok(response) => {
            println!("{:?} {}", response.version(), response.status());
            for (name, value) in response.headers() {
                println!("{name}: {}", value.to_str().unwrap_or("<binary>"));
            }
            println!();
            println!("{}", String::from_utf8_lossy(response.body()));
        },
        Err(AgentError::BlockedDomain { domain }) => {
            eprintln!("blocked: {domain} is on the remote blocklist");
        },
        Err(e) => eprintln!("request failed: {e}"),
    }

    if !matches!(result, Err(AgentError::BlockedDomain { .. })) {
        wait_for_report(&agent, Duration::from_millis(args.flush_ms)).await;
    }

    let stats = agent.shipper_stats();
    tracing::info!(
        submitted = stats.submitted,
        failed = stats.failed,
        config_updates = agent.config_store().update_count(),
        "probe finished"
    );

    #[cfg(feature = "prometheus")]
    print!("{}", metrics.render());

    result.map(|_| ()).context("probe request failed")
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_agent(args: &Args) -> Result<Agent> {
    let mut settings = match &args.config {
        Some(path) => AgentSettings::load(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => AgentSettings::default(),
    };
    settings.apply_env();

    let mut builder = AgentBuilder::from_settings(settings);
    if let Some(key) = &args.secret_key {
        builder = builder.secret_key(key.clone());
    }
    Ok(builder.build())
}

fn build_request(args: &Args) -> Result<Request<Bytes>> {
    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .with_context(|| format!("invalid method {:?}", args.method))?;
    let mut request = Request::builder()
        .method(method)
        .uri(&args.url)
        .body(args.data.clone().map(Bytes::from).unwrap_or_default())
        .context("invalid request")?;

    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        request.headers_mut().append(name, value);
    }
    if let Some(ms) = args.timeout_ms {
        request
            .extensions_mut()
            .insert(RequestTimeout(Duration::from_millis(ms)));
    }
    Ok(request)
}

fn parse_header(raw: &str) -> Result<(HeaderName, HeaderValue)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header must look like `Name: value`, got {raw:?}");
    };
    let name = HeaderName::from_bytes(name.trim().as_bytes())
        .with_context(|| format!("invalid header name in {raw:?}"))?;
    let value = HeaderValue::from_str(value.trim())
        .with_context(|| format!("invalid header value in {raw:?}"))?;
    Ok((name, value))
}

/// Reports are shipped on a detached task; give it a chance to finish.
async fn wait_for_report(agent: &Agent, limit: Duration) {
    let deadline = tokio::time::Instant::now() + limit;
    loop {
        let stats = agent.shipper_stats();
        if stats.submitted + stats.failed > 0 || tokio::time::Instant::now() >= deadline {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_headers() {
        let (name, value) = parse_header("Content-Type: application/json").unwrap();
        assert_eq!(name, "content-type");
        assert_eq!(value, "application/json");
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header("bad name: x").is_err());
    }

    #[test]
    fn builds_request_with_timeout() {
        let args = Args::parse_from([
            "bearer-probe",
            "-X",
            "post",
            "-H",
            "Accept: text/plain",
            "--data",
            "hi",
            "--timeout-ms",
            "1500",
            "https://api.example.com/things",
        ]);
        let request = build_request(&args).unwrap();
        assert_eq!(request.method(), Method::POST);
        assert_eq!(request.headers()["accept"], "text/plain");
        assert_eq!(request.body().as_ref(), b"hi");
        assert_eq!(
            request.extensions().get::<RequestTimeout>(),
            Some(&RequestTimeout(Duration::from_millis(1500)))
        );
    }

    #[test]
    fn secret_key_flag_authenticates_agent() {
        let args = Args::parse_from([
            "bearer-probe",
            "--secret-key",
            "sk_cli",
            "https://api.example.com/",
        ]);
        let agent = build_agent(&args).unwrap();
        assert!(agent.shipper().is_authenticated());
    }
}
