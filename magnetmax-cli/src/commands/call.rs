//! Call command - issue a request through the client pipeline.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Args, ValueEnum};
use magnetmax_client::{ConnectivityMonitor, MagnetClient, OneshotCallback};
use magnetmax_core::{CacheOptions, Call, HttpRequest, NetworkClass, ReliableCallOptions};
use magnetmax_store::MagnetConfig;
use tracing::{debug, info};

use super::load_config;
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the call command.
#[derive(Args, Debug, Clone)]
pub struct CallArgs {
    /// HTTP method.
    pub method: String,

    /// Absolute URL, or a path resolved against the configured base URL.
    pub target: String,

    /// Request body.
    #[arg(long, short)]
    pub body: Option<String>,

    /// Extra header as "Name: value". Repeatable.
    #[arg(long = "header", short = 'H')]
    pub headers: Vec<String>,

    /// Serve from cache for this many seconds.
    #[arg(long, conflicts_with = "reliable")]
    pub cache_age: Option<u64>,

    /// Fall back to any cached response while offline.
    #[arg(long, conflicts_with = "reliable")]
    pub offline_cache: bool,

    /// Deliver eventually: persist and resend until it succeeds or expires.
    #[arg(long)]
    pub reliable: bool,

    /// Only send a reliable call over Wi-Fi.
    #[arg(long, requires = "reliable")]
    pub wifi_only: bool,

    /// Lifetime of a reliable call in seconds (0 = never expires).
    #[arg(long, requires = "reliable")]
    pub expires_in: Option<u64>,

    /// Send to the mock endpoint instead of the REST endpoint.
    #[arg(long)]
    pub mock: bool,

    /// Network class to report to the client.
    #[arg(long, value_enum, default_value = "unknown")]
    pub network: NetworkArg,
}

/// Network class as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum NetworkArg {
    /// Connected over Wi-Fi.
    Wifi,
    /// Connected over mobile data.
    Mobile,
    /// Offline.
    #[value(name = "none")]
    Offline,
    /// Connected, type not known.
    Unknown,
}

impl From<NetworkArg> for NetworkClass {
    fn from(arg: NetworkArg) -> Self {
        match arg {
            NetworkArg::Wifi => NetworkClass::Wifi,
            NetworkArg::Mobile => NetworkClass::Mobile,
            NetworkArg::Offline => NetworkClass::None,
            NetworkArg::Unknown => NetworkClass::Unknown,
        }
    }
}

/// Runs the call command.
pub async fn run(args: &CallArgs, cli: &Cli) -> Result<ExitCode> {
    let config = load_config(cli).await?.get().await;
    let call = build_call(args, &config)?;
    debug!(method = %call.request.method, url = %call.request.url, "Built call");

    let client = MagnetClient::builder()
        .config(config.clone())
        .connectivity(Arc::new(ConnectivityMonitor::new(args.network.into())))
        .build()
        .context("Failed to build client")?;

    if config.auth_enabled {
        client
            .authenticate_app()
            .await
            .context("App authentication failed")?;
        info!("App token acquired");
    }

    let (callback, rx) = OneshotCallback::channel();
    let handle = client.enqueue(call.clone(), Arc::new(callback));

    if handle.is_deferred() {
        match cli.format {
            OutputFormat::Text => {
                let formatter = TextFormatter::new(!cli.no_color);
                println!("{}", formatter.format_deferred(&call));
            }
            OutputFormat::Json => {
                let formatter = JsonFormatter::new(cli.pretty);
                println!("{}", formatter.format_deferred(&call)?);
            }
        }
        return Ok(ExitCode::Deferred);
    }

    let response = rx.await.context("Call dropped without an outcome")??;

    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            println!("{}", formatter.format_response(&response, cli.verbose));
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_response(&response)?);
        }
    }

    if response.is_success() {
        Ok(ExitCode::Success)
    } else {
        Ok(ExitCode::HttpStatus)
    }
}

/// Builds the call described by `args`.
pub fn build_call(args: &CallArgs, config: &MagnetConfig) -> Result<Call> {
    let url = if args.target.starts_with("http://") || args.target.starts_with("https://") {
        args.target.clone()
    } else {
        config.endpoint(&args.target)?
    };

    let mut request = HttpRequest::new(&args.method, url);
    for header in &args.headers {
        let (name, value) = parse_header(header)?;
        request = request.with_header(name, value);
    }
    if let Some(body) = &args.body {
        request = request.with_body(body.as_str());
        if request.header("Content-Type").is_none() {
            request = request.with_header("Content-Type", "application/json");
        }
    }

    let call = Call::new(request);
    let call = if args.reliable {
        let mut options = ReliableCallOptions::builder().use_mock(args.mock);
        if args.wifi_only {
            options = options.wifi_only();
        }
        if let Some(secs) = args.expires_in {
            options = options.expires_in(secs);
        }
        call.with_options(options.build())
    } else if args.cache_age.is_some() || args.offline_cache || args.mock {
        call.with_options(
            CacheOptions::builder()
                .max_cache_age(args.cache_age.unwrap_or(0))
                .always_use_cache_if_offline(args.offline_cache)
                .use_mock(args.mock)
                .build(),
        )
    } else {
        call
    };
    Ok(call)
}

fn parse_header(raw: &str) -> Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("Invalid header {raw:?}, expected \"Name: value\"");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("Invalid header {raw:?}, empty name");
    }
    Ok((name.to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: CallArgs,
    }

    fn parse(argv: &[&str]) -> CallArgs {
        Harness::parse_from(std::iter::once("call").chain(argv.iter().copied())).args
    }

    fn config() -> MagnetConfig {
        MagnetConfig {
            base_url: "https://magnet.example.com".into(),
            client_id: "cli".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_relative_target_resolved_against_base_url() {
        let call = build_call(&parse(&["get", "/api/channels"]), &config()).unwrap();
        assert_eq!(call.request.method, "GET");
        assert_eq!(call.request.url, "https://magnet.example.com/api/channels");
        assert!(call.options.is_none());
    }

    #[test]
    fn test_cache_flags_build_cache_options() {
        let args = parse(&[
            "GET",
            "https://x.example.com/api/a",
            "--cache-age",
            "60",
            "--offline-cache",
        ]);
        let call = build_call(&args, &config()).unwrap();
        let options = call.options.as_ref().and_then(|o| o.as_cache()).unwrap();
        assert_eq!(options.max_cache_age, 60);
        assert!(options.always_use_cache_if_offline);
    }

    #[test]
    fn test_reliable_flags_build_reliable_options() {
        let args = parse(&[
            "POST",
            "/api/events",
            "--body",
            "{}",
            "--reliable",
            "--wifi-only",
            "--expires-in",
            "120",
        ]);
        let call = build_call(&args, &config()).unwrap();
        let options = call.options.as_ref().and_then(|o| o.as_reliable()).unwrap();
        assert!(options.requires_wifi());
        assert_eq!(options.expires_in, 120);
        assert_eq!(call.request.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn test_wifi_only_requires_reliable() {
        let result = Harness::try_parse_from(["call", "POST", "/api/x", "--wifi-only"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_header() {
        assert_eq!(
            parse_header("X-Trace:  abc ").unwrap(),
            ("X-Trace".to_string(), "abc".to_string())
        );
        assert!(parse_header("no-colon").is_err());
        assert!(parse_header(": v").is_err());
    }
}
