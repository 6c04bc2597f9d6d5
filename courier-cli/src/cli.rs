//! Command line front-end: one request, response on stdout.

use anyhow::{Context, Result};
use clap::Parser;
use courier::{ClientConfig, HeaderSet, HttpClient, Method, ParameterSet, Response};
use tokio::sync::oneshot;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "courier")]
#[command(about = "Send one HTTP request and print the response", long_about = None)]
pub struct Cli {
    /// Target URL. Whitespace is escaped automatically.
    pub url: String,

    /// Request method.
    #[arg(short = 'X', long, default_value = "GET")]
    pub method: Method,

    /// Request parameter, sent in the query for GET-like methods and as a
    /// form body otherwise. Repeatable.
    #[arg(short = 'd', long = "param", value_name = "NAME=VALUE", value_parser = parse_param)]
    pub params: Vec<(String, String)>,

    /// Request header. Repeatable; a later header replaces an earlier one with the same name.
    #[arg(short = 'H', long = "header", value_name = "NAME:VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Whole-request timeout in milliseconds (default: none).
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Connect timeout in milliseconds (default: none).
    #[arg(long, value_name = "MS")]
    pub connect_timeout_ms: Option<u64>,

    /// Charset used when the response does not declare one.
    #[arg(long, value_name = "LABEL", default_value = "utf-8")]
    pub charset: String,

    /// Charset used to encode parameters.
    #[arg(long, value_name = "LABEL", default_value = "utf-8")]
    pub request_charset: String,

    #[arg(long, value_name = "AGENT")]
    pub user_agent: Option<String>,

    /// Connect directly, ignoring proxy environment variables.
    #[arg(long)]
    pub no_proxy: bool,

    /// Print the status line and headers before the body.
    #[arg(short = 'i', long)]
    pub include: bool,

    /// Verbose logging (ignored when RUST_LOG is set).
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout_ms: self.connect_timeout_ms,
            timeout_ms: self.timeout_ms,
            default_charset: self.charset.clone(),
            request_charset: self.request_charset.clone(),
            user_agent: self.user_agent.clone(),
            no_proxy: self.no_proxy,
        }
    }

    pub async fn run(self) -> Result<()> {
        let client = HttpClient::new(self.config()).context("building client")?;
        let params: ParameterSet = self.params.into_iter().collect();
        let headers: HeaderSet = self.headers.into_iter().collect();

        let (tx, mut rx) = oneshot::channel();
        let handle = client.dispatch(self.url, self.method, params, headers, move |result| {
            let _ = tx.send(result);
        });

        let delivered = tokio::select! {
            delivered = &mut rx => delivered,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, cancelling");
                handle.cancel();
                rx.await
            }
        };
        let response = delivered.context("dispatch task ended without a result")??;
        print_response(&response, self.include);
        Ok(())
    }
}

fn print_response(response: &Response, include: bool) {
    if include {
        println!("{} {}", response.status(), response.status_text());
        for (name, value) in response.headers().iter() {
            println!("{}: {}", name, value);
        }
        println!();
    }
    print!("{}", response.data());
}

fn parse_param(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s.split_once('=').unwrap_or((s, ""));
    if name.is_empty() {
        return Err(format!("missing parameter name in {:?}", s));
    }
    Ok((name.to_string(), value.to_string()))
}

fn parse_header(s: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("expected NAME:VALUE, got {:?}", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing header name in {:?}", s));
    }
    Ok((name.to_string(), value.trim().to_string()))
}
