use anyhow::Result;
use clap::{Parser, Subcommand};

mod config;
#[cfg(feature = "stdio")]
mod mcp;

use config::ClientArgs;

#[derive(Parser, Debug)]
#[command(name = "wikipipe")]
#[command(about = "Wikipedia lookups over MCP (search, extracts, HTML)", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    #[command(flatten)]
    client: ClientArgs,
    /// Log filter (tracing EnvFilter syntax). Falls back to RUST_LOG, then "warn".
    #[arg(long, env = "WIKIPIPE_LOG", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run as an MCP stdio server (for Cursor / MCP clients).
    #[cfg(feature = "stdio")]
    McpStdio,
    /// Run as an MCP streamable HTTP server on `/mcp`.
    #[cfg(feature = "http")]
    McpHttp(HttpCmd),
    /// Search articles and print the hits as JSON.
    Search(SearchCmd),
    /// Print the plain-text lead section of a page.
    Extract(PageCmd),
    /// Print the full rendered HTML of a page.
    Html(PageCmd),
    /// Print version info.
    Version(VersionCmd),
}

#[cfg(feature = "http")]
#[derive(clap::Args, Debug)]
struct HttpCmd {
    /// Listen address.
    #[arg(long, env = "WIKIPIPE_HOST", default_value = "127.0.0.1")]
    host: std::net::IpAddr,
    #[arg(long, env = "WIKIPIPE_PORT", default_value_t = 3000)]
    port: u16,
    /// Accepted `Host` values (comma-separated) when rebinding protection is on.
    #[arg(
        long,
        env = "WIKIPIPE_ALLOWED_HOSTS",
        value_delimiter = ',',
        default_value = "127.0.0.1,localhost"
    )]
    allowed_hosts: Vec<String>,
    /// Accepted `Origin` values (comma-separated); `*` allows any.
    #[arg(long, env = "WIKIPIPE_ALLOWED_ORIGINS", value_delimiter = ',', default_value = "*")]
    allowed_origins: Vec<String>,
    /// Enforce the Host/Origin allow-lists (true|false|1|0).
    #[arg(
        long,
        env = "WIKIPIPE_DNS_REBINDING_PROTECTION",
        value_parser = clap::builder::BoolishValueParser::new(),
        num_args = 0..=1,
        default_value = "false",
        default_missing_value = "true"
    )]
    dns_rebinding_protection: bool,
}

#[derive(clap::Args, Debug)]
struct SearchCmd {
    query: String,
    /// Max results (clamped to 1..=50).
    #[arg(long, default_value_t = 5)]
    limit: usize,
    /// Wiki language code (default "en").
    #[arg(long)]
    lang: Option<String>,
}

#[derive(clap::Args, Debug)]
struct PageCmd {
    title: String,
    #[arg(long)]
    lang: Option<String>,
}

#[derive(clap::Args, Debug)]
struct VersionCmd {
    /// Output format: json|text
    #[arg(long = "output", alias = "format", default_value = "json")]
    output: String,
}

fn check_lang(lang: Option<&str>) -> Result<()> {
    if let Some(l) = lang {
        wikipipe_local::urls::validate_lang(l)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Opt-in; never overrides variables already exported.
    config::load_env_file();

    let cli = Cli::parse();
    config::init_tracing(cli.log_level.as_deref())?;

    match cli.command {
        #[cfg(feature = "stdio")]
        Commands::McpStdio => {
            let client = cli.client.build_client()?;
            tracing::info!(version = env!("CARGO_PKG_VERSION"), "serving MCP over stdio");
            mcp::serve_stdio(client)
                .await
                .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        }
        #[cfg(feature = "http")]
        Commands::McpHttp(args) => {
            let client = cli.client.build_client()?;
            let guard = mcp::http::HttpGuard::new(
                &args.allowed_hosts,
                &args.allowed_origins,
                args.dns_rebinding_protection,
            );
            mcp::http::serve_http(client, (args.host, args.port).into(), guard).await?;
        }
        Commands::Search(args) => {
            check_lang(args.lang.as_deref())?;
            let client = cli.client.build_client()?;
            let hits = client
                .search(&args.query, args.limit, args.lang.as_deref())
                .await;
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        Commands::Extract(args) => {
            check_lang(args.lang.as_deref())?;
            let client = cli.client.build_client()?;
            let extract = client.get_extract(&args.title, args.lang.as_deref()).await;
            if extract.is_empty() {
                anyhow::bail!("No extract found for '{}'.", args.title);
            }
            println!("{extract}");
        }
        Commands::Html(args) => {
            check_lang(args.lang.as_deref())?;
            let client = cli.client.build_client()?;
            let html = client.get_html(&args.title, args.lang.as_deref()).await?;
            println!("{html}");
        }
        Commands::Version(args) => {
            let v = serde_json::json!({
                "schema_version": 1,
                "kind": "version",
                "ok": true,
                "name": "wikipipe",
                "version": env!("CARGO_PKG_VERSION"),
            });
            match args.output.to_ascii_lowercase().as_str() {
                "text" => println!("wikipipe {}", env!("CARGO_PKG_VERSION")),
                _ => println!("{v}"),
            }
        }
    }
    Ok(())
}
