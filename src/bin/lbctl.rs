use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::{json, Value};
use tcp_balancer::{ServerId, StrategyKind};

#[derive(Parser)]
#[command(name = "lbctl")]
#[command(about = "Management CLI for the TCP load balancer", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://127.0.0.1:9090")]
    url: String,

    /// Admin API key, if the balancer requires one.
    #[arg(short, long, env = "LBCTL_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Running state, strategy and server counts
    Status,
    /// Per-server health and connections
    Servers,
    /// Request statistics
    Performance,
    /// Metrics of the active strategy
    Metrics,
    /// Switch the active strategy
    Strategy { name: StrategyKind },
    /// Manually disable or re-enable a server
    Toggle { server: ServerId },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    }
    let client = reqwest::Client::builder().default_headers(headers).build()?;
    let url = |path: &str| format!("{}{}", cli.url.trim_end_matches('/'), path);

    let res = match cli.command {
        Commands::Status => client.get(url("/api/status")).send().await?,
        Commands::Servers => client.get(url("/api/servers")).send().await?,
        Commands::Performance => client.get(url("/api/performance")).send().await?,
        Commands::Metrics => client.get(url("/api/algorithm-metrics")).send().await?,
        Commands::Strategy { name } => {
            client
                .post(url("/api/strategy"))
                .json(&json!({ "strategy": name.as_str() }))
                .send()
                .await?
        }
        Commands::Toggle { server } => {
            client
                .post(url("/api/servers/toggle"))
                .json(&json!({ "host": server.host, "port": server.port }))
                .send()
                .await?
        }
    };

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
