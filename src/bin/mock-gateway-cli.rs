use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::StatusCode;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "mock-gateway-cli")]
#[command(about = "Inspect and clear the request history of a running mock gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:2200")]
    url: String,

    /// Admin API key, sent as a bearer token.
    #[arg(short, long, env = "MOCK_GATEWAY_API_KEY")]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check gateway liveness and storage backend
    Health,
    /// List configured services
    Services,
    /// Show the recorded history of a service
    History { service: String },
    /// Clear the recorded history of a service
    Clear { service: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    if let Some(key) = &cli.key {
        headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {key}"))?);
    }

    let res = match &cli.command {
        Commands::Health => client.get(format!("{base}/healthz")),
        Commands::Services => client.get(format!("{base}/.services")),
        Commands::History { service } => client.get(format!("{base}/.services/{service}/history")),
        Commands::Clear { service } => client.delete(format!("{base}/.services/{service}/history")),
    }
    .headers(headers)
    .send()
    .await?;

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> anyhow::Result<()> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: gateway returned status {status}");
        if let Ok(text) = res.text().await {
            eprintln!("Response: {text}");
        }
        std::process::exit(1);
    }
    if status == StatusCode::NO_CONTENT {
        println!("ok");
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mock_gateway::config::ListenerConfig;

    #[test]
    fn test_default_url_targets_default_bind_port() {
        let cli = Cli::try_parse_from(["mock-gateway-cli", "health"]).unwrap();
        let url = url::Url::parse(&cli.url).unwrap();
        let bind: std::net::SocketAddr = ListenerConfig::default().bind_address.parse().unwrap();
        assert_eq!(url.port(), Some(bind.port()));
    }
}
