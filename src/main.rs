use rmcp::{ServiceExt, transport::stdio};

use accu::config::Config;
use accu::server::AccuServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    // MCP servers may start with any CWD: prefer a .env beside the binary,
    // then the cargo project root (target/<profile>/../..), then dotenvy's CWD search.
    let beside_binary = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.to_path_buf()))
        .into_iter()
        .flat_map(|dir| [dir.join(".env"), dir.join("../../.env")])
        .find(|path| path.exists());
    match beside_binary {
        Some(path) => {
            dotenvy::from_path(&path).ok();
        }
        None => {
            dotenvy::dotenv().ok();
        }
    }

    tracing::info!("accu starting");

    let config = Config::load()?;
    let server = AccuServer::new(config)?;

    let service = server
        .serve(stdio())
        .await
        .inspect_err(|e| tracing::error!("serving error: {e:?}"))?;

    service.waiting().await?;

    tracing::info!("accu shutting down");
    Ok(())
}
