mod wordcount;
mod worker;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("worker=debug,committer=debug,reqwest=info")),
        )
        .init();

    worker::run().await
}
