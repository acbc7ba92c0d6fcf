//! statusphere-store entry point.
//!
//! Connects to PostgreSQL using `STATUSPHERE_POSTGRES_*`, ensures the
//! database, namespace and tables exist, and reports what is stored.

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use statusphere_store::StoreClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let client = StoreClient::from_env()
        .await
        .context("failed to initialise store client")?;

    client
        .auto_migrate()
        .await
        .context("failed to migrate schema")?;

    let pages = client
        .get_all_status_pages()
        .await
        .context("failed to list status pages")?;
    tracing::info!(
        namespace = client.namespace(),
        status_pages = pages.len(),
        "store ready"
    );

    client.close().await;
    Ok(())
}
