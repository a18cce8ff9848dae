use std::sync::Arc;

use anyhow::{Context, Result};
use prometheus_client::registry::Registry;
use tracing::{error, info};

use kco::config::{BUILD_DATE, COMMIT, Command, Config, VERSION};
use kco::logging;
use kco::metrics::{self, Metrics};
use kco::remote::OpenSshShell;
use kco::store::InventoryStore;
use kco::worker::{self, WorkerContext};

#[tokio::main]
async fn main() {
    let config = Config::from_args();
    logging::init(config.log_format, &config.log_level);

    info!(
        version = VERSION,
        commit = COMMIT,
        build_date = BUILD_DATE,
        "kco starting"
    );
    config.display();

    if let Err(e) = run(config).await {
        let message = format!("{e:#}");
        error!(error = %message, "Operation failed");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let store = Arc::new(
        InventoryStore::open(&config.inventory)
            .await
            .with_context(|| format!("Failed to open inventory {}", config.inventory.display()))?,
    );

    let mut registry = Registry::default();
    let metrics = Metrics::new(&mut registry);
    let ctx = WorkerContext::with_inventory(
        store,
        Arc::new(OpenSshShell::new()),
        config.operation_settings(),
        metrics,
    );

    let cluster_id = config.command.cluster_id();
    let outcome = match &config.command {
        Command::Create { .. } => worker::create::execute(&ctx, cluster_id).await,
        Command::Scale { size, .. } => worker::scale::execute(&ctx, cluster_id, *size).await,
        Command::Upgrade { version, .. } => {
            worker::upgrade::execute(&ctx, cluster_id, version).await
        }
        Command::Delete { .. } => worker::delete::execute(&ctx, cluster_id).await,
    };

    if let Some(path) = &config.metrics_textfile {
        if let Err(e) = metrics::write_textfile(&registry, path).await {
            error!(path = %path.display(), error = %e, "Failed to write metrics textfile");
        }
    }

    let cluster = outcome?;
    info!(
        cluster = %cluster,
        state = %cluster.state(),
        version_id = %cluster.kubernetes_version_id,
        node_count = cluster.total_node_count(),
        "Operation completed"
    );
    Ok(())
}
