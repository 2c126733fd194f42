//! AKO operator entrypoint

use std::sync::Arc;

use clap::Parser;
use kube::{Client, CustomResourceExt};

use ako::config::AkoConfig;
use ako::crd::{AviInfraSetting, HTTPRule, HostRule};

/// AKO - Avi Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "ako", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> ako::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for crd in [
            serde_yaml::to_string(&HostRule::crd()),
            serde_yaml::to_string(&HTTPRule::crd()),
            serde_yaml::to_string(&AviInfraSetting::crd()),
        ] {
            let doc = crd.map_err(|e| ako::Error::serialization(e.to_string()))?;
            println!("---\n{doc}");
        }
        return Ok(());
    }

    let log_handle = ako::telemetry::init_telemetry()
        .map_err(|e| ako::Error::config(format!("telemetry init failed: {e}")))?;

    tracing::info!("AKO starting");
    let cfg = Arc::new(AkoConfig::from_env()?);

    let client = Client::try_default().await.map_err(|e| {
        ako::Error::config(format!("failed to create Kubernetes client: {e}"))
    })?;

    let api_server = ako::api_server::start(cfg.api_port).await?;

    ako::lifecycle::run(cfg, client, log_handle, api_server).await
}
