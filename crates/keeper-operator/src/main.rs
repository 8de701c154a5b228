//! Keeper - runs repository checks and volume backups as Kubernetes jobs

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;

use keeper_common::crd::all_crds;
use keeper_common::telemetry::{init_telemetry, TelemetryConfig};
use keeper_common::{OperatorConfig, FIELD_MANAGER};
use keeper_operator::controller_runner::build_controllers;

/// Keeper - scheduled repository checks and volume backups
#[derive(Parser, Debug)]
#[command(name = "keeper", version, about, long_about = None)]
struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    crd: bool,

    /// Emit human-readable logs instead of JSON
    #[arg(long, env = "KEEPER_LOG_TEXT")]
    log_text: bool,

    /// Do not install CRDs on startup
    #[arg(long, env = "KEEPER_SKIP_CRD_INSTALL")]
    skip_crd_install: bool,

    #[command(flatten)]
    config: OperatorConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let docs = all_crds()
            .iter()
            .map(serde_yaml::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRDs: {}", e))?;
        println!("{}", docs.join("---\n"));
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        json: !cli.log_text,
    })?;

    let client = Client::try_default().await?;
    if !cli.skip_crd_install {
        ensure_crds_installed(&client).await?;
    }

    tracing::info!(
        var_dir = %cli.config.var_dir,
        image = %cli.config.executor_image,
        merge_policy = ?cli.config.env_merge_policy,
        "starting controllers"
    );
    let controllers = build_controllers(client, Arc::new(cli.config));
    futures::future::join_all(controllers).await;

    tracing::info!("controllers stopped");
    Ok(())
}

/// Install or update every Keeper CRD with server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        tracing::info!(crd = %name, "installing CRD");
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
    }
    Ok(())
}
