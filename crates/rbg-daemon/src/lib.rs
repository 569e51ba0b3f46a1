//! RBG Daemon - hosts the controller loops over an object store
//!
//! Startup order: schema probe, manifest seeding, then the controller
//! manager until a shutdown signal arrives.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod manifests;

pub use config::{DaemonConfig, LoggingConfig};
pub use error::{DaemonError, DaemonResult};

use rbg_controller::ControllerManager;
use rbg_store::{verify_schemas, BroadcastRecorder, Client, StaticSchemaProbe};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;

/// Probe schemas, seed the store and run the controllers until `shutdown`
/// resolves
pub async fn run<F>(config: DaemonConfig, client: Client, shutdown: F) -> DaemonResult<()>
where
    F: Future<Output = ()> + Send,
{
    let probe = StaticSchemaProbe::new(config.registered_schemas.iter().cloned());
    let missing = verify_schemas(&probe).await?;
    if !missing.is_empty() {
        tracing::warn!(?missing, "Optional workload kinds unavailable");
    }

    if let Some(dir) = &config.manifests {
        manifests::load_dir(&client, Path::new(dir))
            .await
            .map_err(DaemonError::Manifest)?;
    }

    let manager = ControllerManager::new(
        client,
        Arc::new(BroadcastRecorder::default()),
        config.controller.clone(),
    );
    let running = manager.run();
    tokio::pin!(running);
    tokio::pin!(shutdown);
    tokio::select! {
        result = &mut running => result?,
        _ = &mut shutdown => {
            tracing::info!("Shutdown requested");
            manager.shutdown();
            running.await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbg_store::REQUIRED_SCHEMAS;

    #[tokio::test]
    async fn test_missing_required_schema_aborts() {
        let config = DaemonConfig {
            registered_schemas: REQUIRED_SCHEMAS[1..].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let err = run(config, Client::in_memory(), async {}).await.unwrap_err();
        assert!(matches!(err, DaemonError::Schema(_)));
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let config = DaemonConfig::default();
        run(config, Client::in_memory(), tokio::time::sleep(std::time::Duration::from_millis(50)))
            .await
            .unwrap();
    }
}
