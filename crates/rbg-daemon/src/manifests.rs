//! Seed the store from a directory of YAML manifests

use anyhow::{bail, Context};
use rbg_store::Client;
use rbg_types::{EngineRuntimeProfile, RoleGroup, RoleGroupSet, ScalingAdapter};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// One YAML document, dispatched on its `kind`
#[derive(Debug, Deserialize)]
#[serde(tag = "kind")]
pub enum Manifest {
    #[serde(alias = "RoleBasedGroup")]
    RoleGroup(RoleGroup),
    #[serde(alias = "RoleBasedGroupSet")]
    RoleGroupSet(RoleGroupSet),
    #[serde(alias = "RoleBasedGroupScalingAdapter")]
    ScalingAdapter(ScalingAdapter),
    #[serde(alias = "ClusterEngineRuntimeProfile")]
    EngineRuntimeProfile(EngineRuntimeProfile),
}

/// Parse every document in a multi-document YAML string
pub fn parse(source: &str) -> anyhow::Result<Vec<Manifest>> {
    let mut manifests = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(source).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("document {index} is not valid YAML"))?;
        if value.is_null() {
            continue;
        }
        let manifest = serde_yaml::from_value(value)
            .with_context(|| format!("document {index} is not a known object"))?;
        manifests.push(manifest);
    }
    Ok(manifests)
}

/// Create the objects of every `.yaml`/`.yml` file in `dir`, in file name order
pub async fn load_dir(client: &Client, dir: &Path) -> anyhow::Result<usize> {
    if !dir.is_dir() {
        bail!("{} is not a directory", dir.display());
    }
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
        .collect();
    paths.sort();

    let mut count = 0;
    for path in paths {
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        for manifest in parse(&source).with_context(|| format!("parsing {}", path.display()))? {
            apply(client, manifest)
                .await
                .with_context(|| format!("applying {}", path.display()))?;
            count += 1;
        }
    }
    info!(dir = %dir.display(), objects = count, "Loaded manifests");
    Ok(count)
}

async fn apply(client: &Client, manifest: Manifest) -> anyhow::Result<()> {
    match manifest {
        Manifest::RoleGroup(o) => client.groups.create(o).await.map(drop)?,
        Manifest::RoleGroupSet(o) => client.sets.create(o).await.map(drop)?,
        Manifest::ScalingAdapter(o) => client.adapters.create(o).await.map(drop)?,
        Manifest::EngineRuntimeProfile(o) => client.profiles.create(o).await.map(drop)?,
    }
    Ok(())
}
