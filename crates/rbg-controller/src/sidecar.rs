//! Engine runtime sidecar injection

use crate::error::{ReconcileError, Result};
use rbg_types::{Container, EngineRuntimeProfile, PodTemplateSpec, RoleSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Append each referenced profile's init containers, containers and volumes.
///
/// Entries whose names already exist in the template are skipped. Role
/// overrides append env and args to the profile container of the same name.
pub fn inject_sidecars(
    template: &mut PodTemplateSpec,
    role: &RoleSpec,
    profiles: &BTreeMap<String, EngineRuntimeProfile>,
) -> Result<()> {
    for runtime in &role.engine_runtimes {
        let profile = profiles
            .get(&runtime.profile_name)
            .ok_or_else(|| ReconcileError::ProfileNotFound(runtime.profile_name.clone()))?;

        let spec = &mut template.spec;
        for init in &profile.spec.init_containers {
            if !spec.init_containers.iter().any(|c| c.name == init.name) {
                spec.init_containers.push(init.clone());
            }
        }
        for container in &profile.spec.containers {
            if spec.containers.iter().any(|c| c.name == container.name) {
                debug!(role = %role.name, container = %container.name, "Sidecar already present");
                continue;
            }
            let mut sidecar = container.clone();
            if let Some(overrides) = runtime.containers.iter().find(|c| c.name == container.name) {
                apply_override(&mut sidecar, overrides);
            }
            spec.containers.push(sidecar);
        }
        for volume in &profile.spec.volumes {
            if !spec.volumes.iter().any(|v| v.name == volume.name) {
                spec.volumes.push(volume.clone());
            }
        }
    }
    Ok(())
}

fn apply_override(target: &mut Container, overrides: &Container) {
    target.env.extend(overrides.env.iter().cloned());
    target.args.extend(overrides.args.iter().cloned());
}

#[cfg(test)]
mod tests {
    use super::*;
    use rbg_types::{EngineRuntime, EnvVar, ObjectMeta, Volume, VolumeSource};

    fn profile() -> EngineRuntimeProfile {
        let mut profile = EngineRuntimeProfile {
            metadata: ObjectMeta::named("", "patio"),
            ..Default::default()
        };
        profile.spec.init_containers = vec![Container::new("init-patio", "patio:1")];
        profile.spec.containers = vec![
            Container::new("patio-runtime", "patio:1"),
            Container::new("main", "ignored:1"),
        ];
        profile.spec.volumes = vec![Volume {
            name: "patio-scratch".into(),
            source: VolumeSource::EmptyDir {},
        }];
        profile
    }

    fn role() -> RoleSpec {
        let mut role = RoleSpec::new("worker", 1);
        role.template.spec.containers = vec![Container::new("main", "engine:1")];
        let mut overrides = Container::new("patio-runtime", "");
        overrides.env = vec![EnvVar::value("TOPO", "ring")];
        overrides.args = vec!["--verbose".into()];
        role.engine_runtimes = vec![EngineRuntime {
            profile_name: "patio".into(),
            containers: vec![overrides],
        }];
        role
    }

    #[test]
    fn test_injects_and_skips_duplicates() {
        let role = role();
        let profiles = BTreeMap::from([("patio".to_string(), profile())]);
        let mut template = role.template.clone();
        inject_sidecars(&mut template, &role, &profiles).unwrap();

        let names: Vec<_> = template.spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["main", "patio-runtime"]);
        assert_eq!(template.spec.containers[0].image, "engine:1");
        assert_eq!(template.spec.init_containers.len(), 1);
        assert_eq!(template.spec.volumes.len(), 1);

        let sidecar = &template.spec.containers[1];
        assert_eq!(sidecar.env, vec![EnvVar::value("TOPO", "ring")]);
        assert_eq!(sidecar.args, vec!["--verbose".to_string()]);

        // Idempotent on a second pass
        let before = template.clone();
        inject_sidecars(&mut template, &role, &profiles).unwrap();
        assert_eq!(template, before);
    }

    #[test]
    fn test_missing_profile() {
        let role = role();
        let mut template = role.template.clone();
        let err = inject_sidecars(&mut template, &role, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, ReconcileError::ProfileNotFound(name) if name == "patio"));
    }
}
