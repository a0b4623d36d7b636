use k8s_openapi::api::core::v1::{Container, Pod, Volume, VolumeMount};

use crate::{
    annotations::InjectionConfig,
    jks,
    patch::{PatchValue, PodPatch},
    pem,
};

/// Init containers added by the injector. They never receive the workload mounts.
const INJECTED_INIT_CONTAINERS: [&str; 2] = [pem::INIT_CONTAINER_NAME, jks::INIT_CONTAINER_NAME];

struct ContainerView {
    name: String,
    mounts: Vec<String>,
}

impl ContainerView {
    fn new(container: &Container) -> Self {
        ContainerView {
            name: container.name.clone(),
            mounts: container
                .volume_mounts
                .iter()
                .flatten()
                .map(|x| x.name.clone())
                .collect(),
        }
    }
}

/// Tracks the Pod spec as the emitted patches will leave it, so every
/// operation is computed against the effect of the ones before it.
pub struct PodPatcher {
    volumes: Vec<String>,
    containers: Vec<ContainerView>,
    init_containers: Vec<ContainerView>,
    patches: Vec<PodPatch>,
}

impl PodPatcher {
    pub fn new(pod: &Pod) -> Self {
        let spec = pod.spec.as_ref();
        PodPatcher {
            volumes: spec
                .and_then(|x| x.volumes.as_ref())
                .into_iter()
                .flatten()
                .map(|x| x.name.clone())
                .collect(),
            containers: spec
                .map(|x| x.containers.iter().map(ContainerView::new).collect())
                .unwrap_or_default(),
            init_containers: spec
                .and_then(|x| x.init_containers.as_ref())
                .into_iter()
                .flatten()
                .map(ContainerView::new)
                .collect(),
            patches: vec![],
        }
    }

    pub fn has_volume(&self, name: &str) -> bool {
        self.volumes.iter().any(|x| x == name)
    }

    pub fn add_volume(&mut self, volume: Volume) {
        if self.has_volume(&volume.name) {
            return;
        }
        self.volumes.push(volume.name.clone());
        self.patches.push(PodPatch::append(
            "/spec/volumes".to_string(),
            self.volumes.len() - 1,
            volume,
            PatchValue::Volume,
            PatchValue::Volumes,
        ));
    }

    /// Mounts into every workload container.
    pub fn mount_containers(&mut self, mount: &VolumeMount) {
        for (idx, container) in self.containers.iter_mut().enumerate() {
            if let Some(patch) = mount_into(container, mount, format!("/spec/containers/{idx}")) {
                self.patches.push(patch);
            }
        }
    }

    /// Mounts into every init container the injector does not own.
    pub fn mount_init_containers(&mut self, mount: &VolumeMount) {
        for (idx, container) in self.init_containers.iter_mut().enumerate() {
            if INJECTED_INIT_CONTAINERS.contains(&&*container.name) {
                continue;
            }
            if let Some(patch) =
                mount_into(container, mount, format!("/spec/initContainers/{idx}"))
            {
                self.patches.push(patch);
            }
        }
    }

    pub fn add_init_container(&mut self, container: Container) {
        if self.init_containers.iter().any(|x| x.name == container.name) {
            return;
        }
        let len = self.init_containers.len();
        self.init_containers.push(ContainerView::new(&container));
        self.patches.push(PodPatch::append(
            "/spec/initContainers".to_string(),
            len,
            container,
            PatchValue::Container,
            PatchValue::Containers,
        ));
    }

    pub fn into_patches(self) -> Vec<PodPatch> {
        self.patches
    }
}

fn mount_into(
    container: &mut ContainerView,
    mount: &VolumeMount,
    container_path: String,
) -> Option<PodPatch> {
    if container.mounts.contains(&mount.name) {
        return None;
    }
    let len = container.mounts.len();
    container.mounts.push(mount.name.clone());
    Some(PodPatch::append(
        format!("{container_path}/volumeMounts"),
        len,
        mount.clone(),
        PatchValue::VolumeMount,
        PatchValue::VolumeMounts,
    ))
}

/// Builds the patches injecting the trust stores `config` asks for.
/// The keystore is always built on top of the PEM injection.
pub fn synthesize(pod: &Pod, config: &InjectionConfig) -> Vec<PodPatch> {
    let mut patcher = PodPatcher::new(pod);
    if config.inject_jks {
        pem::inject(&mut patcher, config);
        jks::inject(&mut patcher, config);
    } else if config.inject_pem {
        pem::inject(&mut patcher, config);
    }
    patcher.into_patches()
}
