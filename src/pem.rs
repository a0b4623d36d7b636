use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EmptyDirVolumeSource, KeyToPath, Volume, VolumeMount,
};

use crate::{annotations::InjectionConfig, inject::PodPatcher};

pub const GENERATED_VOLUME: &str = "generated-pem";
pub const CUSTOM_VOLUME: &str = "custom-pem";
pub const INIT_CONTAINER_NAME: &str = "generate-pem-truststore";
/// File name of the merged bundle, as found under the PEM mount path.
const BUNDLE_FILE: &str = "tls-ca-bundle.pem";

const GENERATED_DIR: &str = "/generated";
pub const CUSTOM_DIR: &str = "/custom";
/// Path of the custom bundle inside the ConfigMap volume.
pub const CUSTOM_FILE: &str = "ca-bundle.crt";
/// Bundle shipped by the init container image.
const SYSTEM_BUNDLE: &str = "/etc/pki/ca-trust/extracted/pem/tls-ca-bundle.pem";
const READ_ONLY_MODE: i32 = 0o400;

/// The ConfigMap volume carrying the custom CA bundle.
pub fn custom_volume(config: &InjectionConfig) -> Volume {
    Volume {
        name: CUSTOM_VOLUME.to_string(),
        config_map: Some(ConfigMapVolumeSource {
            name: Some(config.config_map_name.clone()),
            items: Some(vec![KeyToPath {
                key: config.config_map_key.clone(),
                path: CUSTOM_FILE.to_string(),
                mode: Some(READ_ONLY_MODE),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn custom_mount() -> VolumeMount {
    VolumeMount {
        name: CUSTOM_VOLUME.to_string(),
        mount_path: CUSTOM_DIR.to_string(),
        read_only: Some(true),
        ..Default::default()
    }
}

/// Concatenates the system and custom bundles, keeping each certificate once.
/// Certificates are keyed on the PEM block alone, ignoring comment lines in
/// front of it. Read-only outputs of an earlier run are removed first.
fn merge_script() -> String {
    format!(
        r#"rm -f {GENERATED_DIR}/base.pem {GENERATED_DIR}/custom.pem {GENERATED_DIR}/{BUNDLE_FILE} && \
cp {SYSTEM_BUNDLE} {GENERATED_DIR}/base.pem && \
cp {CUSTOM_DIR}/{CUSTOM_FILE} {GENERATED_DIR}/custom.pem && \
awk 'BEGIN {{RS="-----END CERTIFICATE-----"}} {{sub(/^[ \t\r\n]+/, ""); k=$0; sub(/^.*-----BEGIN CERTIFICATE-----/, "-----BEGIN CERTIFICATE-----", k)}} /-----BEGIN CERTIFICATE-----/ {{if (!seen[k]++) print $0 RS}}' {GENERATED_DIR}/base.pem {GENERATED_DIR}/custom.pem > {GENERATED_DIR}/{BUNDLE_FILE} && \
rm -f {GENERATED_DIR}/base.pem {GENERATED_DIR}/custom.pem && \
chmod 444 {GENERATED_DIR}/{BUNDLE_FILE}"#
    )
}

fn init_container(config: &InjectionConfig) -> Container {
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(config.image.clone()),
        command: Some(vec!["sh".to_string(), "-xc".to_string(), merge_script()]),
        volume_mounts: Some(vec![
            VolumeMount {
                name: GENERATED_VOLUME.to_string(),
                mount_path: GENERATED_DIR.to_string(),
                ..Default::default()
            },
            custom_mount(),
        ]),
        ..Default::default()
    }
}

/// Mounts the merged PEM bundle at the configured path of every container.
pub fn inject(patcher: &mut PodPatcher, config: &InjectionConfig) {
    patcher.add_volume(Volume {
        name: GENERATED_VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });
    patcher.add_volume(custom_volume(config));

    let mount = VolumeMount {
        name: GENERATED_VOLUME.to_string(),
        mount_path: config.pem_mount_path.clone(),
        read_only: Some(true),
        ..Default::default()
    };
    patcher.mount_containers(&mount);
    patcher.mount_init_containers(&mount);
    patcher.add_init_container(init_container(config));
}
