use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, Volume, VolumeMount};

use crate::{
    annotations::InjectionConfig,
    inject::PodPatcher,
    pem::{self, CUSTOM_DIR, CUSTOM_FILE},
};

pub const VOLUME: &str = "trusted-ca-jks";
pub const INIT_CONTAINER_NAME: &str = "generate-jks-truststore";

const JKS_DIR: &str = "/jks";
/// Keystore shipped by the init container image.
const SYSTEM_KEYSTORE: &str = "/etc/pki/ca-trust/extracted/java/cacerts";
const STORE_PASS: &str = "changeit";

/// Single-quotes `value` for `sh`.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Splits the custom bundle and imports every certificate whose owner matches
/// `cn_filter` into a copy of the image keystore. A keystore left read-only by
/// an earlier run is removed first.
fn import_script(cn_filter: &str) -> String {
    let filter = shell_quote(cn_filter);
    format!(
        r#"rm -f {JKS_DIR}/cacerts && \
cp {SYSTEM_KEYSTORE} {JKS_DIR}/cacerts && \
chmod 644 {JKS_DIR}/cacerts && \
mkdir -p /tmp/certs && \
csplit -s -z -f /tmp/certs/crt- {CUSTOM_DIR}/{CUSTOM_FILE} '/-----BEGIN CERTIFICATE-----/' '{{*}}' && \
for file in /tmp/certs/crt-*; do
  if keytool -printcert -file "$file" | grep -i '^Owner:' | grep -E -i -q -e {filter}; then
    echo "Importing $file" && \
    keytool -noprompt -importcert -trustcacerts -file "$file" -alias "custom-$(basename "$file")" -keystore {JKS_DIR}/cacerts -storepass {STORE_PASS} || exit 1
  else
    echo "Skipping $file"
  fi
done && \
chmod 444 {JKS_DIR}/cacerts"#
    )
}

fn init_container(config: &InjectionConfig) -> Container {
    Container {
        name: INIT_CONTAINER_NAME.to_string(),
        image: Some(config.image.clone()),
        command: Some(vec![
            "sh".to_string(),
            "-xc".to_string(),
            import_script(&config.cn_filter),
        ]),
        volume_mounts: Some(vec![
            pem::custom_mount(),
            VolumeMount {
                name: VOLUME.to_string(),
                mount_path: JKS_DIR.to_string(),
                ..Default::default()
            },
        ]),
        ..Default::default()
    }
}

/// Mounts a keystore holding the custom CAs at the configured path of every
/// container. Declares the custom bundle volume itself when PEM injection did not.
pub fn inject(patcher: &mut PodPatcher, config: &InjectionConfig) {
    patcher.add_volume(Volume {
        name: VOLUME.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    });
    patcher.add_volume(pem::custom_volume(config));

    let mount = VolumeMount {
        name: VOLUME.to_string(),
        mount_path: config.jks_mount_path.clone(),
        read_only: Some(true),
        ..Default::default()
    };
    patcher.mount_containers(&mount);
    patcher.mount_init_containers(&mount);
    patcher.add_init_container(init_container(config));
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::Pod;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote(".*"), "'.*'");
        assert_eq!(shell_quote("CN=O'Brien"), r#"'CN=O'"'"'Brien'"#);
    }

    #[test]
    fn test_import_script_filters_owner() {
        let script = import_script("Acme (Root|Issuing) CA");
        assert!(script.contains("grep -E -i -q -e 'Acme (Root|Issuing) CA'"));
        assert!(script.contains("csplit -s -z -f /tmp/certs/crt- /custom/ca-bundle.crt"));
        assert!(script.contains("'{*}'"));
        assert!(script.contains("-keystore /jks/cacerts -storepass changeit"));
        assert!(script.starts_with("rm -f /jks/cacerts && \\\ncp "));
        assert!(script.ends_with("chmod 444 /jks/cacerts"));
    }

    #[test]
    fn test_standalone_declares_bundle_volume() {
        let config = InjectionConfig {
            inject_jks: true,
            ..Default::default()
        };
        let pod: Pod = serde_json::from_value(json!({
            "metadata": {"name": "web"},
            "spec": {"containers": [{"name": "web"}]},
        }))
        .unwrap();
        let mut patcher = PodPatcher::new(&pod);
        inject(&mut patcher, &config);
        let patches = patcher.into_patches();

        let paths: Vec<_> = patches.iter().map(|x| &*x.path).collect();
        assert_eq!(
            paths,
            vec![
                "/spec/volumes",
                "/spec/volumes/-",
                "/spec/containers/0/volumeMounts",
                "/spec/initContainers",
            ]
        );
        assert_eq!(
            serde_json::to_value(&patches[1].value).unwrap()["name"],
            json!("custom-pem")
        );
        assert_eq!(
            serde_json::to_value(&patches[2].value).unwrap(),
            json!([{
                "name": "trusted-ca-jks",
                "mountPath": "/etc/pki/ca-trust/extracted/java",
                "readOnly": true,
            }])
        );
        let init = serde_json::to_value(&patches[3].value).unwrap();
        assert_eq!(init[0]["name"], json!("generate-jks-truststore"));
        assert_eq!(
            init[0]["image"],
            json!("registry.redhat.io/ubi8/openjdk-11")
        );
        assert_eq!(
            init[0]["volumeMounts"],
            json!([
                {"name": "custom-pem", "mountPath": "/custom", "readOnly": true},
                {"name": "trusted-ca-jks", "mountPath": "/jks"},
            ])
        );
    }
}
