use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use log::{debug, info};

/// Controls the injection of the custom CA bundle in PEM format.
pub const INJECT_PEM: &str = "custompki.openshift.io/inject-pem";
/// Where the generated PEM bundle is mounted in the workload containers.
pub const INJECT_PEM_PATH: &str = "custompki.openshift.io/inject-pem-path";
/// Controls the injection of the custom CA bundle as a Java keystore.
pub const INJECT_JKS: &str = "custompki.openshift.io/inject-jks";
/// Where the generated keystore is mounted in the workload containers.
pub const INJECT_JKS_PATH: &str = "custompki.openshift.io/inject-jks-path";
/// Image used by the injected init containers.
pub const IMAGE: &str = "custompki.openshift.io/image";
/// ConfigMap holding the custom CA bundle.
pub const CONFIG_MAP: &str = "custompki.openshift.io/configmap";
/// Regex matched against certificate owners before a JKS import.
pub const REGEX_CN: &str = "custompki.openshift.io/regex-cn";

pub const DEFAULT_PEM_PATH: &str = "/etc/pki/ca-trust/extracted/pem";
pub const DEFAULT_JKS_PATH: &str = "/etc/pki/ca-trust/extracted/java";
pub const DEFAULT_IMAGE: &str = "registry.redhat.io/ubi8/openjdk-11";
pub const DEFAULT_CONFIG_MAP: &str = "custom-ca";
pub const DEFAULT_CN_FILTER: &str = ".*";
pub const CONFIG_MAP_KEY: &str = "ca-bundle.crt";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("annotation {key} must be a boolean, got {value:?}")]
    InvalidFlag { key: &'static str, value: String },
    #[error("annotation {key} must be an absolute path, got {value:?}")]
    RelativeMountPath { key: &'static str, value: String },
}

/// Effective injection settings for a single Pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectionConfig {
    pub inject_pem: bool,
    pub inject_jks: bool,
    pub image: String,
    pub config_map_name: String,
    pub config_map_key: String,
    pub pem_mount_path: String,
    pub jks_mount_path: String,
    pub cn_filter: String,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        InjectionConfig {
            inject_pem: false,
            inject_jks: false,
            image: DEFAULT_IMAGE.to_string(),
            config_map_name: DEFAULT_CONFIG_MAP.to_string(),
            config_map_key: CONFIG_MAP_KEY.to_string(),
            pem_mount_path: DEFAULT_PEM_PATH.to_string(),
            jks_mount_path: DEFAULT_JKS_PATH.to_string(),
            cn_filter: DEFAULT_CN_FILTER.to_string(),
        }
    }
}

impl InjectionConfig {
    pub fn injects(&self) -> bool {
        self.inject_pem || self.inject_jks
    }
}

/// Parses a boolean the way Kubernetes tooling spells them.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// `Ok(None)` when the flag is absent, `Err` when it is present but unreadable.
fn flag(
    annotations: &BTreeMap<String, String>,
    key: &'static str,
) -> Result<Option<bool>, ConfigError> {
    let Some(value) = annotations.get(key) else {
        return Ok(None);
    };
    parse_bool(value)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidFlag {
            key,
            value: value.clone(),
        })
}

fn setting(annotations: &BTreeMap<String, String>, key: &str, default: &str) -> String {
    match annotations.get(key).map(|x| x.trim()) {
        Some(value) if !value.is_empty() => value.to_string(),
        _ => default.to_string(),
    }
}

fn mount_path(
    annotations: &BTreeMap<String, String>,
    key: &'static str,
    default: &str,
) -> Result<String, ConfigError> {
    let path = setting(annotations, key, default);
    if !path.starts_with('/') {
        return Err(ConfigError::RelativeMountPath { key, value: path });
    }
    Ok(path)
}

/// Derives the injection settings from the Pod annotations, falling back to
/// the defaults for anything the Pod leaves unset.
pub fn resolve(pod: &Pod) -> Result<InjectionConfig, ConfigError> {
    let Some(annotations) = pod.metadata.annotations.as_ref() else {
        return Ok(InjectionConfig::default());
    };
    let name = pod.name_any();

    let inject_pem = flag(annotations, INJECT_PEM)?;
    if let Some(value) = inject_pem {
        info!("pod {name} -> inject-pem: {value}");
    }
    let inject_jks = flag(annotations, INJECT_JKS)?;
    if let Some(value) = inject_jks {
        info!("pod {name} -> inject-jks: {value}");
    }

    let inject_pem = inject_pem.unwrap_or_default();
    let inject_jks = inject_jks.unwrap_or_default();
    if !inject_pem && !inject_jks {
        return Ok(InjectionConfig::default());
    }

    let config = InjectionConfig {
        inject_pem,
        inject_jks,
        image: setting(annotations, IMAGE, DEFAULT_IMAGE),
        config_map_name: setting(annotations, CONFIG_MAP, DEFAULT_CONFIG_MAP),
        config_map_key: CONFIG_MAP_KEY.to_string(),
        pem_mount_path: mount_path(annotations, INJECT_PEM_PATH, DEFAULT_PEM_PATH)?,
        jks_mount_path: if inject_jks {
            mount_path(annotations, INJECT_JKS_PATH, DEFAULT_JKS_PATH)?
        } else {
            DEFAULT_JKS_PATH.to_string()
        },
        cn_filter: setting(annotations, REGEX_CN, DEFAULT_CN_FILTER),
    };
    debug!("pod {name} resolved injection config: {config:?}");
    Ok(config)
}
