use json_patch::{AddOperation, PatchOperation};
use k8s_openapi::api::core::v1::{Container, Volume, VolumeMount};
use serde::Serialize;

/// Payload of an `add` operation against the Pod spec.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PatchValue {
    Volume(Volume),
    Volumes(Vec<Volume>),
    VolumeMount(VolumeMount),
    VolumeMounts(Vec<VolumeMount>),
    Container(Container),
    Containers(Vec<Container>),
}

/// A JSON-patch `add` emitted by the injector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PodPatch {
    pub path: String,
    pub value: PatchValue,
}

impl PodPatch {
    /// Adds `item` to the array at `base`, which currently holds `len` elements.
    /// An empty (or missing) array is created whole, otherwise the item is appended.
    pub fn append<T>(
        base: String,
        len: usize,
        item: T,
        single: fn(T) -> PatchValue,
        whole: fn(Vec<T>) -> PatchValue,
    ) -> PodPatch {
        if len == 0 {
            PodPatch {
                path: base,
                value: whole(vec![item]),
            }
        } else {
            PodPatch {
                path: format!("{base}/-"),
                value: single(item),
            }
        }
    }

    pub fn into_operation(self) -> Result<PatchOperation, serde_json::Error> {
        Ok(PatchOperation::Add(AddOperation {
            path: self.path,
            value: serde_json::to_value(self.value)?,
        }))
    }
}

pub fn into_patch(patches: Vec<PodPatch>) -> Result<json_patch::Patch, serde_json::Error> {
    Ok(json_patch::Patch(
        patches
            .into_iter()
            .map(PodPatch::into_operation)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

#[cfg(test)]
mod tests {
    use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, Volume};
    use serde_json::json;

    use super::*;

    fn scratch() -> Volume {
        Volume {
            name: "scratch".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        }
    }

    #[test]
    fn test_append_to_empty_array() {
        let patch = PodPatch::append(
            "/spec/volumes".to_string(),
            0,
            scratch(),
            PatchValue::Volume,
            PatchValue::Volumes,
        );
        assert_eq!(patch.path, "/spec/volumes");
        assert_eq!(patch.value, PatchValue::Volumes(vec![scratch()]));
    }

    #[test]
    fn test_append_to_populated_array() {
        let patch = PodPatch::append(
            "/spec/volumes".to_string(),
            2,
            scratch(),
            PatchValue::Volume,
            PatchValue::Volumes,
        );
        assert_eq!(patch.path, "/spec/volumes/-");
        assert_eq!(patch.value, PatchValue::Volume(scratch()));
    }

    #[test]
    fn test_wire_format() {
        let patch = into_patch(vec![PodPatch {
            path: "/spec/volumes".to_string(),
            value: PatchValue::Volumes(vec![scratch()]),
        }])
        .unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{
                "op": "add",
                "path": "/spec/volumes",
                "value": [{"name": "scratch", "emptyDir": {}}],
            }])
        );
    }
}
