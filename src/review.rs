use k8s_openapi::api::core::v1::Pod;
use kube::core::{
    admission::{
        AdmissionRequest, AdmissionReview, META_API_VERSION_V1, META_API_VERSION_V1BETA1,
        META_KIND,
    },
    DynamicObject,
};
use serde_json::Value;

use crate::annotations::{INJECT_JKS, INJECT_PEM};

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed admission review: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("unsupported review type {kind} {api_version}")]
    UnsupportedVersion { kind: String, api_version: String },
    #[error("admission review carries no request")]
    EmptyRequest,
    #[error("admission request carries no object")]
    MissingObject,
    #[error("embedded object is not a Pod: {0}")]
    InvalidPod(#[source] serde_json::Error),
    #[error("pod has no spec")]
    MissingSpec,
}

/// A decoded review, with the embedded object still undecoded.
#[derive(Debug)]
pub struct Review {
    pub request: AdmissionRequest<Pod>,
    pub object: Option<Value>,
}

#[derive(Debug)]
pub enum Extraction {
    Applicable(Pod),
    /// Both injection flags are explicitly disabled.
    NotApplicable,
}

/// Decodes and encodes AdmissionReview envelopes.
/// Built once at startup and shared between requests.
#[derive(Debug, Clone)]
pub struct ReviewCodec {
    api_versions: Vec<String>,
}

impl Default for ReviewCodec {
    fn default() -> Self {
        ReviewCodec {
            api_versions: vec![
                META_API_VERSION_V1.to_string(),
                META_API_VERSION_V1BETA1.to_string(),
            ],
        }
    }
}

impl ReviewCodec {
    pub fn decode_review(&self, body: &[u8]) -> Result<Review, DecodeError> {
        let mut raw: Value = serde_json::from_slice(body).map_err(DecodeError::Malformed)?;
        // the object is decoded on its own so a bad Pod is not reported as a bad envelope
        let object = raw
            .get_mut("request")
            .and_then(|x| x.get_mut("object"))
            .map(Value::take)
            .filter(|x| !x.is_null());

        let review: AdmissionReview<Pod> =
            serde_json::from_value(raw).map_err(DecodeError::Malformed)?;
        if review.types.kind != META_KIND || !self.api_versions.contains(&review.types.api_version)
        {
            return Err(DecodeError::UnsupportedVersion {
                kind: review.types.kind,
                api_version: review.types.api_version,
            });
        }
        let request: AdmissionRequest<Pod> =
            review.try_into().map_err(|_| DecodeError::EmptyRequest)?;
        Ok(Review { request, object })
    }

    pub fn decode_pod(&self, object: Option<Value>) -> Result<Extraction, DecodeError> {
        let object = object.ok_or(DecodeError::MissingObject)?;
        let pod: Pod = serde_json::from_value(object).map_err(DecodeError::InvalidPod)?;
        let disabled = |key: &str| {
            pod.metadata
                .annotations
                .as_ref()
                .and_then(|x| x.get(key))
                .map(|x| x == "false")
                .unwrap_or_default()
        };
        if disabled(INJECT_PEM) && disabled(INJECT_JKS) {
            return Ok(Extraction::NotApplicable);
        }
        if pod.spec.is_none() {
            return Err(DecodeError::MissingSpec);
        }
        Ok(Extraction::Applicable(pod))
    }

    pub fn encode_review(
        &self,
        review: &AdmissionReview<DynamicObject>,
    ) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(review)
    }
}
