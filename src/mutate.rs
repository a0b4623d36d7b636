use k8s_openapi::api::core::v1::Pod;
use kube::{
    core::{
        admission::{AdmissionRequest, AdmissionResponse},
        Status,
    },
    ResourceExt,
};
use log::info;

use crate::{
    annotations::{self, InjectionConfig},
    inject,
    patch::{into_patch, PodPatch},
    review::{Extraction, ReviewCodec},
    Error,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Mutated { patches: usize },
    NotApplicable,
}

#[derive(Debug)]
pub struct Admitted {
    pub outcome: Outcome,
    pub body: Vec<u8>,
}

/// Wraps the patches into an allowing response for `req`.
pub fn assemble(
    req: &AdmissionRequest<Pod>,
    config: &InjectionConfig,
    patches: Vec<PodPatch>,
) -> Result<AdmissionResponse, Error> {
    let mut res = AdmissionResponse::from(req);
    res.result = Status::success();
    if config.inject_pem || config.inject_jks {
        res.audit_annotations
            .insert("pemTruststore".to_string(), "injected".to_string());
        res.audit_annotations
            .insert("image".to_string(), config.image.clone());
        res.audit_annotations
            .insert("configMap".to_string(), config.config_map_name.clone());
    }
    if config.inject_jks {
        res.audit_annotations
            .insert("jksTruststore".to_string(), "injected".to_string());
    }
    let patch = into_patch(patches).map_err(Error::EncodeError)?;
    Ok(res.with_patch(patch)?)
}

fn not_applicable(req: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let mut res = AdmissionResponse::from(req);
    res.result = Status::success();
    res
}

/// Runs one AdmissionReview body through the injector and returns the encoded reply.
pub fn mutate(codec: &ReviewCodec, body: &[u8]) -> Result<Admitted, Error> {
    let review = codec.decode_review(body)?;
    let req = review.request;

    let (outcome, res) = match codec.decode_pod(review.object)? {
        Extraction::NotApplicable => {
            info!(
                "skipped: {:?} in {}, injection disabled",
                req.operation,
                req.namespace.as_deref().unwrap_or_default()
            );
            (Outcome::NotApplicable, not_applicable(&req))
        }
        Extraction::Applicable(pod) => {
            let name = pod.name_any();
            let config = annotations::resolve(&pod)?;
            if config.injects() {
                let patches = inject::synthesize(&pod, &config);
                info!(
                    "mutating: {:?} on Pod {name}, pem: {}, jks: {}, {} patches",
                    req.operation,
                    config.inject_pem,
                    config.inject_jks,
                    patches.len()
                );
                let outcome = Outcome::Mutated {
                    patches: patches.len(),
                };
                (outcome, assemble(&req, &config, patches)?)
            } else {
                info!("skipped: {:?} on Pod {name}, not marked for injection", req.operation);
                (Outcome::NotApplicable, not_applicable(&req))
            }
        }
    };

    let body = codec
        .encode_review(&res.into_review())
        .map_err(Error::EncodeError)?;
    Ok(Admitted { outcome, body })
}
