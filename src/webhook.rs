use std::{convert::Infallible, net::SocketAddr, path::PathBuf, sync::Arc};

use bytes::Bytes;
use kube::core::Status;
use log::{error, info, warn};
use serde_json::json;
use warp::{
    http::{header::CONTENT_TYPE, StatusCode},
    reply::{self, Reply},
    Filter, Rejection,
};

use crate::{
    mutate::{mutate, Outcome},
    review::ReviewCodec,
    Error,
};

lazy_static::lazy_static! {
    static ref TLS_CERT_PATH: PathBuf = {
        let path = std::env::var("TLS_CERT_PATH").unwrap_or_default();
        if path.is_empty() {
            "/ssl/tls.crt".into()
        } else {
            path.into()
        }
    };
    static ref TLS_KEY_PATH: PathBuf = {
        let path = std::env::var("TLS_KEY_PATH").unwrap_or_default();
        if path.is_empty() {
            "/ssl/tls.key".into()
        } else {
            path.into()
        }
    };
}

pub struct TlsIdentity {
    pub key: Vec<u8>,
    pub cert: Vec<u8>,
}

pub async fn load_cert() -> Result<TlsIdentity, Error> {
    let cert = tokio::fs::read(&*TLS_CERT_PATH).await.map_err(|e| {
        Error::UserInputError(format!(
            "failed to read TLS cert '{}': {e}",
            TLS_CERT_PATH.display()
        ))
    })?;
    let key = tokio::fs::read(&*TLS_KEY_PATH).await.map_err(|e| {
        Error::UserInputError(format!(
            "failed to read TLS key '{}': {e}",
            TLS_KEY_PATH.display()
        ))
    })?;
    Ok(TlsIdentity { key, cert })
}

fn bind_addr() -> Result<SocketAddr, Error> {
    let mut bind = std::env::var("ADMISSION_BIND").unwrap_or_default();
    if bind.is_empty() {
        bind = "0.0.0.0:8443".to_string();
    }
    bind.parse()
        .map_err(|e| Error::UserInputError(format!("invalid ADMISSION_BIND ({bind}): {e}")))
}

pub fn routes(
    codec: Arc<ReviewCodec>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    warp::post()
        .and(
            warp::path("mutate")
                .and(warp::path::end())
                .and(warp::body::bytes())
                .and(warp::any().map(move || codec.clone()))
                .and_then(mutate_handler),
        )
        .or(warp::get().and(
            warp::path("health")
                .and(warp::path::end())
                .map(|| reply::json(&json!({"status": "UP"}))),
        ))
        .with(warp::log::log("webhook"))
}

pub async fn run_webhook(tls: &TlsIdentity, codec: Arc<ReviewCodec>) -> Result<(), Error> {
    let bind = bind_addr()?;
    info!("webhook listening on {bind}");

    warp::serve(routes(codec))
        .tls()
        .cert(&tls.cert)
        .key(&tls.key)
        .run(bind)
        .await;

    Ok(())
}

async fn mutate_handler(body: Bytes, codec: Arc<ReviewCodec>) -> Result<impl Reply, Infallible> {
    match mutate(&codec, &body) {
        Ok(admitted) => {
            if let Outcome::Mutated { patches } = admitted.outcome {
                info!("accepted with {patches} patches");
            }
            Ok(warp::http::Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "application/json")
                .body(admitted.body))
        }
        Err(e) => {
            warn!("failed mutation: {e}");
            let mut status = Status::failure(&format!("failed mutation: {e}"), "InternalError");
            status.code = StatusCode::INTERNAL_SERVER_ERROR.as_u16();
            let body = match serde_json::to_vec(&status) {
                Ok(x) => x,
                Err(e) => {
                    error!("failed to encode error status: {e}");
                    vec![]
                }
            };
            Ok(warp::http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "application/json")
                .body(body))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use warp::http::StatusCode;

    use super::routes;
    use crate::review::{
        tests::{pod_object, review_body},
        ReviewCodec,
    };

    #[tokio::test]
    async fn test_health() {
        let res = warp::test::request()
            .method("GET")
            .path("/health")
            .reply(&routes(Arc::new(ReviewCodec::default())))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, json!({"status": "UP"}));
    }

    #[tokio::test]
    async fn test_mutate() {
        let res = warp::test::request()
            .method("POST")
            .path("/mutate")
            .body(review_body(pod_object(
                json!({"custompki.openshift.io/inject-pem": "true"}),
            )))
            .reply(&routes(Arc::new(ReviewCodec::default())))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "application/json");
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["response"]["allowed"], json!(true));
        assert_eq!(body["response"]["patchType"], json!("JSONPatch"));
    }

    #[tokio::test]
    async fn test_mutate_invalid_body() {
        let res = warp::test::request()
            .method("POST")
            .path("/mutate")
            .body("Wut ?")
            .reply(&routes(Arc::new(ReviewCodec::default())))
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["status"], json!("Failure"));
        assert_eq!(body["reason"], json!("InternalError"));
        assert_eq!(body["code"], json!(500));
    }

    #[tokio::test]
    async fn test_mutate_bad_flag() {
        let res = warp::test::request()
            .method("POST")
            .path("/mutate")
            .body(review_body(pod_object(
                json!({"custompki.openshift.io/inject-jks": "maybe"}),
            )))
            .reply(&routes(Arc::new(ReviewCodec::default())))
            .await;
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_wrong_method() {
        let res = warp::test::request()
            .method("GET")
            .path("/mutate")
            .reply(&routes(Arc::new(ReviewCodec::default())))
            .await;
        assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
