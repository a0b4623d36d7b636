#![warn(clippy::dbg_macro, clippy::todo)]

mod annotations;
mod inject;
mod jks;
mod mutate;
mod patch;
mod pem;
mod review;
mod webhook;

use kube::core::admission::SerializePatchError;
use log::error;
use std::sync::Arc;

use crate::{annotations::ConfigError, review::DecodeError, review::ReviewCodec};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid admission review: {0}")]
    DecodeError(#[from] DecodeError),
    #[error("Invalid injection annotations: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Failed to serialize patch: {0}")]
    PatchError(#[from] SerializePatchError),
    #[error("Failed to encode admission review: {0}")]
    EncodeError(#[source] serde_json::Error),
    #[error("Invalid configuration: {0}")]
    UserInputError(String),
}

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .parse_env(env_logger::Env::default().default_filter_or("info"))
        .init();

    let tls = match webhook::load_cert().await {
        Ok(x) => x,
        Err(e) => {
            error!("failed to load webhook TLS cert: {e:?}");
            std::process::exit(1);
        }
    };

    let codec = Arc::new(ReviewCodec::default());
    match webhook::run_webhook(&tls, codec).await {
        Ok(()) => {
            error!("webhook terminated successfully");
        }
        Err(e) => {
            error!("webhook failed to run: {e:?}");
            std::process::exit(1);
        }
    }
}
