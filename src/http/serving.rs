//! Playback request routing into a stream's segmenter

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::registry::StreamRegistry;

/// Looks up the stream for a key and hands the request to its segmenter
#[derive(Debug, Clone)]
pub struct ServingBridge {
    registry: Arc<StreamRegistry>,
}

impl ServingBridge {
    pub fn new(registry: Arc<StreamRegistry>) -> Self {
        Self { registry }
    }

    /// 404 unless the stream is active and its segmenter is running
    pub async fn handle(&self, key: &str, request: Request<Body>) -> Response {
        let Some(stream) = self.registry.get(key).await else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if !stream.is_active() || !stream.is_ready() {
            return StatusCode::NOT_FOUND.into_response();
        }
        match stream.segmenter() {
            Some(segmenter) => segmenter.handle(request),
            None => StatusCode::NOT_FOUND.into_response(),
        }
    }
}
