use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use tabgate_adapters::AdapterRegistry;
use tabgate_core_types::{GatewayError, GatewayResult};
use tabgate_pool::{AdmissionQueue, Pool};

use crate::config::Config;
use crate::logging::LogBuffer;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub registry: Arc<AdapterRegistry>,
    pub pool: Arc<Pool>,
    pub queue: Arc<AdmissionQueue>,
    pub logs: Arc<LogBuffer>,
    pub data_dir: PathBuf,
    pub started_at: Instant,
}

impl GatewayState {
    /// Single shared bearer token for every protected endpoint.
    pub fn authorize(&self, headers: &HeaderMap) -> GatewayResult<()> {
        let presented = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) if token == self.config.server.auth => Ok(()),
            _ => Err(GatewayError::unauthorized()),
        }
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.data_dir.join("temp")
    }
}
