pub mod router;
pub mod sse;
pub mod state;

use std::path::PathBuf;

use tokio_util::sync::CancellationToken;

pub use router::build_router;
pub use state::GatewayState;

/// Ties a request's lifetime to its task: dropping cancels the cooperative
/// token (client disconnect, handler teardown) and removes the temp files
/// decoded for upload. Cancelling after normal completion is a no-op for a
/// task that already returned.
pub struct TaskGuard {
    pub cancel: CancellationToken,
    pub temp_files: Vec<PathBuf>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        for path in &self.temp_files {
            let _ = std::fs::remove_file(path);
        }
    }
}
