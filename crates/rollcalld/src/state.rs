use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

use crate::config::Config;
use crate::faces::FaceStore;
use crate::recognition::FaceEngine;
use crate::store::StudentStore;

/// Application context, built once at startup and cloned into every handler.
#[derive(Clone)]
pub struct AppState {
    store: StudentStore,
    faces: Arc<FaceStore>,
    engine: Arc<dyn FaceEngine>,
    config: Arc<Config>,
    capture_lock: Arc<Mutex<()>>,
    started_at: Instant,
}

impl AppState {
    pub fn new(store: StudentStore, faces: FaceStore, engine: Arc<dyn FaceEngine>, config: &Config) -> Self {
        Self {
            store,
            faces: Arc::new(faces),
            engine,
            config: Arc::new(config.clone()),
            capture_lock: Arc::new(Mutex::new(())),
            started_at: Instant::now(),
        }
    }

    pub fn store(&self) -> &StudentStore {
        &self.store
    }

    pub fn faces(&self) -> &Arc<FaceStore> {
        &self.faces
    }

    pub fn engine(&self) -> &dyn FaceEngine {
        self.engine.as_ref()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Serialises writers of the shared capture file.
    pub fn capture_lock(&self) -> &Mutex<()> {
        &self.capture_lock
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.config.engine_timeout_secs)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
