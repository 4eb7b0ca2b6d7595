use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use rollcalld::config::Config;
use rollcalld::faces::{FaceStore, STAGING_DIR};
use rollcalld::routes::build_router;
use rollcalld::state::AppState;
use rollcalld::store::StudentStore;
use tempfile::TempDir;

use super::engine::StubEngine;
use super::http::post_form;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub config: Config,
    pub engine: StubEngine,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn student_count(&self) -> i64 {
        self.state.store().count().await.expect("count students")
    }

    pub fn staging_is_empty(&self) -> bool {
        std::fs::read_dir(self.config.data_dir.join(STAGING_DIR))
            .expect("staging dir")
            .next()
            .is_none()
    }

    pub async fn register(&self, name: &str, mat_no: &str, image: &str) -> StatusCode {
        post_form(
            &self.app,
            "/register",
            &[("name", name), ("mat_no", mat_no), ("imageData", image)],
        )
        .await
        .status()
    }
}

pub async fn spawn_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let mut config = Config::with_data_dir(temp_dir.path());
    configure(&mut config);

    let store = StudentStore::connect(&config.database).await.expect("open store");
    let faces = FaceStore::open(&config.data_dir).expect("open face store");
    let engine = StubEngine::default();
    let state = AppState::new(store, faces, Arc::new(engine.clone()), &config);
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        config,
        engine,
        _temp_dir: temp_dir,
    }
}

pub async fn spawn_test_app() -> TestApp {
    spawn_with(|_| {}).await
}
