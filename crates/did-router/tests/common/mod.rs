//! Shared helpers for the router integration tests

#![allow(dead_code)]

use std::path::Path;

use rvoip_did_router::{CallRouter, Database, RouterConfig};
use tempfile::TempDir;

pub fn test_config(db_path: &Path) -> RouterConfig {
    let mut config = RouterConfig::default();
    config.database.url = format!("sqlite://{}?mode=rwc", db_path.display());
    config.database.max_connections = 5;
    config.routing.recording_dir = "/tmp/recordings".to_string();
    config
}

/// Open a router over the database at `db_path` and restore its index
pub async fn open_router(db_path: &Path) -> CallRouter {
    let config = test_config(db_path);
    let database = Database::connect(&config.database)
        .await
        .expect("Failed to create test database");
    let router = CallRouter::new(database, config);
    router.restore().await.expect("Failed to restore index");
    router
}

/// Create a router over a fresh database with `dids` provisioned
pub async fn create_test_router(dids: &[&str]) -> (CallRouter, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let router = open_router(&temp_dir.path().join("router.db")).await;
    for did in dids {
        router.pool().provision(did, Some("US")).await.unwrap();
    }
    (router, temp_dir)
}
