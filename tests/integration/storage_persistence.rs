//! SQLite persistence across restarts
//!
//! These tests verify that:
//! - Alert state survives a restart, so active alerts are not re-sent
//! - History survives a restart and feeds the next evaluation

use kube_sentinel::config::StorageConfig;
use kube_sentinel::event::ResourceKind;
use pretty_assertions::assert_eq;
use tempfile::tempdir;

use crate::helpers::*;

#[tokio::test]
async fn test_alert_state_survives_restart() {
    let server = ntfy_server(200).await;
    let dir = tempdir().unwrap();
    let db = dir.path().join("sentinel.db");
    let source = StaticSource::new();
    source.set(ResourceKind::Node, vec![node("n1", false)]);

    let mut config = test_config(&server.uri(), &[ResourceKind::Node]);
    config.storage = StorageConfig::Sqlite { path: db.clone() };

    {
        let monitor = build_monitor(config.clone(), Some(source.clone())).await;
        assert_eq!(monitor.store().backend_name(), "sqlite");
        let summary = monitor.run_pass().await;
        assert_eq!(summary.domains[&ResourceKind::Node].notified, 1);
    }

    let monitor = build_monitor(config, Some(source.clone())).await;
    let states = monitor.store().snapshot().await.unwrap();
    assert_eq!(states.len(), 1);
    assert!(states[0].active);
    assert!(states[0].last_notified.is_some());

    let summary = monitor.run_pass().await;
    assert_eq!(summary.domains[&ResourceKind::Node].suppressed, 1);
    assert_eq!(titles(&server).await.len(), 1);
}

#[tokio::test]
async fn test_history_survives_restart() {
    let server = ntfy_server(200).await;
    let dir = tempdir().unwrap();
    let source = StaticSource::new();
    source.set(ResourceKind::Deployment, vec![deployment("shop", "web", 2, 0)]);

    let mut config = test_config(&server.uri(), &[ResourceKind::Deployment]);
    config.storage = StorageConfig::Sqlite {
        path: dir.path().join("sentinel.db"),
    };

    {
        let monitor = build_monitor(config.clone(), Some(source.clone())).await;
        let summary = monitor.run_pass().await;
        assert_eq!(summary.domains[&ResourceKind::Deployment].notified, 0);
        assert_eq!(monitor.store().tracked().await.unwrap(), 1);
    }

    // the degraded observation from before the restart is the "previous" one
    let monitor = build_monitor(config, Some(source.clone())).await;
    assert_eq!(monitor.store().tracked().await.unwrap(), 1);
    let summary = monitor.run_pass().await;
    assert_eq!(summary.domains[&ResourceKind::Deployment].notified, 1);
}
