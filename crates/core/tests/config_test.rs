// Configuration Test
//
// Loads YAML files from disk the way the binary does

use focusroom_core::{BackendKind, ConfigLoader};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_partial_file_fills_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("focusroom.yaml");
    fs::write(
        &path,
        "backend:\n  kind: memory\nrooms:\n  max_participants: 4\nuser:\n  id: alice\n",
    )
    .unwrap();

    let config = ConfigLoader::load(path.to_str()).unwrap();
    assert_eq!(config.backend.kind, BackendKind::Memory);
    assert_eq!(config.rooms.max_participants, 4);
    assert_eq!(config.rooms.duration_secs, 1500);
    assert_eq!(config.presence.heartbeat_interval_secs, 60);
    assert_eq!(config.user.user_id(), "alice");
    assert_eq!(config.user.display_name, "Anonymous");
}

#[test]
fn test_invalid_values_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("focusroom.yaml");
    fs::write(&path, "backend:\n  kind: memory\nrooms:\n  max_participants: 0\n").unwrap();

    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert!(err.to_string().contains("rooms.max_participants"));
}

#[test]
fn test_firebase_without_url_needs_fallback() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("focusroom.yaml");
    fs::write(&path, "backend:\n  kind: firebase\n  allow_fallback: false\n").unwrap();

    // Only meaningful when the URL is not supplied through the environment
    if std::env::var("FOCUSROOM_DATABASE_URL").is_err() {
        assert!(ConfigLoader::load(path.to_str()).is_err());
    }
}

#[test]
fn test_unparseable_file_reports_parse_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("focusroom.yaml");
    fs::write(&path, "backend: [unclosed\n").unwrap();

    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert!(err.to_string().contains("Config parse error"));
}

#[test]
fn test_zero_poll_interval_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("focusroom.yaml");
    fs::write(
        &path,
        "backend:\n  kind: memory\npresence:\n  active_count_poll_secs: 0\n",
    )
    .unwrap();

    let err = ConfigLoader::load(path.to_str()).unwrap_err();
    assert!(err.to_string().contains("presence.active_count_poll_secs"));
}

#[test]
fn test_generated_user_id_survives_reload() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("focusroom.yaml");
    fs::write(&path, "backend:\n  kind: memory\n").unwrap();

    let first = ConfigLoader::load(path.to_str()).unwrap();
    let id = first.user.id.clone().unwrap();
    assert!(fs::read_to_string(&path).unwrap().contains(&id));

    let second = ConfigLoader::load(path.to_str()).unwrap();
    assert_eq!(second.user.user_id(), id);
    assert_eq!(second.backend.kind, BackendKind::Memory);
}
