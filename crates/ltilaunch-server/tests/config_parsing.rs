use std::io::Write;
use std::time::Duration;

use ltilaunch::types::Visibility;
use ltilaunch_server::config::StorageBackend;
use ltilaunch_server::config::loader::load_config;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp file");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_full_config_file() {
    let file = write_config(
        r#"
[server]
port = 9090
base_url = "https://tool.example.edu"

[storage]
backend = "postgres"

[storage.postgres]
url = "postgres://lti:lti@db:5432/lti"
pool_size = 5

[logging]
level = "debug"

[lti]
launch_redirect = "/dashboard"

[lti.nonce]
timestamp_tolerance = "45s"
capacity = 20

[session]
cookie_name = "tool_session"
lifetime = "2h"
same_site = "lax"

[bootstrap]
groups = ["district"]

[[bootstrap.consumers]]
name = "Canvas"
consumer_key = "canvas-key"
consumer_secret = "canvas-secret"
instance_guid = "canvas-guid"
group = "district"
matcher = "canvas_login_id"

[[bootstrap.providers]]
name = "grader"
display_name = "Grader"
launch_path = "/lti/launch"
visibility = "admins"
"#,
    );

    let cfg = load_config(file.path().to_str()).expect("config loads");
    assert_eq!(cfg.server.port, 9090);
    assert_eq!(
        cfg.base_url().and_then(|u| u.host_str().map(str::to_string)),
        Some("tool.example.edu".to_string())
    );
    assert_eq!(cfg.storage.backend, StorageBackend::Postgres);
    let pg = cfg.storage.postgres.as_ref().expect("postgres settings");
    assert_eq!(pg.pool_size, 5);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.lti.launch_redirect, "/dashboard");
    assert_eq!(cfg.lti.nonce.timestamp_tolerance, Duration::from_secs(45));
    assert_eq!(cfg.lti.nonce.capacity, 20);
    assert_eq!(cfg.session.cookie_name, "tool_session");
    assert_eq!(cfg.session.lifetime, Duration::from_secs(7200));

    let canvas = &cfg.bootstrap.consumers[0];
    assert!(canvas.match_guid_and_consumer);
    assert_eq!(canvas.group.as_deref(), Some("district"));
    assert_eq!(cfg.bootstrap.providers[0].visibility, Visibility::Admins);
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("absent.toml");
    let cfg = load_config(path.to_str()).expect("defaults load");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.storage.backend, StorageBackend::Memory);
    assert_eq!(cfg.session.cookie_name, "ltilaunch_session");
}

#[test]
fn invalid_file_is_rejected() {
    let file = write_config(
        r#"
[bootstrap]
groups = []

[[bootstrap.consumers]]
name = "Canvas"
group = "district"
"#,
    );
    let err = load_config(file.path().to_str()).unwrap_err();
    assert!(err.contains("undeclared group"));
}
