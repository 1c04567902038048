use std::path::PathBuf;
use std::time::Duration;

use fluxbase::config::{DEFAULT_BIND_ADDR, DEFAULT_DB_PATH, ServerConfig};

#[test]
fn explicit_config_path_wins_over_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("server.toml");
    std::fs::write(
        &path,
        r#"
bind_addr = "0.0.0.0:9400"
db_path = "/var/lib/fluxbase/data.db"
client_timeout_secs = 90
read_threads = 4

[auth_tokens]
"tok-ci" = "ci-runner"
"#,
    )
    .unwrap();

    let config = ServerConfig::load(Some(&path));
    assert_eq!(config.bind_addr, "0.0.0.0:9400");
    assert_eq!(config.db_path, PathBuf::from("/var/lib/fluxbase/data.db"));
    assert_eq!(config.log_level, "info");
    assert_eq!(config.auth_tokens.get("tok-ci").map(String::as_str), Some("ci-runner"));
    assert_eq!(config.hub_options().client_timeout, Duration::from_secs(90));
    assert_eq!(config.store_options().read_threads, Some(4));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let config = ServerConfig::load(Some(&dir.path().join("absent.toml")));
    assert_eq!(config.bind_addr, DEFAULT_BIND_ADDR);
    assert_eq!(config.db_path, PathBuf::from(DEFAULT_DB_PATH));
    assert!(config.auth_tokens.is_empty());
}
