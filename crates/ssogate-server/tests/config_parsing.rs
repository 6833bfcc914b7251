use std::time::Duration;
use std::{env, fs};

use ssogate_server::config::loader::load_config;

const VALID_TOML: &str = r#"
[server]
host = "127.0.0.1"
port = 8081
body_limit_bytes = 1024

[logging]
level = "debug"

[upstream]
url = "http://127.0.0.1:9000"
timeout_ms = 5000

[gateway]
session_store_path = "/tmp/ssogate-sessions"
purge_interval = "5m"

[gateway.provider]
auth_server = "https://urs.example.com"

[gateway.transport]
connect_timeout = "3s"
max_response_bytes = 32768

[[gateway.locations]]
path = "/data"
authorization_group = "data_users"
client_id = "client-1"
client_credentials = "Y2xpZW50OnNlY3JldA=="
redirect_url = "https://app.example.com/data/oauth/callback"
logout_path = "/data/logout"
idle_timeout = "1h"
active_timeout = "12h"
check_ip_octets = 3
profile_attributes = ["email_address", "study_area"]

[[gateway.locations]]
path = "/public"
authorization_group = "guests"
client_id = "client-2"
redirect_url = "https://app.example.com/public/oauth/callback"
anonymous_user = "guest"
"#;

#[test]
fn config_parsing_and_env_overrides_and_validation() {
    let dir = tempfile::tempdir().expect("tmp dir");
    let path = dir.path().join("ssogate.toml");
    fs::write(&path, VALID_TOML).expect("write toml");

    // 1) Valid config parses
    let cfg = load_config(path.to_str()).expect("should parse config");
    assert_eq!(cfg.server.port, 8081);
    assert_eq!(cfg.logging.level, "debug");
    assert_eq!(cfg.upstream.timeout(), Duration::from_secs(5));
    assert_eq!(cfg.gateway.purge_interval, Duration::from_secs(300));
    assert_eq!(cfg.gateway.provider.token_path, "/oauth/token");
    assert_eq!(cfg.gateway.transport.connect_timeout, Duration::from_secs(3));
    assert_eq!(cfg.gateway.transport.io_timeout, Duration::from_secs(30));
    assert_eq!(cfg.gateway.locations.len(), 2);

    let data = &cfg.gateway.locations[0];
    assert_eq!(data.idle_timeout, Duration::from_secs(3600));
    assert_eq!(data.active_timeout, Duration::from_secs(12 * 3600));
    assert_eq!(data.check_ip_octets, 3);
    assert_eq!(data.profile_attributes, vec!["email_address", "study_area"]);
    let public = &cfg.gateway.locations[1];
    assert_eq!(public.anonymous_user.as_deref(), Some("guest"));
    assert_eq!(public.idle_timeout, Duration::ZERO);

    // 2) Env override should win over file
    unsafe {
        env::set_var("SSOGATE__SERVER__PORT", "9091");
    }
    let cfg_env = load_config(path.to_str()).expect("should parse config with env overrides");
    assert_eq!(cfg_env.server.port, 9091);
    unsafe {
        env::remove_var("SSOGATE__SERVER__PORT");
    }

    // 3) Plain-http identity provider is rejected
    let insecure_path = dir.path().join("insecure.toml");
    fs::write(
        &insecure_path,
        VALID_TOML.replace("https://urs.example.com", "http://urs.example.com"),
    )
    .expect("write insecure toml");
    let err = load_config(insecure_path.to_str()).expect_err("http provider should fail");
    assert!(err.contains("https"), "unexpected error: {err}");

    // 4) Invalid log level is rejected
    let bad_level_path = dir.path().join("bad_level.toml");
    fs::write(
        &bad_level_path,
        VALID_TOML.replace("level = \"debug\"", "level = \"loud\""),
    )
    .expect("write bad level toml");
    assert!(load_config(bad_level_path.to_str()).is_err());

    // 5) Missing upstream section fails deserialization
    let no_upstream_path = dir.path().join("no_upstream.toml");
    fs::write(
        &no_upstream_path,
        VALID_TOML.replace(
            "[upstream]\nurl = \"http://127.0.0.1:9000\"\ntimeout_ms = 5000\n",
            "",
        ),
    )
    .expect("write toml without upstream");
    assert!(load_config(no_upstream_path.to_str()).is_err());
}
