use friction_integrations::config::ConfigLoader;
use std::{
    env, fs,
    path::PathBuf,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const TEST_CRYPTO_KEY: &str = "YWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWFhYWE=";

const MANAGED_VARS: &[&str] = &[
    "FRICTION_PROFILE",
    "FRICTION_API_BIND_ADDR",
    "FRICTION_LOG_LEVEL",
    "FRICTION_CRYPTO_KEY",
    "FRICTION_SESSION_SECRET",
    "FRICTION_OPERATOR_TOKEN",
    "FRICTION_OPERATOR_TOKENS",
    "FRICTION_SALESFORCE_CLIENT_ID",
    "FRICTION_SALESFORCE_CLIENT_SECRET",
    "FRICTION_SALESFORCE_REDIRECT_URI",
    "FRICTION_SALESFORCE_SCOPES",
    "FRICTION_SALESFORCE_SESSION_TTL_SECONDS",
    "FRICTION_JIRA_ALLOWED_HOSTS",
];

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

fn env_guard() -> MutexGuard<'static, ()> {
    env_lock()
        .lock()
        .unwrap_or_else(|poison| poison.into_inner())
}

fn clear_env() {
    unsafe {
        for var in MANAGED_VARS {
            env::remove_var(var);
        }
    }
}

fn set_required_secrets() {
    unsafe {
        env::set_var("FRICTION_CRYPTO_KEY", TEST_CRYPTO_KEY);
        env::set_var("FRICTION_SESSION_SECRET", "session-secret");
        env::set_var("FRICTION_OPERATOR_TOKEN", "operator-token");
    }
}

fn write_env_file(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    fs::write(path, contents).unwrap();
}

#[test]
fn loads_defaults_when_no_env_present() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.jira_api_path, "/rest/api/3");
    assert_eq!(cfg.jira_allowed_hosts, vec!["*.atlassian.net"]);
    assert_eq!(cfg.oauth_fallback_url, "/settings/integrations");
    assert_eq!(cfg.salesforce.login_base, "https://login.salesforce.com");
    assert_eq!(cfg.salesforce.scopes, vec!["api", "refresh_token"]);
    assert_eq!(cfg.crypto_key.as_ref().map(Vec::len), Some(32));
    cfg.bind_addr().expect("default bind addr parses");
    clear_env();
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "FRICTION_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "FRICTION_API_BIND_ADDR=192.168.0.10:5000\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "FRICTION_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Profile comes from .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        &format!(
            "FRICTION_PROFILE=test\nFRICTION_API_BIND_ADDR=127.0.0.1:4000\nFRICTION_OPERATOR_TOKEN=layered-operator\nFRICTION_SESSION_SECRET=layered-secret\nFRICTION_CRYPTO_KEY={}\n",
            TEST_CRYPTO_KEY
        ),
    );

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with layered env files");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.operator_tokens, vec!["layered-operator"]);
    clear_env();
}

#[test]
fn os_environment_has_highest_precedence() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "FRICTION_API_BIND_ADDR=127.0.0.1:3000\nFRICTION_SALESFORCE_SCOPES=api\n",
    );

    unsafe {
        env::set_var("FRICTION_API_BIND_ADDR", "0.0.0.0:9090");
        env::set_var("FRICTION_SALESFORCE_SCOPES", "api refresh_token,id");
    }

    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let cfg = loader.load().expect("config loads with env override");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:9090");
    assert_eq!(cfg.salesforce.scopes, vec!["api", "refresh_token", "id"]);

    clear_env();
}

#[test]
fn operator_token_list_is_split_on_commas() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var("FRICTION_OPERATOR_TOKENS", "first, second,,third");
    }

    let temp_dir = TempDir::new().unwrap();
    let cfg = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect("config loads");
    assert_eq!(cfg.operator_tokens, vec!["first", "second", "third"]);

    clear_env();
}

#[test]
fn jira_allowed_hosts_are_split_on_commas() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var(
            "FRICTION_JIRA_ALLOWED_HOSTS",
            "*.atlassian.net, jira.acme.test",
        );
    }

    let temp_dir = TempDir::new().unwrap();
    let cfg = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect("config loads");
    assert_eq!(
        cfg.jira_allowed_hosts,
        vec!["*.atlassian.net", "jira.acme.test"]
    );

    clear_env();
}

#[test]
fn oversized_session_ttl_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var(
            "FRICTION_SALESFORCE_SESSION_TTL_SECONDS",
            "10000000000000000",
        );
    }

    let temp_dir = TempDir::new().unwrap();
    let result = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path())).load();
    assert!(result.is_err());

    clear_env();
}

#[test]
fn invalid_bind_addr_returns_error() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var("FRICTION_API_BIND_ADDR", "not-an-addr");
    }
    let temp_dir = TempDir::new().unwrap();
    let loader = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()));
    let err = loader.load().expect_err("invalid bind addr should fail");
    assert!(format!("{}", err).contains("invalid api bind address"));

    clear_env();
}

#[test]
fn missing_session_secret_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::remove_var("FRICTION_SESSION_SECRET");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect_err("session secret is required");
    assert!(err.to_string().contains("FRICTION_SESSION_SECRET"));

    clear_env();
}

#[test]
fn production_profile_requires_salesforce_client() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var("FRICTION_PROFILE", "production");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect_err("production needs a connected app");
    assert!(err.to_string().contains("FRICTION_SALESFORCE_CLIENT_ID"));

    clear_env();
}

#[test]
fn malformed_crypto_key_is_rejected() {
    let _guard = env_guard();
    clear_env();
    set_required_secrets();

    unsafe {
        env::set_var("FRICTION_CRYPTO_KEY", "not base64!!");
    }
    let temp_dir = TempDir::new().unwrap();
    let err = ConfigLoader::with_base_dir(PathBuf::from(temp_dir.path()))
        .load()
        .expect_err("crypto key must be base64");
    assert!(err.to_string().contains("base64"));

    clear_env();
}
