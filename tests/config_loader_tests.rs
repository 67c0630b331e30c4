use jobstore::config::{ConfigError, ConfigLoader};
use std::{
    env, fs,
    sync::{Mutex, MutexGuard, OnceLock},
};
use tempfile::TempDir;

const KEYS: [&str; 13] = [
    "JOBSTORE_PROFILE",
    "JOBSTORE_API_BIND_ADDR",
    "JOBSTORE_LOG_LEVEL",
    "JOBSTORE_LOG_FORMAT",
    "JOBSTORE_DATABASE_URL",
    "JOBSTORE_DB_MAX_CONNECTIONS",
    "JOBSTORE_DB_ACQUIRE_TIMEOUT_MS",
    "JOBSTORE_WORKER_HOST",
    "JOBSTORE_WORKER_NODES",
    "JOBSTORE_WORKER_TICK_MS",
    "JOBSTORE_WORKER_JITTER_MS",
    "JOBSTORE_WORKER_CONCURRENCY",
    "JOBSTORE_WORKER_FETCH_LIMIT",
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
    for key in KEYS {
        unsafe {
            env::remove_var(key);
        }
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

    let temp_dir = TempDir::new().unwrap();
    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("config loads with defaults");

    assert_eq!(cfg.profile, "local");
    assert_eq!(cfg.api_bind_addr, "0.0.0.0:8080");
    assert_eq!(cfg.log_level, "info");
    assert_eq!(cfg.log_format, "json");
    assert_eq!(cfg.database_url, "sqlite://jobstore.db?mode=rwc");
    assert_eq!(cfg.worker.host, "localhost");
    assert!(cfg.worker.nodes.is_empty());
    assert_eq!(cfg.worker.tick_ms, 5000);
    cfg.bind_addr().expect("default bind addr parses");
}

#[test]
fn layered_env_files_apply_in_order() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "JOBSTORE_API_BIND_ADDR=127.0.0.1:3000\n");
    write_env_file(
        &temp_dir,
        ".env.test",
        "JOBSTORE_API_BIND_ADDR=192.168.0.10:5000\nJOBSTORE_WORKER_NODES=\"etl, report ,\"\n",
    );
    write_env_file(
        &temp_dir,
        ".env.test.local",
        "JOBSTORE_API_BIND_ADDR=10.0.0.5:6000\n",
    );

    // Select profile via .env.local before profile-specific files load.
    write_env_file(
        &temp_dir,
        ".env.local",
        "JOBSTORE_PROFILE=test\nJOBSTORE_API_BIND_ADDR=127.0.0.1:4000\n",
    );

    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("config loads");

    assert_eq!(cfg.profile, "test");
    assert_eq!(cfg.api_bind_addr, "10.0.0.5:6000");
    assert_eq!(cfg.worker.nodes, vec!["etl".to_string(), "report".to_string()]);
}

#[test]
fn process_env_overrides_files() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(
        &temp_dir,
        ".env",
        "JOBSTORE_LOG_LEVEL=debug\nJOBSTORE_WORKER_CONCURRENCY=2\n",
    );
    unsafe {
        env::set_var("JOBSTORE_WORKER_CONCURRENCY", "8");
        env::set_var("JOBSTORE_DATABASE_URL", "postgres://user:secret@db:5432/jobs");
    }

    let cfg = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .expect("config loads");

    assert_eq!(cfg.log_level, "debug");
    assert_eq!(cfg.worker.concurrency, 8);
    assert_eq!(cfg.database_url, "postgres://user:secret@db:5432/jobs");
    let redacted = cfg.redacted_json().unwrap();
    assert!(!redacted.contains("secret"));
    clear_env();
}

#[test]
fn rejects_unparseable_numbers() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "JOBSTORE_WORKER_TICK_MS=soon\n");

    let err = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "WORKER_TICK_MS"));
}

#[test]
fn rejects_invalid_bind_address() {
    let _guard = env_guard();
    clear_env();

    let temp_dir = TempDir::new().unwrap();
    write_env_file(&temp_dir, ".env", "JOBSTORE_API_BIND_ADDR=not-an-address\n");

    let err = ConfigLoader::with_base_dir(temp_dir.path().to_path_buf())
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBindAddr { .. }));
}
