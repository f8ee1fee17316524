//! Tests against a real Redis.
//!
//! Tests use testcontainers for portability - no external docker-compose required.
//!
//! # Running Tests
//! ```bash
//! # Requires Docker
//! cargo test --test redis_live -- --ignored
//! ```

use std::time::Duration;

use tiered_cache::{
    CacheConfig, CacheError, CacheMode, CircuitState, ConnectionState, SecurityError, SecurityLevel, TieredCache,
};

use testcontainers::{clients::Cli, core::WaitFor, Container, GenericImage, RunnableImage};

const MINUTE: Duration = Duration::from_secs(60);

// =============================================================================
// Container Helpers
// =============================================================================

fn redis_image() -> GenericImage {
    GenericImage::new("redis", "7-alpine")
        .with_exposed_port(6379)
        .with_wait_for(WaitFor::message_on_stdout("Ready to accept connections"))
}

fn redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    docker.run(redis_image())
}

/// Redis with a password and an ACL user `cache-svc` limited to `~app:*`.
fn secured_redis_container(docker: &Cli) -> Container<'_, GenericImage> {
    let args = vec![
        "redis-server".to_string(),
        "--requirepass".to_string(),
        "default-pw".to_string(),
        "--user".to_string(),
        "cache-svc".to_string(),
        "on".to_string(),
        ">svc-pw".to_string(),
        "~app:*".to_string(),
        "+@all".to_string(),
    ];
    docker.run(RunnableImage::from((redis_image(), args)))
}

fn url(container: &Container<'_, GenericImage>) -> String {
    format!("redis://127.0.0.1:{}", container.get_host_port_ipv4(6379))
}

fn live_config(redis_url: String) -> CacheConfig {
    CacheConfig {
        redis_url: Some(redis_url),
        compression_threshold: 256,
        retry_delay_ms: 50,
        l1_sweep_interval_secs: 0,
        ..Default::default()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
#[ignore]
async fn live_roundtrip_with_compression() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let cache = TieredCache::start(live_config(url(&redis))).await.unwrap();
    assert_eq!(cache.mode(), CacheMode::Tiered);

    let big = vec![b'z'; 10_000];
    cache.set("big", big.clone(), MINUTE).await.unwrap();
    cache.set("small", b"tiny".to_vec(), MINUTE).await.unwrap();

    cache.l1().clear();
    assert_eq!(cache.get("big").await.unwrap(), Some(big));
    assert_eq!(cache.get("small").await.unwrap(), Some(b"tiny".to_vec()));
    assert!(cache.exists("big").await.unwrap());

    cache.delete("big").await.unwrap();
    cache.l1().clear();
    assert_eq!(cache.get("big").await.unwrap(), None);

    cache.disconnect().await.unwrap();
    cache.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore]
async fn live_remote_ttl_expires() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let cache = TieredCache::start(live_config(url(&redis))).await.unwrap();

    cache.set("short", b"v".to_vec(), Duration::from_millis(300)).await.unwrap();
    cache.l1().clear();
    assert_eq!(cache.get("short").await.unwrap(), Some(b"v".to_vec()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    cache.l1().clear();
    assert_eq!(cache.get("short").await.unwrap(), None);
}

#[tokio::test]
#[ignore]
async fn live_acl_user_connects_and_scores_higher() {
    let docker = Cli::default();
    let redis = secured_redis_container(&docker);

    let acl = CacheConfig {
        acl_username: Some("cache-svc".into()),
        acl_password: Some("svc-pw".into()),
        key_prefix: "app:".into(),
        ..live_config(url(&redis))
    };
    let cache = TieredCache::start(acl).await.unwrap();
    cache.set("k", b"v".to_vec(), MINUTE).await.unwrap();
    let acl_score = cache.validate_security().unwrap().score();

    let password = CacheConfig {
        auth_password: Some("default-pw".into()),
        ..live_config(url(&redis))
    };
    let cache = TieredCache::start(password).await.unwrap();
    let result = cache.validate_security().unwrap();
    assert_eq!(result.level(), SecurityLevel::Basic);
    assert!(acl_score > result.score());
}

#[tokio::test]
#[ignore]
async fn live_wrong_password_is_fatal_at_start() {
    let docker = Cli::default();
    let redis = secured_redis_container(&docker);

    let config = CacheConfig {
        auth_password: Some("not-the-password".into()),
        ..live_config(url(&redis))
    };
    match TieredCache::start(config).await {
        Err(CacheError::Security(SecurityError::Authentication { .. })) => {}
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("start should fail with a rejected password"),
    }
}

#[tokio::test]
#[ignore]
async fn live_container_death_degrades_to_l1() {
    let docker = Cli::default();
    let redis = redis_container(&docker);
    let config = CacheConfig {
        circuit_failure_threshold: 2,
        operation_timeout_ms: 500,
        ..live_config(url(&redis))
    };
    let cache = TieredCache::start(config).await.unwrap();
    cache.set("k", b"v".to_vec(), MINUTE).await.unwrap();

    redis.stop();

    assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    for key in ["x", "y", "z"] {
        assert_eq!(cache.get(key).await.unwrap(), None);
    }
    assert_eq!(cache.circuit().state(), CircuitState::Open);
    assert_eq!(cache.security().state(), ConnectionState::Ready);
}

#[tokio::test]
#[ignore]
async fn live_unreachable_start_is_local_only() {
    let config = CacheConfig {
        connection_timeout_ms: 200,
        ..live_config("redis://127.0.0.1:1".into())
    };
    let cache = TieredCache::start(config).await.unwrap();
    assert_eq!(cache.mode(), CacheMode::LocalOnly);
    cache.set("k", b"v".to_vec(), MINUTE).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
}
