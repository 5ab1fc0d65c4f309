//! Integration tests against a real Redis.
//!
//! Tests use testcontainers to spin up a Redis instance and are ignored by
//! default: run with `--ignored` on a machine with Docker.

use std::sync::Arc;
use std::time::Duration;

use arcadia_cache::{
    CacheMode, CacheStore, ConnectionState, ConnectionStatus, FailoverCache, RedisConfig,
    RedisStore, WindowRequest,
};
use serde_json::json;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("redis://127.0.0.1:{}", host_port))
        })
        .await;
    url.clone()
}

fn redis_config(url: String, key_prefix: &str) -> RedisConfig {
    RedisConfig {
        enabled: true,
        url,
        key_prefix: key_prefix.to_string(),
        ..Default::default()
    }
}

async fn wait_for_mode(cache: &FailoverCache, mode: CacheMode) {
    for _ in 0..200 {
        if cache.mode() == mode {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("cache never reached {mode:?}, stuck in {:?}", cache.mode());
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_roundtrip_through_failover_cache() {
    let url = get_redis_url().await;
    let cache = FailoverCache::builder()
        .with_redis(redis_config(url, "it-roundtrip:"))
        .build()
        .unwrap();
    wait_for_mode(&cache, CacheMode::Networked).await;

    cache.set("games:1", &json!({"title": "Skyforge"}), 60).await.unwrap();
    assert_eq!(cache.get("games:1").await.unwrap(), Some(json!({"title": "Skyforge"})));
    assert_eq!(cache.stats().fallback_entries, 0);

    cache.set("games:1", &json!("gone"), 0).await.unwrap();
    assert_eq!(cache.get("games:1").await.unwrap(), None);

    cache.shutdown().await;
    assert_eq!(cache.connection_state(), Some(ConnectionState::Disconnected));
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_prefix_delete_and_clear_stay_in_namespace() {
    let url = get_redis_url().await;
    let status = ConnectionStatus::new("redis");
    let store = Arc::new(RedisStore::new(&redis_config(url.clone(), "it-prefix:"), status).unwrap());
    let other_status = ConnectionStatus::new("redis");
    let other = Arc::new(RedisStore::new(&redis_config(url, "it-other:"), other_status).unwrap());

    let supervisors = vec![store.spawn_supervisor(), other.spawn_supervisor()];
    for s in [&store, &other] {
        for _ in 0..200 {
            if s.status().is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
    }

    for i in 0..20 {
        store.set(&format!("list:{i}"), &json!(i), 60).await.unwrap();
    }
    store.set("detail:1", &json!(1), 60).await.unwrap();
    other.set("list:1", &json!("keep"), 60).await.unwrap();

    assert_eq!(store.delete_by_prefix("list:").await.unwrap(), 20);
    assert_eq!(store.delete_by_prefix("list:").await.unwrap(), 0);
    assert!(store.get("detail:1").await.unwrap().is_some());

    store.clear().await.unwrap();
    assert_eq!(store.get("detail:1").await.unwrap(), None);
    assert_eq!(other.get("list:1").await.unwrap(), Some(json!("keep")));

    for task in supervisors {
        task.stop().await;
    }
}

#[tokio::test]
#[ignore = "requires docker"]
async fn test_redis_atomic_window_increment() {
    let url = get_redis_url().await;
    let cache = FailoverCache::builder()
        .with_redis(redis_config(url, "it-window:"))
        .build()
        .unwrap();
    wait_for_mode(&cache, CacheMode::Networked).await;

    let now = cache.clock().now_millis();
    let request = WindowRequest {
        now_millis: now,
        window_millis: 60_000,
        max: 3,
    };

    let mut allowed = Vec::new();
    for _ in 0..4 {
        let outcome = cache
            .increment_window("rate-limit:1.2.3.4", request)
            .await
            .expect("redis supports atomic increments");
        allowed.push(outcome.allowed);
        assert_eq!(outcome.reset_at, now + 60_000);
    }
    assert_eq!(allowed, vec![true, true, true, false]);

    // Counter is stored in the shared JSON shape.
    let stored = cache.get("rate-limit:1.2.3.4").await.unwrap().unwrap();
    assert_eq!(stored["count"], json!(3));

    cache.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_redis_degrades_to_fallback() {
    let cache = FailoverCache::builder()
        .with_redis(RedisConfig {
            connect_timeout_ms: 200,
            ..redis_config("redis://127.0.0.1:1".to_string(), "it-down:")
        })
        .build()
        .unwrap();

    cache.set("k", &json!("local"), 60).await.unwrap();
    assert_eq!(cache.get("k").await.unwrap(), Some(json!("local")));
    assert_ne!(cache.mode(), CacheMode::Networked);

    cache.shutdown().await;
}
