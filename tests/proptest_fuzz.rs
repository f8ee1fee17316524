//! Property-based tests (fuzzing) for the tiered cache.
//!
//! Uses proptest to generate random keys, parameters and payloads and verify
//! the cache never panics and always returns what was stored.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;

use tiered_cache::security::assessment;
use tiered_cache::security::types::{NegotiatedSecurity, TlsDetails};
use tiered_cache::{
    AuthMethod, CacheConfig, CacheEntry, Codec, InMemoryConnector, KeyGenerator, LocalTierCache, MemoryServer,
    SecurityLevel, SecurityManager, TieredCache, TlsVerifyMode,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn params_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z_]{1,12}", ".{0,400}"), 0..8)
}

fn payload_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..256),
        // Highly compressible, above the threshold
        (any::<u8>(), 256usize..8192).prop_map(|(b, n)| vec![b; n]),
        prop::collection::vec(any::<u8>(), 256..4096),
    ]
}

fn negotiated_strategy() -> impl Strategy<Value = NegotiatedSecurity> {
    let auth = prop_oneof![
        Just(AuthMethod::None),
        Just(AuthMethod::Password),
        "[a-z]{1,8}".prop_map(|username| AuthMethod::Acl { username }),
    ];
    let tls = prop::option::of(
        (
            prop_oneof![
                Just(TlsVerifyMode::None),
                Just(TlsVerifyMode::Peer),
                Just(TlsVerifyMode::PeerAndHost)
            ],
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(verify_mode, custom_ca, client_certificate)| TlsDetails {
                verify_mode,
                custom_ca,
                client_certificate,
            }),
    );
    (auth, tls).prop_map(|(auth, tls)| NegotiatedSecurity { auth, tls })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Key generation
// =============================================================================

proptest! {
    #[test]
    fn key_is_deterministic(params in params_strategy(), op in "[a-z]{1,16}") {
        let keys = KeyGenerator::default();
        let a = keys.generate_key(&params, &op).unwrap();
        let b = keys.generate_key(&params, &op).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn key_ignores_parameter_order(mut params in params_strategy(), op in "[a-z]{1,16}") {
        let keys = KeyGenerator::default();
        let a = keys.generate_key(&params, &op).unwrap();
        params.reverse();
        let b = keys.generate_key(&params, &op).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn hashed_keys_are_bounded(params in params_strategy(), op in "[a-z]{1,16}") {
        let keys = KeyGenerator::default();
        let key = keys.generate_key(&params, &op).unwrap();
        if key.contains(tiered_cache::key::HASH_MARKER) {
            prop_assert!(key.len() < 200);
        } else {
            prop_assert!(key.len() <= keys.hash_threshold());
        }
        prop_assert!(key.starts_with(&op));
    }

    #[test]
    fn different_operations_never_collide(params in params_strategy(), a in "[a-z]{1,8}", b in "[a-z]{1,8}") {
        prop_assume!(a != b);
        let keys = KeyGenerator::default();
        prop_assert_ne!(keys.generate_key(&params, &a).unwrap(), keys.generate_key(&params, &b).unwrap());
    }
}

// =============================================================================
// Compression
// =============================================================================

proptest! {
    #[test]
    fn codec_is_lossless(payload in payload_strategy(), level in 1i32..=9) {
        let codec = Codec::new(256, level);
        let entry = CacheEntry::new("k", payload.clone(), Duration::from_secs(60));

        let encoded = codec.encode(entry).unwrap();
        prop_assert_eq!(encoded.compressed, payload.len() >= 256);
        prop_assert_eq!(encoded.size_bytes, payload.len());

        let decoded = codec.decode(encoded).unwrap();
        prop_assert!(!decoded.compressed);
        prop_assert_eq!(decoded.value, payload);
    }

    #[test]
    fn codec_rejects_garbage_without_panicking(garbage in prop::collection::vec(any::<u8>(), 0..512)) {
        let codec = Codec::default();
        let mut entry = CacheEntry::new("k", garbage, Duration::from_secs(60));
        entry.compressed = true;
        entry.size_bytes = usize::MAX;
        prop_assert!(codec.decode(entry).is_err());
    }
}

// =============================================================================
// L1 behavior
// =============================================================================

proptest! {
    #[test]
    fn l1_never_exceeds_capacity(
        capacity in 1usize..32,
        keys in prop::collection::vec("[a-z]{1,4}", 0..200),
    ) {
        let l1 = LocalTierCache::new(capacity, Duration::from_secs(60));
        for key in &keys {
            l1.set(key, key.as_bytes().to_vec(), None).unwrap();
            prop_assert!(l1.len() <= capacity);
        }
        if let Some(last) = keys.last() {
            prop_assert_eq!(l1.get(last).unwrap(), Some(last.as_bytes().to_vec()));
        }
    }
}

// =============================================================================
// Tiered round trip
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn tiered_roundtrip(key in "[a-zA-Z0-9:_-]{1,64}", payload in payload_strategy()) {
        let rt = runtime();
        rt.block_on(async {
            let config = CacheConfig {
                redis_url: Some("redis://prop.test:6379".into()),
                compression_threshold: 256,
                l1_sweep_interval_secs: 0,
                ..Default::default()
            };
            let server = MemoryServer::new();
            let connector = Arc::new(InMemoryConnector::new(Arc::clone(&server)));
            let security = SecurityManager::new(config.security_config(), connector).unwrap();
            let cache = TieredCache::new(config, Arc::new(security)).unwrap();
            cache.connect().await.unwrap();

            cache.set(&key, payload.clone(), Duration::from_secs(60)).await.unwrap();
            assert_eq!(cache.get(&key).await.unwrap(), Some(payload.clone()));

            let stored = server.raw_entry(&key).unwrap();
            assert_eq!(stored.compressed, payload.len() >= 256);

            // Remote path
            cache.l1().clear();
            assert_eq!(cache.get(&key).await.unwrap(), Some(payload));
        });
    }
}

// =============================================================================
// Security scoring
// =============================================================================

fn strength(n: &NegotiatedSecurity) -> (bool, bool, bool, bool) {
    (n.auth_active(), n.acl_active(), n.tls_active(), n.certificate_verified())
}

proptest! {
    #[test]
    fn score_in_range_and_banded(negotiated in negotiated_strategy()) {
        let result = assessment::assess(&negotiated, 0);
        prop_assert!(result.score() <= 100);
        prop_assert_eq!(result.level(), SecurityLevel::from_score(result.score()));

        if !negotiated.auth_active() {
            prop_assert_eq!(result.level(), SecurityLevel::Insecure);
            prop_assert!(result.has_critical());
        }
        if negotiated.acl_active() && negotiated.tls_active() && negotiated.certificate_verified() {
            prop_assert_eq!(result.level(), SecurityLevel::Comprehensive);
        }
        prop_assert_eq!(result.vulnerabilities().len(), result.recommendations().len());
    }

    #[test]
    fn score_is_monotonic(a in negotiated_strategy(), b in negotiated_strategy()) {
        let (sa, sb) = (strength(&a), strength(&b));
        let dominates = (sa.0 >= sb.0) && (sa.1 >= sb.1) && (sa.2 >= sb.2) && (sa.3 >= sb.3)
            && (a.hostname_verified() >= b.hostname_verified());
        if dominates {
            prop_assert!(assessment::score(&a) >= assessment::score(&b));
        }
    }
}
