//! In-memory session state: per-run keygen init material and per-user server shares.
use std::{fmt, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    scheme::Scheme,
    signer::{InitMaterial, KeygenResult, RoomId},
    ttl_cache::{ReadPolicy, TtlCache},
};

/// How long an untouched share stays live.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Identifies the server share of one user for one scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShareKey {
    pub user_id: String,
    pub scheme: Scheme,
}

/// Identifies the init material of a single keygen run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InitKey {
    pub user_id: String,
    pub scheme: Scheme,
    pub room_id: RoomId,
}

pub fn share_key(user_id: &str, scheme: Scheme) -> ShareKey {
    ShareKey {
        user_id: user_id.to_string(),
        scheme,
    }
}

pub fn init_key(user_id: &str, scheme: Scheme, room_id: &RoomId) -> InitKey {
    InitKey {
        user_id: user_id.to_string(),
        scheme,
        room_id: room_id.clone(),
    }
}

impl fmt::Display for ShareKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UID:{}-SIGALG:{}", self.user_id, self.scheme)
    }
}

impl fmt::Display for InitKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UID:{}-SIGALG:{}-ROOMID:{}",
            self.user_id, self.scheme, self.room_id
        )
    }
}

/// The server's half of a generated key.
#[derive(Debug, Clone)]
pub struct ShareRecord {
    pub user_id: String,
    pub scheme: Scheme,
    pub share: Arc<KeygenResult>,
    pub created_at: DateTime<Utc>,
}

impl ShareRecord {
    pub fn new(user_id: &str, scheme: Scheme, share: KeygenResult) -> Self {
        Self {
            user_id: user_id.to_string(),
            scheme,
            share: Arc::new(share),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitRecord {
    pub material: Arc<InitMaterial>,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    pub ttl: Duration,
    pub capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

/// Owns both session caches. Cloning is cheap and shares the underlying state.
#[derive(Debug, Clone)]
pub struct SessionStore {
    shares: Arc<TtlCache<ShareKey, ShareRecord>>,
    inits: Arc<TtlCache<InitKey, InitRecord>>,
}

impl SessionStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            shares: Arc::new(TtlCache::new(
                config.ttl,
                config.capacity,
                ReadPolicy::Sliding,
            )),
            inits: Arc::new(TtlCache::new(
                config.ttl,
                config.capacity,
                ReadPolicy::Fixed,
            )),
        }
    }

    /// Replace whatever share is stored for the record's user and scheme.
    pub fn put_share(&self, record: ShareRecord) {
        let key = share_key(&record.user_id, record.scheme);
        self.shares.set(key, record);
    }

    /// Look up a live share, renewing its TTL.
    ///
    /// `None` covers a share that never existed, expired, or was evicted; callers cannot
    /// and should not tell these apart.
    pub fn get_share(&self, user_id: &str, scheme: Scheme) -> Option<ShareRecord> {
        self.shares.get(&share_key(user_id, scheme))
    }

    pub fn put_init(&self, key: InitKey, material: InitMaterial) {
        self.inits.set(
            key,
            InitRecord {
                material: Arc::new(material),
            },
        );
    }

    pub fn get_init(&self, key: &InitKey) -> Option<InitRecord> {
        self.inits.get(key)
    }

    /// Sweep expired entries from both caches, returning `(shares, inits)` removed.
    pub fn purge_expired(&self) -> (usize, usize) {
        (self.shares.purge_expired(), self.inits.purge_expired())
    }

    /// Shares currently held, including expired ones not yet purged.
    pub fn share_count(&self) -> usize {
        self.shares.entry_count()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{scheme::PublicKey, signer::SecretShare};
    use ed25519_dalek::SigningKey;
    use secp256kfun::proptest::prelude::*;
    use tokio::time::advance;

    fn keygen_result(seed: u8) -> KeygenResult {
        KeygenResult {
            pubkey: PublicKey::Ed25519(SigningKey::from_bytes(&[seed; 32]).verifying_key()),
            secret_share: SecretShare::new(vec![seed; 32]),
        }
    }

    fn store(ttl: Duration) -> SessionStore {
        SessionStore::new(StoreConfig {
            ttl,
            capacity: 16,
        })
    }

    #[test]
    fn put_then_get_returns_same_share() {
        let store = SessionStore::default();
        for scheme in Scheme::ALL {
            store.put_share(ShareRecord::new("u1", scheme, keygen_result(1)));
            let record = store.get_share("u1", scheme).expect("share stored");
            assert_eq!(*record.share, keygen_result(1));
            assert_eq!(record.scheme, scheme);
        }
        assert!(store.get_share("u2", Scheme::Ecdsa).is_none());
    }

    #[test]
    fn second_put_overwrites_first() {
        let store = SessionStore::default();
        store.put_share(ShareRecord::new("u1", Scheme::Ecdsa, keygen_result(1)));
        store.put_share(ShareRecord::new("u1", Scheme::Ecdsa, keygen_result(2)));

        let record = store.get_share("u1", Scheme::Ecdsa).unwrap();
        assert_eq!(*record.share, keygen_result(2));
        assert_eq!(store.share_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unread_share_expires() {
        let store = store(Duration::from_secs(10));
        store.put_share(ShareRecord::new("u1", Scheme::Ecdsa, keygen_result(1)));

        advance(Duration::from_secs(11)).await;
        assert!(store.get_share("u1", Scheme::Ecdsa).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn read_share_outlives_original_expiry() {
        let store = store(Duration::from_secs(10));
        store.put_share(ShareRecord::new("u1", Scheme::Ecdsa, keygen_result(1)));

        advance(Duration::from_secs(8)).await;
        assert!(store.get_share("u1", Scheme::Ecdsa).is_some());
        advance(Duration::from_secs(8)).await;
        assert!(store.get_share("u1", Scheme::Ecdsa).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn init_material_is_not_renewed_by_reads() {
        let store = store(Duration::from_secs(10));
        let key = init_key("u1", Scheme::Ed25519, &RoomId::from("room-1"));
        store.put_init(
            key.clone(),
            InitMaterial {
                keygen_id: "server-1".into(),
                payload: vec![1, 2, 3],
            },
        );

        advance(Duration::from_secs(8)).await;
        assert_eq!(
            store.get_init(&key).unwrap().material.keygen_id,
            "server-1"
        );
        advance(Duration::from_secs(8)).await;
        assert!(store.get_init(&key).is_none());
        assert_eq!(store.purge_expired(), (0, 0));
    }

    #[test]
    fn keys_render_for_logs() {
        let room = RoomId::from("r");
        assert_eq!(share_key("u", Scheme::Ecdsa).to_string(), "UID:u-SIGALG:ecdsa");
        assert_eq!(
            init_key("u", Scheme::Ed25519, &room).to_string(),
            "UID:u-SIGALG:ed25519-ROOMID:r"
        );
    }

    proptest! {
        #[test]
        fn init_keys_differ_by_room(user in any::<String>(), r1 in any::<String>(), r2 in any::<String>()) {
            prop_assume!(r1 != r2);
            for scheme in Scheme::ALL {
                prop_assert_ne!(
                    init_key(&user, scheme, &RoomId::from(r1.as_str())),
                    init_key(&user, scheme, &RoomId::from(r2.as_str()))
                );
            }
        }

        #[test]
        fn share_keys_only_depend_on_user_and_scheme(a in any::<String>(), b in any::<String>()) {
            prop_assert_eq!(share_key(&a, Scheme::Ecdsa), share_key(&a, Scheme::Ecdsa));
            prop_assert_ne!(share_key(&a, Scheme::Ecdsa), share_key(&a, Scheme::Ed25519));
            prop_assert_eq!(share_key(&a, Scheme::Ecdsa) == share_key(&b, Scheme::Ecdsa), a == b);
        }
    }
}
