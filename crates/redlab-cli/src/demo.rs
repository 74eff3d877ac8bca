//! Mock service showing the caching patterns.
//!
//! `get_user` is a cheap lookup cached as JSON with the fast TTL,
//! `run_prediction` an expensive computation cached as MessagePack with the
//! slow TTL, and `update_user` a write that invalidates `get_user`.

use parking_lot::Mutex;
use redlab_cache::{
    function_id, AsyncCacheLayer, CacheLayer, CacheOptions, FunctionId, Invalidation,
};
use redlab_core::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::info;

pub const GET_USER: FunctionId = function_id!(MockService::get_user);
pub const RUN_PREDICTION: FunctionId = function_id!(MockService::run_prediction);

/// Errors of the mock service.
#[derive(Error, Debug)]
pub enum DemoError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("User {0} not found")]
    UserNotFound(u64),

    #[error("Invalid update: {0}")]
    InvalidUpdate(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: u64,
    pub name: String,
    pub email: String,
}

/// Fields to change in [`MockService::update_user`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub model_id: String,
    pub prediction: Vec<f64>,
    pub confidence: f64,
    /// Weight per (feature name, input position). Has no JSON mapping.
    pub feature_weights: HashMap<(String, usize), f64>,
}

/// Shared fake backend: the "database" and the simulated latency.
struct Backend {
    delay: Duration,
    users: Mutex<HashMap<u64, UserProfile>>,
    computations: AtomicUsize,
}

impl Backend {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            users: Mutex::new(HashMap::new()),
            computations: AtomicUsize::new(0),
        }
    }

    fn load_user(&self, user_id: u64) -> Result<UserProfile, DemoError> {
        self.computations.fetch_add(1, Ordering::SeqCst);
        if user_id == 0 {
            return Err(DemoError::UserNotFound(user_id));
        }

        let stored = self.users.lock().get(&user_id).cloned();
        Ok(stored.unwrap_or_else(|| UserProfile {
            id: user_id,
            name: format!("User_{}", user_id),
            email: format!("user{}@example.com", user_id),
        }))
    }

    fn save_user(&self, user_id: u64, updates: UserUpdate) -> Result<UserProfile, DemoError> {
        if updates.name.as_deref().is_some_and(|name| name.trim().is_empty()) {
            return Err(DemoError::InvalidUpdate("name must not be empty".to_string()));
        }

        let mut user = self.load_user(user_id)?;
        if let Some(name) = updates.name {
            user.name = name;
        }
        if let Some(email) = updates.email {
            user.email = email;
        }
        self.users.lock().insert(user_id, user.clone());
        Ok(user)
    }

    fn predict(&self, model_id: &str, input: &[f64]) -> Prediction {
        self.computations.fetch_add(1, Ordering::SeqCst);
        let feature_weights = input
            .iter()
            .enumerate()
            .map(|(i, x)| ((format!("{}_f{}", model_id, i), i), x * 0.1))
            .collect();

        Prediction {
            model_id: model_id.to_string(),
            prediction: input.iter().map(|x| x * 0.5).collect(),
            confidence: 0.95,
            feature_weights,
        }
    }
}

fn user_invalidation() -> Invalidation<u64> {
    Invalidation::new().call_of(GET_USER, |user_id: &u64| (*user_id,))
}

/// Blocking mock service.
pub struct MockService {
    layer: CacheLayer,
    fast_ttl: Duration,
    slow_ttl: Duration,
    backend: Backend,
    invalidate_user: Invalidation<u64>,
}

impl MockService {
    pub fn new(layer: CacheLayer, fast_ttl: Duration, slow_ttl: Duration, delay: Duration) -> Self {
        Self {
            layer,
            fast_ttl,
            slow_ttl,
            backend: Backend::new(delay),
            invalidate_user: user_invalidation(),
        }
    }

    /// How many times a value was actually computed.
    pub fn computations(&self) -> usize {
        self.backend.computations.load(Ordering::SeqCst)
    }

    pub fn get_user(&self, user_id: u64) -> Result<UserProfile, DemoError> {
        self.layer.get_or_compute(
            GET_USER,
            &(user_id,),
            CacheOptions::json().with_ttl(self.fast_ttl),
            || {
                std::thread::sleep(self.backend.delay);
                self.backend.load_user(user_id)
            },
        )
    }

    pub fn run_prediction(&self, model_id: &str, input: &[f64]) -> Result<Prediction, DemoError> {
        self.layer.get_or_compute(
            RUN_PREDICTION,
            &(model_id, input),
            CacheOptions::msgpack().with_ttl(self.slow_ttl),
            || {
                // Inference is the slow path.
                std::thread::sleep(self.backend.delay * 4);
                Ok(self.backend.predict(model_id, input))
            },
        )
    }

    pub fn update_user(&self, user_id: u64, updates: UserUpdate) -> Result<UserProfile, DemoError> {
        self.layer.invalidate_after(&self.invalidate_user, &user_id, || {
            std::thread::sleep(self.backend.delay);
            self.backend.save_user(user_id, updates)
        })
    }
}

/// Async mock service.
pub struct AsyncMockService {
    layer: AsyncCacheLayer,
    fast_ttl: Duration,
    slow_ttl: Duration,
    backend: Backend,
    invalidate_user: Invalidation<u64>,
}

impl AsyncMockService {
    pub fn new(layer: AsyncCacheLayer, fast_ttl: Duration, slow_ttl: Duration, delay: Duration) -> Self {
        Self {
            layer,
            fast_ttl,
            slow_ttl,
            backend: Backend::new(delay),
            invalidate_user: user_invalidation(),
        }
    }

    pub fn computations(&self) -> usize {
        self.backend.computations.load(Ordering::SeqCst)
    }

    pub async fn get_user(&self, user_id: u64) -> Result<UserProfile, DemoError> {
        self.layer
            .get_or_compute(
                GET_USER,
                &(user_id,),
                CacheOptions::json().with_ttl(self.fast_ttl),
                || async {
                    tokio::time::sleep(self.backend.delay).await;
                    self.backend.load_user(user_id)
                },
            )
            .await
    }

    pub async fn run_prediction(&self, model_id: &str, input: &[f64]) -> Result<Prediction, DemoError> {
        self.layer
            .get_or_compute(
                RUN_PREDICTION,
                &(model_id, input),
                CacheOptions::msgpack().with_ttl(self.slow_ttl),
                || async {
                    tokio::time::sleep(self.backend.delay * 4).await;
                    Ok(self.backend.predict(model_id, input))
                },
            )
            .await
    }

    pub async fn update_user(&self, user_id: u64, updates: UserUpdate) -> Result<UserProfile, DemoError> {
        self.layer
            .invalidate_after(&self.invalidate_user, &user_id, || async {
                tokio::time::sleep(self.backend.delay).await;
                self.backend.save_user(user_id, updates)
            })
            .await
    }
}

const MODEL_ID: &str = "churn-v2";
const MODEL_INPUT: [f64; 3] = [1.0, 2.5, -4.0];

fn timed<T>(label: &str, started: Instant, value: &T)
where
    T: std::fmt::Debug,
{
    info!("{} took {:?}: {:?}", label, started.elapsed(), value);
}

/// Walks through hit, miss and invalidation with the blocking service.
pub fn run_sync(service: &MockService) -> Result<(), DemoError> {
    for round in 1..=2 {
        let started = Instant::now();
        let user = service.get_user(42)?;
        timed(&format!("get_user(42) round {}", round), started, &user);
    }

    for round in 1..=2 {
        let started = Instant::now();
        let prediction = service.run_prediction(MODEL_ID, &MODEL_INPUT)?;
        timed(&format!("run_prediction round {}", round), started, &prediction.prediction);
    }

    let started = Instant::now();
    let updated = service.update_user(
        42,
        UserUpdate {
            name: Some("Ada".to_string()),
            email: None,
        },
    )?;
    timed("update_user(42)", started, &updated);

    let started = Instant::now();
    let user = service.get_user(42)?;
    timed("get_user(42) after update", started, &user);

    info!("{} values computed", service.computations());
    Ok(())
}

/// Same walk-through with the async service.
pub async fn run_async(service: &AsyncMockService) -> Result<(), DemoError> {
    for round in 1..=2 {
        let started = Instant::now();
        let user = service.get_user(42).await?;
        timed(&format!("get_user(42) round {}", round), started, &user);
    }

    for round in 1..=2 {
        let started = Instant::now();
        let prediction = service.run_prediction(MODEL_ID, &MODEL_INPUT).await?;
        timed(&format!("run_prediction round {}", round), started, &prediction.prediction);
    }

    let started = Instant::now();
    let updated = service
        .update_user(
            42,
            UserUpdate {
                name: Some("Ada".to_string()),
                email: None,
            },
        )
        .await?;
    timed("update_user(42)", started, &updated);

    let started = Instant::now();
    let user = service.get_user(42).await?;
    timed("get_user(42) after update", started, &user);

    info!("{} values computed", service.computations());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use redlab_cache::{KeyBuilder, MemoryStore};
    use std::sync::Arc;

    fn service(store: Arc<MemoryStore>) -> MockService {
        let layer = CacheLayer::new(store, KeyBuilder::new("demo"), Some(Duration::from_secs(300)));
        MockService::new(layer, Duration::from_secs(60), Duration::from_secs(3600), Duration::ZERO)
    }

    fn async_service(store: Arc<MemoryStore>) -> AsyncMockService {
        let layer = AsyncCacheLayer::new(store, KeyBuilder::new("demo"), Some(Duration::from_secs(300)));
        AsyncMockService::new(layer, Duration::from_secs(60), Duration::from_secs(3600), Duration::ZERO)
    }

    #[test]
    fn test_get_user_expires_after_fast_ttl() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let first = service.get_user(42).unwrap();
        assert_eq!(first.name, "User_42");
        assert_eq!(service.computations(), 1);

        let second = service.get_user(42).unwrap();
        assert_eq!(second, first);
        assert_eq!(service.computations(), 1);

        store.advance(Duration::from_secs(61));
        service.get_user(42).unwrap();
        assert_eq!(service.computations(), 2);
    }

    #[test]
    fn test_prediction_uses_msgpack_and_slow_ttl() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());

        let first = service.run_prediction(MODEL_ID, &MODEL_INPUT).unwrap();
        assert_eq!(first.prediction, vec![0.5, 1.25, -2.0]);
        assert_eq!(first.feature_weights.len(), 3);

        store.advance(Duration::from_secs(1800));
        let second = service.run_prediction(MODEL_ID, &MODEL_INPUT).unwrap();
        assert_eq!(second, first);
        assert_eq!(service.computations(), 1);

        service.run_prediction(MODEL_ID, &[1.0]).unwrap();
        assert_eq!(service.computations(), 2);
    }

    #[test]
    fn test_update_user_invalidates_get_user() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store);

        service.get_user(42).unwrap();
        service.get_user(7).unwrap();
        let updated = service
            .update_user(
                42,
                UserUpdate {
                    name: Some("Ada".to_string()),
                    email: None,
                },
            )
            .unwrap();
        assert_eq!(updated.name, "Ada");

        let before = service.computations();
        assert_eq!(service.get_user(42).unwrap().name, "Ada");
        assert_eq!(service.computations(), before + 1);

        service.get_user(7).unwrap();
        assert_eq!(service.computations(), before + 1);
    }

    #[test]
    fn test_failed_update_leaves_cache_alone() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        let key = KeyBuilder::new("demo").derive(GET_USER, &(42_u64,)).unwrap();

        let cached = service.get_user(42).unwrap();
        assert!(store.ttl(key.as_str()).is_some());

        let rejected = UserUpdate {
            name: Some("  ".to_string()),
            email: None,
        };
        let err = service.update_user(42, rejected).unwrap_err();
        assert!(matches!(err, DemoError::InvalidUpdate(_)));

        assert!(store.ttl(key.as_str()).is_some());
        assert_eq!(service.get_user(42).unwrap(), cached);
        assert_eq!(service.computations(), 1);
    }

    #[test]
    fn test_store_outage_falls_back_to_backend() {
        let store = Arc::new(MemoryStore::new());
        let service = service(store.clone());
        store.set_available(false);

        service.get_user(42).unwrap();
        service.get_user(42).unwrap();
        assert_eq!(service.computations(), 2);
        service.update_user(42, UserUpdate::default()).unwrap();
    }

    #[test]
    fn test_sync_walkthrough() {
        let service = service(Arc::new(MemoryStore::new()));
        run_sync(&service).unwrap();
        // get_user, run_prediction, update_user's load, get_user after update
        assert_eq!(service.computations(), 4);
    }

    #[tokio::test]
    async fn test_async_walkthrough() {
        let store = Arc::new(MemoryStore::new());
        let service = async_service(store.clone());
        run_async(&service).await.unwrap();
        assert_eq!(service.computations(), 4);

        store.advance(Duration::from_secs(61));
        service.get_user(42).await.unwrap();
        assert_eq!(service.computations(), 5);
    }
}
