//! Request coordination: one live request per URL, cache-first reads and
//! envelope unwrapping.
//!
//! Starting a request against a URL that already has one in flight cancels
//! the older request (last writer wins). Every request is registered with a
//! generation number; only the request that is still current for its URL
//! may write the cache, and only it may remove its own registry entry.
//! A cache write is also dropped when the key was invalidated while the
//! request was in flight, so a read that started before a mutation never
//! re-caches pre-mutation data.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStore, Reservation};
use crate::error::{ForumError, Result};
use crate::models::Envelope;
use crate::transport::ApiResponse;

struct InFlight {
    generation: u64,
    token: CancellationToken,
}

pub struct RequestCoordinator {
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_generation: AtomicU64,
    cache: Arc<CacheStore>,
}

/// Removes the registry entry when the request settles or is dropped,
/// unless a newer request has taken the URL over.
struct Registration<'a> {
    coordinator: &'a RequestCoordinator,
    url: &'a str,
    generation: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.coordinator.lock();
        let current = in_flight.get(self.url).map(|f| f.generation);
        if current == Some(self.generation) {
            in_flight.remove(self.url);
        }
    }
}

impl RequestCoordinator {
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self {
            in_flight: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            cache,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, InFlight>> {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register<'a>(&'a self, url: &'a str) -> (Registration<'a>, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();

        let previous = self.lock().insert(
            url.to_string(),
            InFlight {
                generation,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            tracing::debug!(url, superseded = previous.generation, "cancelling in-flight request");
            previous.token.cancel();
        }

        let registration = Registration {
            coordinator: self,
            url,
            generation,
        };
        (registration, token)
    }

    /// Runs `request` for `url` and unwraps the `{status, message, data}` envelope.
    ///
    /// With a `cache_key`, a live cache entry is returned without calling
    /// `request`, and fresh data is stored under that key on success.
    pub async fn fetch<T, F, Fut>(&self, url: &str, request: F, cache_key: Option<&str>) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResponse>>,
    {
        let (registration, token) = self.register(url);

        if let Some(key) = cache_key {
            if let Some(hit) = self.cache.get::<T>(key)? {
                tracing::debug!(url, key, "cache hit");
                return Ok(hit);
            }
        }
        let reservation = cache_key.map(|key| self.cache.reserve(key));

        let response = tokio::select! {
            biased;
            _ = token.cancelled() => {
                return Err(ForumError::Aborted { url: url.to_string() });
            }
            response = request() => response?,
        };

        let data = unwrap_envelope(url, &response)?;
        let parsed: T = serde_json::from_value(data.clone())?;

        if let Some(reservation) = reservation {
            self.commit(&registration, reservation, data)?;
        }

        Ok(parsed)
    }

    // Writes the cache only while this request is still the current one for its URL.
    // An invalidation during the request leaves the cache untouched but the data
    // still goes back to the caller.
    fn commit(&self, registration: &Registration<'_>, reservation: Reservation<'_>, data: Value) -> Result<()> {
        let in_flight = self.lock();
        let current = in_flight.get(registration.url).map(|f| f.generation);
        if current != Some(registration.generation) {
            tracing::debug!(url = registration.url, "superseded response discarded");
            return Err(ForumError::Aborted {
                url: registration.url.to_string(),
            });
        }

        if !reservation.commit(data) {
            tracing::debug!(url = registration.url, "response not cached, key invalidated meanwhile");
        }
        Ok(())
    }

    /// Cancels every tracked request and forgets them.
    pub fn cancel_all(&self) {
        let mut in_flight = self.lock();
        for (url, request) in in_flight.drain() {
            tracing::debug!(url = %url, "cancelling request");
            request.token.cancel();
        }
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_in_flight(&self, url: &str) -> bool {
        self.lock().contains_key(url)
    }
}

fn unwrap_envelope(url: &str, response: &ApiResponse) -> Result<Value> {
    let envelope: Envelope<Value> = serde_json::from_str(&response.body)?;

    if !envelope.is_success() {
        let message = if envelope.message.is_empty() {
            format!("request failed with status {}", response.status)
        } else {
            envelope.message
        };
        tracing::warn!(url, status = response.status, %message, "API request failed");
        return Err(ForumError::Api(message));
    }

    envelope.data.ok_or_else(|| ForumError::Api("no data found".to_string()))
}
