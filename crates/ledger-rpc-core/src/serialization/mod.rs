//! Serialization pipeline for RPC payloads.
//!
//! [`SerializationOptimizer`] caches per-type settings, reuses scratch
//! buffers, and frames byte payloads with an explicit compression flag.
//! Every optimized path is best-effort: if it fails, the same call is
//! retried with plain `serde_json` and [`SerializerSettings::BASELINE`].

mod buffer;
mod profile;
pub mod wire;

pub use profile::{KeyCase, SerializerSettings};

use std::any::{type_name, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::config::SerializationConfig;
use crate::error::CoreError;

use buffer::BufferPool;
use profile::{
    coerce_numeric_strings, strip_comments, struct_fields, TypeProfile,
};

// ==============================================================================
// Statistics
// ==============================================================================

#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SerializationStatistics {
    pub serializations: u64,
    pub deserializations: u64,
    pub bytes_processed: u64,
    pub bytes_saved: u64,
    pub compressed_payloads: u64,
    pub fallbacks: u64,
    pub profile_cache_hits: u64,
    pub profile_cache_misses: u64,
    pub profile_cache_clears: u64,
}

#[derive(Default)]
struct SerializationCounters {
    serializations: AtomicU64,
    deserializations: AtomicU64,
    bytes_processed: AtomicU64,
    bytes_saved: AtomicU64,
    compressed_payloads: AtomicU64,
    fallbacks: AtomicU64,
    profile_cache_hits: AtomicU64,
    profile_cache_misses: AtomicU64,
    profile_cache_clears: AtomicU64,
}

impl SerializationCounters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SerializationStatistics {
        SerializationStatistics {
            serializations: self.serializations.load(Ordering::Relaxed),
            deserializations: self.deserializations.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            bytes_saved: self.bytes_saved.load(Ordering::Relaxed),
            compressed_payloads: self.compressed_payloads.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            profile_cache_hits: self.profile_cache_hits.load(Ordering::Relaxed),
            profile_cache_misses: self.profile_cache_misses.load(Ordering::Relaxed),
            profile_cache_clears: self.profile_cache_clears.load(Ordering::Relaxed),
        }
    }
}

/// Failure inside an optimized path. Never leaves this module: callers
/// see either the optimized result or the baseline one.
#[derive(Debug, thiserror::Error)]
enum OptimizeError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

// ==============================================================================
// Optimizer
// ==============================================================================

#[derive(Debug, Clone, Copy)]
struct Registration {
    settings: SerializerSettings,
    fields: &'static [&'static str],
}

pub struct SerializationOptimizer {
    config: SerializationConfig,
    overrides: RwLock<HashMap<TypeId, Registration>>,
    profiles: RwLock<HashMap<TypeId, Arc<TypeProfile>>>,
    buffers: BufferPool,
    counters: SerializationCounters,
}

impl SerializationOptimizer {
    pub fn new(config: SerializationConfig) -> Self {
        let buffers = BufferPool::new(config.buffer_pool_size);
        Self {
            config,
            overrides: RwLock::new(HashMap::new()),
            profiles: RwLock::new(HashMap::new()),
            buffers,
            counters: SerializationCounters::default(),
        }
    }

    /// Use `settings` for `T` instead of [`SerializerSettings::default`].
    ///
    /// Key case and null omission apply to `T`'s own fields only; nested
    /// structs and map contents are written exactly as serde produces them.
    pub fn register<T: DeserializeOwned + 'static>(&self, settings: SerializerSettings) {
        let registration = Registration {
            settings,
            fields: struct_fields::<T>(),
        };
        if let Ok(mut overrides) = self.overrides.write() {
            overrides.insert(TypeId::of::<T>(), registration);
        }
        // Drop a stale cached profile so the new settings apply.
        if let Ok(mut profiles) = self.profiles.write() {
            profiles.remove(&TypeId::of::<T>());
        }
    }

    pub fn statistics(&self) -> SerializationStatistics {
        self.counters.snapshot()
    }

    // ------------------------------------------------------------------------
    // Text / unframed JSON
    // ------------------------------------------------------------------------

    /// Serialize `value` to JSON bytes without framing (HTTP bodies).
    pub fn to_json_vec<T: Serialize + 'static>(&self, value: &T) -> Result<Vec<u8>, CoreError> {
        let out = match self.serialize_optimized(value) {
            Ok(out) => out,
            Err(err) => self.serialize_baseline(value, &err)?,
        };
        SerializationCounters::bump(&self.counters.serializations, 1);
        SerializationCounters::bump(&self.counters.bytes_processed, out.len() as u64);
        Ok(out)
    }

    pub fn to_json_string<T: Serialize + 'static>(&self, value: &T) -> Result<String, CoreError> {
        let bytes = self.to_json_vec(value)?;
        String::from_utf8(bytes)
            .map_err(|e| CoreError::Serialization(format!("serializer produced invalid UTF-8: {e}")))
    }

    pub fn from_json_slice<T: DeserializeOwned + 'static>(
        &self,
        bytes: &[u8],
    ) -> Result<T, CoreError> {
        SerializationCounters::bump(&self.counters.deserializations, 1);
        SerializationCounters::bump(&self.counters.bytes_processed, bytes.len() as u64);
        match self.deserialize_optimized(bytes) {
            Ok(value) => Ok(value),
            Err(err) => self.deserialize_baseline(bytes, &err),
        }
    }

    pub fn from_json_str<T: DeserializeOwned + 'static>(&self, text: &str) -> Result<T, CoreError> {
        self.from_json_slice(text.as_bytes())
    }

    // ------------------------------------------------------------------------
    // Framed bytes
    // ------------------------------------------------------------------------

    /// Serialize `value` into a flagged frame, compressing it when the JSON
    /// body is at least `compression_threshold` bytes.
    pub fn encode<T: Serialize + 'static>(&self, value: &T) -> Result<Vec<u8>, CoreError> {
        let body = self.to_json_vec(value)?;
        let compress =
            self.config.enable_compression && body.len() >= self.config.compression_threshold;
        let frame = wire::encode(&body, compress);

        if compress {
            let saved = (body.len() + 1).saturating_sub(frame.len()) as u64;
            SerializationCounters::bump(&self.counters.compressed_payloads, 1);
            SerializationCounters::bump(&self.counters.bytes_saved, saved);
            trace!(
                payload = type_name::<T>(),
                raw_len = body.len(),
                frame_len = frame.len(),
                "compressed payload"
            );
        }
        Ok(frame)
    }

    /// Inverse of [`encode`](Self::encode).
    pub fn decode<T: DeserializeOwned + 'static>(&self, frame: &[u8]) -> Result<T, CoreError> {
        let body = wire::decode(frame)
            .map_err(|e| CoreError::Serialization(format!("invalid frame: {e}")))?;
        self.from_json_slice(&body)
    }

    // ------------------------------------------------------------------------
    // Optimized and baseline paths
    // ------------------------------------------------------------------------

    fn profile_for<T: 'static>(&self) -> Result<Arc<TypeProfile>, OptimizeError> {
        let type_id = TypeId::of::<T>();
        {
            let profiles = self
                .profiles
                .read()
                .map_err(|_| OptimizeError::Poisoned("profile cache"))?;
            if let Some(profile) = profiles.get(&type_id) {
                SerializationCounters::bump(&self.counters.profile_cache_hits, 1);
                return Ok(Arc::clone(profile));
            }
        }

        SerializationCounters::bump(&self.counters.profile_cache_misses, 1);
        let (settings, fields) = self
            .overrides
            .read()
            .map_err(|_| OptimizeError::Poisoned("settings registry"))?
            .get(&type_id)
            .map(|r| (r.settings, r.fields))
            .unwrap_or_default();
        let profile = Arc::new(TypeProfile::new(type_name::<T>(), settings, fields));
        trace!(payload = profile.type_name, ?settings, "resolved serializer profile");

        let mut profiles = self
            .profiles
            .write()
            .map_err(|_| OptimizeError::Poisoned("profile cache"))?;
        let limit = self.config.max_cached_types + self.config.max_cached_types / 2;
        if profiles.len() >= limit.max(1) {
            debug!(entries = profiles.len(), "clearing serializer profile cache");
            profiles.clear();
            SerializationCounters::bump(&self.counters.profile_cache_clears, 1);
        }
        Ok(Arc::clone(profiles.entry(type_id).or_insert(profile)))
    }

    fn serialize_optimized<T: Serialize + 'static>(
        &self,
        value: &T,
    ) -> Result<Vec<u8>, OptimizeError> {
        let profile = self.profile_for::<T>()?;
        let mut scratch = self
            .buffers
            .take(profile.size_hint())
            .ok_or(OptimizeError::Poisoned("buffer pool"))?;

        let written = if profile.settings.rewrites_output() {
            serde_json::to_value(value)
                .map(|tree| profile.rewrite_output(tree))
                .and_then(|tree| serde_json::to_writer(&mut scratch, &tree))
        } else {
            serde_json::to_writer(&mut scratch, value)
        };
        if let Err(err) = written {
            self.buffers.give(scratch);
            return Err(err.into());
        }

        profile.observe_size(scratch.len());
        let out = scratch.as_slice().to_vec();
        self.buffers.give(scratch);
        Ok(out)
    }

    fn deserialize_optimized<T: DeserializeOwned + 'static>(
        &self,
        bytes: &[u8],
    ) -> Result<T, OptimizeError> {
        let profile = self.profile_for::<T>()?;
        let settings = profile.settings;

        // Renamed keys must be mapped back before any typed parse: a strict
        // parse of renamed input can succeed by defaulting `Option` fields.
        if settings.key_case == KeyCase::AsIs {
            let strict = serde_json::from_slice::<T>(bytes);
            if strict.is_ok() || !settings.permissive {
                return strict.map_err(Into::into);
            }
        }

        let cleaned = if settings.permissive {
            strip_comments(bytes)
        } else {
            None
        };
        let mut tree: Value = serde_json::from_slice(cleaned.as_deref().unwrap_or(bytes))?;
        if settings.key_case != KeyCase::AsIs {
            tree = profile.normalize_input_keys(tree);
        }
        if settings.permissive {
            if let Ok(value) = T::deserialize(&tree) {
                return Ok(value);
            }
            tree = coerce_numeric_strings(tree);
        }
        Ok(T::deserialize(tree)?)
    }

    fn serialize_baseline<T: Serialize + 'static>(
        &self,
        value: &T,
        cause: &OptimizeError,
    ) -> Result<Vec<u8>, CoreError> {
        SerializationCounters::bump(&self.counters.fallbacks, 1);
        debug!(
            payload = type_name::<T>(),
            error = %cause,
            "optimized serialization failed; using baseline"
        );
        serde_json::to_vec(value)
            .map_err(|e| CoreError::Serialization(format!("serialize {}: {e}", type_name::<T>())))
    }

    fn deserialize_baseline<T: DeserializeOwned + 'static>(
        &self,
        bytes: &[u8],
        cause: &OptimizeError,
    ) -> Result<T, CoreError> {
        SerializationCounters::bump(&self.counters.fallbacks, 1);
        debug!(
            payload = type_name::<T>(),
            error = %cause,
            "optimized deserialization failed; using baseline"
        );
        serde_json::from_slice(bytes)
            .map_err(|e| CoreError::Serialization(format!("deserialize {}: {e}", type_name::<T>())))
    }
}

impl Default for SerializationOptimizer {
    fn default() -> Self {
        Self::new(SerializationConfig::default())
    }
}
