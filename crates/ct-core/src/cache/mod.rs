//! Cache de artifacts direccionada por contenido.
//!
//! - Clave: fingerprint de nodo (ver `model::fingerprint`); valor: el
//!   `ArtifactBundle` con todas las salidas del nodo.
//! - `get_or_compute` garantiza a lo sumo un cómputo concurrente por clave:
//!   el primer llamador es "líder" y el resto se suscribe a su resultado.
//! - Presupuesto en bytes con expulsión LRU; las entradas fijadas (`pin`)
//!   nunca se expulsan. Los bundles se entregan como `Arc`, por lo que una
//!   expulsión no invalida a quien los esté usando.
//! - Los errores de cómputo no se cachean.

mod inflight;
mod store;

pub use store::{ArtifactStore, InMemoryArtifactStore, JsonDirStore, StoreError};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::mapref::entry::Entry as FlightEntry;
use dashmap::DashMap;
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::DEFAULT_CACHE_BUDGET_BYTES;
use crate::errors::{StageError, StageExecutionError};
use crate::model::ArtifactBundle;
use inflight::{FlightResult, InFlight};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub budget_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { budget_bytes: DEFAULT_CACHE_BUDGET_BYTES }
    }
}

/// De dónde salió el bundle devuelto por `get_or_compute`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSource {
    Computed,
    Memory,
    Store,
    Coalesced,
}

impl CacheSource {
    pub fn is_hit(self) -> bool {
        !matches!(self, CacheSource::Computed)
    }
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub bundle: Arc<ArtifactBundle>,
    pub source: CacheSource,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub store_hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: u64,
}

struct Entry {
    bundle: Arc<ArtifactBundle>,
    bytes: u64,
}

#[derive(Default)]
struct CacheState {
    // orden de inserción = orden LRU (frente = menos reciente)
    entries: IndexMap<String, Entry>,
    pins: HashMap<String, usize>,
    bytes: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    store_hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    evictions: AtomicU64,
}

pub struct ArtifactCache {
    config: CacheConfig,
    state: Mutex<CacheState>,
    in_flight: DashMap<String, Arc<InFlight>>,
    store: Option<Arc<dyn ArtifactStore>>,
    counters: Counters,
}

impl std::fmt::Debug for ArtifactCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactCache")
         .field("config", &self.config)
         .field("stats", &self.stats())
         .field("persistent", &self.store.is_some())
         .finish()
    }
}

impl Default for ArtifactCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ArtifactCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config,
               state: Mutex::new(CacheState::default()),
               in_flight: DashMap::new(),
               store: None,
               counters: Counters::default() }
    }

    /// Agrega un almacén persistente consultado tras un fallo en memoria y
    /// alimentado con cada bundle calculado.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Devuelve el bundle de `fingerprint`, calculándolo con `compute` sólo
    /// si no está en memoria, ni en el almacén, ni siendo calculado por otro
    /// llamador.
    pub fn get_or_compute<F>(&self, fingerprint: &str, compute: F) -> Result<CacheLookup, StageExecutionError>
        where F: FnOnce() -> Result<ArtifactBundle, StageExecutionError>
    {
        if let Some(bundle) = self.touch(fingerprint) {
            return Ok(self.hit(fingerprint, bundle));
        }

        let claim = match self.in_flight.entry(fingerprint.to_string()) {
            FlightEntry::Occupied(o) => Err(o.get().clone()),
            FlightEntry::Vacant(v) => {
                let slot = Arc::new(InFlight::new());
                v.insert(slot.clone());
                Ok(slot)
            }
        };
        let slot = match claim {
            Ok(slot) => slot,
            Err(slot) => {
                self.counters.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("cache: waiting on in-flight computation {fingerprint}");
                return slot.wait().map(|bundle| CacheLookup { bundle,
                                                              source: CacheSource::Coalesced });
            }
        };
        let mut leader = Leadership { cache: self,
                                      key: fingerprint,
                                      slot,
                                      published: false };

        // otro líder pudo terminar entre el primer chequeo y el claim
        if let Some(bundle) = self.touch(fingerprint) {
            leader.publish(Ok(bundle.clone()));
            return Ok(self.hit(fingerprint, bundle));
        }

        if let Some(bundle) = self.load_from_store(fingerprint) {
            let bundle = self.insert(fingerprint, bundle);
            leader.publish(Ok(bundle.clone()));
            self.counters.store_hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache: store hit {fingerprint}");
            return Ok(CacheLookup { bundle,
                                    source: CacheSource::Store });
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!("cache: miss {fingerprint}");
        match compute() {
            Ok(bundle) => {
                let bundle = self.insert(fingerprint, bundle);
                if let Some(store) = &self.store {
                    if let Err(e) = store.put(fingerprint, &bundle) {
                        warn!("cache: could not persist {fingerprint}: {e}");
                    }
                }
                leader.publish(Ok(bundle.clone()));
                Ok(CacheLookup { bundle,
                                 source: CacheSource::Computed })
            }
            Err(e) => {
                leader.publish(Err(e.clone()));
                Err(e)
            }
        }
    }

    fn hit(&self, fingerprint: &str, bundle: Arc<ArtifactBundle>) -> CacheLookup {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        debug!("cache: hit {fingerprint}");
        CacheLookup { bundle,
                      source: CacheSource::Memory }
    }

    fn load_from_store(&self, fingerprint: &str) -> Option<ArtifactBundle> {
        let store = self.store.as_ref()?;
        match store.get(fingerprint) {
            Ok(found) => found,
            Err(e) => {
                warn!("cache: store lookup failed for {fingerprint}: {e}");
                None
            }
        }
    }

    /// Lookup en memoria que además refresca la posición LRU.
    fn touch(&self, fingerprint: &str) -> Option<Arc<ArtifactBundle>> {
        let mut state = self.lock();
        let index = state.entries.get_index_of(fingerprint)?;
        let last = state.entries.len() - 1;
        state.entries.move_index(index, last);
        state.entries.get_index(last).map(|(_, e)| e.bundle.clone())
    }

    fn insert(&self, fingerprint: &str, bundle: ArtifactBundle) -> Arc<ArtifactBundle> {
        let mut state = self.lock();
        if let Some(existing) = state.entries.get(fingerprint) {
            return existing.bundle.clone();
        }
        let bytes = bundle.size_bytes();
        let bundle = Arc::new(bundle);
        state.entries.insert(fingerprint.to_string(),
                             Entry { bundle: bundle.clone(),
                                     bytes });
        state.bytes += bytes;
        self.evict_locked(&mut state, Some(fingerprint));
        bundle
    }

    /// Expulsa entradas LRU no fijadas hasta respetar el presupuesto.
    /// Devuelve la cantidad expulsada.
    fn evict_locked(&self, state: &mut CacheState, protect: Option<&str>) -> usize {
        let mut evicted = 0;
        while state.bytes > self.config.budget_bytes {
            let victim = state.entries
                              .keys()
                              .position(|k| Some(k.as_str()) != protect && !state.pins.contains_key(k));
            let Some(index) = victim else {
                warn!("cache over budget ({} > {} bytes) but every remaining entry is pinned",
                      state.bytes,
                      self.config.budget_bytes);
                break;
            };
            if let Some((key, entry)) = state.entries.shift_remove_index(index) {
                state.bytes = state.bytes.saturating_sub(entry.bytes);
                evicted += 1;
                debug!("cache: evicted {key} ({} bytes)", entry.bytes);
            }
        }
        self.counters.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }

    pub fn evict_to_budget(&self) -> usize {
        let mut state = self.lock();
        self.evict_locked(&mut state, None)
    }

    /// Lookup en memoria (refresca LRU). No consulta el almacén persistente.
    pub fn get(&self, fingerprint: &str) -> Option<Arc<ArtifactBundle>> {
        self.touch(fingerprint)
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.lock().entries.contains_key(fingerprint)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vacía la memoria salvo las entradas fijadas.
    pub fn clear(&self) {
        let mut state = self.lock();
        let CacheState { entries, pins, bytes } = &mut *state;
        entries.retain(|k, _| pins.contains_key(k));
        *bytes = entries.values().map(|e| e.bytes).sum();
    }

    /// Fija `fingerprint` (exista o no todavía) mientras viva el guard.
    pub fn pin(self: &Arc<Self>, fingerprint: &str) -> PinGuard {
        *self.lock().pins.entry(fingerprint.to_string()).or_insert(0) += 1;
        PinGuard { cache: Arc::clone(self),
                   fingerprint: fingerprint.to_string() }
    }

    pub fn is_pinned(&self, fingerprint: &str) -> bool {
        self.lock().pins.contains_key(fingerprint)
    }

    fn unpin(&self, fingerprint: &str) {
        let mut state = self.lock();
        if let Some(count) = state.pins.get_mut(fingerprint) {
            *count -= 1;
            if *count == 0 {
                state.pins.remove(fingerprint);
            }
        }
        self.evict_locked(&mut state, None);
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let state = self.lock();
            (state.entries.len(), state.bytes)
        };
        CacheStats { hits: self.counters.hits.load(Ordering::Relaxed),
                     store_hits: self.counters.store_hits.load(Ordering::Relaxed),
                     misses: self.counters.misses.load(Ordering::Relaxed),
                     coalesced: self.counters.coalesced.load(Ordering::Relaxed),
                     evictions: self.counters.evictions.load(Ordering::Relaxed),
                     entries,
                     bytes }
    }
}

/// Mantiene fijada una entrada; al soltarse se re-aplica el presupuesto.
pub struct PinGuard {
    cache: Arc<ArtifactCache>,
    fingerprint: String,
}

impl PinGuard {
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
}

impl std::fmt::Debug for PinGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PinGuard").field(&self.fingerprint).finish()
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.cache.unpin(&self.fingerprint);
    }
}

/// Liderazgo sobre un slot en curso. Al soltarse quita el slot de la tabla;
/// si el líder no llegó a publicar (p.ej. pánico en `compute`) los
/// suscriptores reciben un error en lugar de quedar bloqueados.
struct Leadership<'c> {
    cache: &'c ArtifactCache,
    key: &'c str,
    slot: Arc<InFlight>,
    published: bool,
}

impl Leadership<'_> {
    fn publish(&mut self, result: FlightResult) {
        self.slot.publish(result);
        self.published = true;
    }
}

impl Drop for Leadership<'_> {
    fn drop(&mut self) {
        if !self.published {
            let error = StageError::Panicked("computation abandoned by its leader".into());
            self.slot.publish(Err(StageExecutionError::new("<unknown>", Value::Null, self.key, error)));
        }
        let slot = &self.slot;
        self.cache.in_flight.remove_if(self.key, |_, current| Arc::ptr_eq(current, slot));
    }
}
