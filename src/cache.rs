// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
//! Streaming cache for preview bodies.
//!
//! Bodies live in a pak file on (possibly slow) storage. Callers ask for them
//! with [`StreamingPreviewCache::prefetch`], which only enqueues a request; a
//! single background loader performs the aligned reads, decodes, and publishes
//! complete entries. Readers see an entry only once it is fully decoded.
//! Resident bytes are bounded by the current [`CardGrade`] ceiling with LRU
//! eviction.

mod error;
mod loader;
mod pak;

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::grade::{CardGrade, SharedGrade};
use crate::pcm::PcmSlice;
use crate::SampleId;

pub use error::PakError;
use loader::{LoaderHandle, ReadRequest};
pub use pak::{PakIndex, PakRecord, BLOCK_SIZE, BODY_SAMPLE_RATE};

/// Requests beyond this many outstanding reads are dropped.
const REQUEST_QUEUE_CAPACITY: usize = 256;

/// A decoded, fully resident preview body.
#[derive(Clone, Debug)]
pub struct BodyBuffer {
    pcm: PcmSlice,
    gain: f32,
}

impl BodyBuffer {
    pub fn pcm(&self) -> &PcmSlice {
        &self.pcm
    }

    pub fn frames(&self) -> usize {
        self.pcm.frames()
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    fn bytes(&self) -> usize {
        self.pcm.frames() * std::mem::size_of::<i16>()
    }
}

struct CacheEntry {
    /// Set once decode is complete; never partially filled.
    body: Option<BodyBuffer>,
    loading: bool,
    last_access: AtomicU64,
}

/// State shared between callers and the loader thread.
pub(crate) struct CacheShared {
    entries: RwLock<HashMap<SampleId, CacheEntry>>,
    /// Ids requested but not yet finished by the loader.
    pending: Mutex<HashSet<SampleId>>,
    resident_bytes: AtomicUsize,
    access_clock: AtomicU64,
    hits: AtomicUsize,
    misses: AtomicUsize,
    grade: SharedGrade,
}

impl CacheShared {
    fn new(grade: SharedGrade) -> CacheShared {
        CacheShared {
            entries: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            resident_bytes: AtomicUsize::new(0),
            access_clock: AtomicU64::new(0),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            grade,
        }
    }

    fn tick(&self) -> u64 {
        self.access_clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Marks `id` as loading. Loader thread only.
    fn begin_load(&self, id: SampleId) {
        let stamp = self.tick();
        self.entries.write().entry(id).or_insert_with(|| CacheEntry {
            body: None,
            loading: true,
            last_access: AtomicU64::new(stamp),
        });
    }

    /// Publishes a completed body and evicts down to the current ceiling.
    /// Loader thread only.
    fn publish(&self, id: SampleId, body: BodyBuffer) {
        let stamp = self.tick();
        let ceiling = self.grade.get().cache_ceiling_bytes();
        let added = body.bytes();

        let mut entries = self.entries.write();
        let entry = entries.entry(id).or_insert_with(|| CacheEntry {
            body: None,
            loading: true,
            last_access: AtomicU64::new(stamp),
        });
        let replaced = entry.body.replace(body).map_or(0, |old| old.bytes());
        entry.loading = false;
        entry.last_access.store(stamp, Ordering::Relaxed);

        let mut resident = self.resident_bytes.load(Ordering::Relaxed) + added - replaced;
        if resident > ceiling {
            let mut victims: Vec<(u64, SampleId)> = entries
                .iter()
                .filter(|(_, e)| !e.loading && e.body.is_some())
                .map(|(&victim, e)| (e.last_access.load(Ordering::Relaxed), victim))
                .collect();
            victims.sort_unstable();
            for (_, victim) in victims {
                if resident <= ceiling {
                    break;
                }
                if let Some(evicted) = entries.remove(&victim).and_then(|e| e.body) {
                    resident -= evicted.bytes();
                    debug!(id = victim, bytes = evicted.bytes(), "Evicted preview body");
                }
            }
        }
        self.resident_bytes.store(resident, Ordering::Relaxed);
    }

    /// Drops a failed load so a later prefetch can retry. Loader thread only.
    fn abandon(&self, id: SampleId) {
        let mut entries = self.entries.write();
        if entries.get(&id).is_some_and(|e| e.loading) {
            entries.remove(&id);
        }
    }

    fn finish_request(&self, id: SampleId) {
        self.pending.lock().remove(&id);
    }

    fn clear(&self) {
        self.entries.write().clear();
        self.pending.lock().clear();
        self.resident_bytes.store(0, Ordering::Relaxed);
    }
}

/// An open pak: its index plus the queue feeding the loader.
struct OpenPak {
    index: PakIndex,
    requests: Sender<ReadRequest>,
}

/// Bounded, asynchronously populated LRU cache of preview bodies.
pub struct StreamingPreviewCache {
    shared: Arc<CacheShared>,
    pak: RwLock<Option<OpenPak>>,
    loader: Mutex<Option<LoaderHandle>>,
}

impl StreamingPreviewCache {
    /// Creates an inert cache. Nothing is resident until a pak is opened.
    pub fn new(grade: SharedGrade) -> StreamingPreviewCache {
        StreamingPreviewCache {
            shared: Arc::new(CacheShared::new(grade)),
            pak: RwLock::new(None),
            loader: Mutex::new(None),
        }
    }

    /// Opens a pak file and starts the loader. On failure the cache stays inert.
    pub fn open(&self, path: &Path) -> Result<(), PakError> {
        self.close();
        let file = File::open(path).map_err(|e| {
            warn!(path = ?path, error = %e, "Unable to open preview pak");
            PakError::Io(e)
        })?;
        self.open_reader(file).inspect_err(|e| {
            warn!(path = ?path, error = %e, "Preview pak rejected; previews limited to stubs");
        })?;
        info!(path = ?path, bodies = self.body_count(), "Preview pak opened");
        Ok(())
    }

    /// Opens any seekable body store and starts the loader over it.
    pub fn open_reader<R>(&self, mut reader: R) -> Result<(), PakError>
    where
        R: Read + Seek + Send + 'static,
    {
        self.close();
        let index = PakIndex::read_from(&mut reader)?;
        let (requests, queue) = crossbeam_channel::bounded(REQUEST_QUEUE_CAPACITY);
        let handle =
            LoaderHandle::spawn(reader, queue, self.shared.clone()).map_err(PakError::Spawn)?;

        *self.pak.write() = Some(OpenPak { index, requests });
        *self.loader.lock() = Some(handle);
        Ok(())
    }

    /// Stops the loader, waits for it, and drops every cached body.
    pub fn close(&self) {
        let open = self.pak.write().take();
        let handle = self.loader.lock().take();
        if let Some(handle) = handle {
            handle.stop();
        }
        drop(open);
        self.shared.clear();
    }

    pub fn is_open(&self) -> bool {
        self.pak.read().is_some()
    }

    /// Number of bodies listed in the open pak.
    pub fn body_count(&self) -> usize {
        self.pak.read().as_ref().map_or(0, |open| open.index.len())
    }

    /// True if the open pak lists a body for `id`, resident or not.
    pub fn has_body(&self, id: SampleId) -> bool {
        self.pak
            .read()
            .as_ref()
            .is_some_and(|open| open.index.get(id).is_some())
    }

    /// Enqueues a body read for `id`. Unknown, resident, and in-flight ids are
    /// ignored. Never waits on storage.
    pub fn prefetch(&self, id: SampleId) {
        let pak = self.pak.read();
        let Some(open) = pak.as_ref() else {
            return;
        };
        let Some(record) = open.index.get(id).copied() else {
            return;
        };
        if self.shared.entries.read().contains_key(&id) {
            return;
        }
        if !self.shared.pending.lock().insert(id) {
            return;
        }

        let request = ReadRequest {
            record,
            requested_at: Instant::now(),
        };
        match open.requests.try_send(request) {
            Ok(()) => debug!(id, "Preview body requested"),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.shared.pending.lock().remove(&id);
                debug!(id, "Preview request queue unavailable; request dropped");
            }
        }
    }

    /// Returns the resident body for `id`. Never blocks: if the loader holds the
    /// map at this instant the lookup counts as a miss.
    pub fn body(&self, id: SampleId) -> Option<BodyBuffer> {
        let Some(entries) = self.shared.entries.try_read() else {
            self.shared.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        match entries.get(&id) {
            Some(entry) if !entry.loading => {
                let body = entry.body.clone()?;
                entry
                    .last_access
                    .store(self.shared.tick(), Ordering::Relaxed);
                self.shared.hits.fetch_add(1, Ordering::Relaxed);
                Some(body)
            }
            _ => {
                self.shared.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// True if a complete body for `id` is resident. Does not touch LRU order.
    pub fn is_resident(&self, id: SampleId) -> bool {
        self.shared
            .entries
            .read()
            .get(&id)
            .is_some_and(|e| !e.loading && e.body.is_some())
    }

    /// Number of resident bodies.
    pub fn len(&self) -> usize {
        self.shared
            .entries
            .read()
            .values()
            .filter(|e| e.body.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while any requested read has not completed.
    pub fn has_pending(&self) -> bool {
        !self.shared.pending.lock().is_empty()
    }

    pub fn resident_bytes(&self) -> usize {
        self.shared.resident_bytes.load(Ordering::Relaxed)
    }

    /// Ceiling applied by the next eviction pass.
    pub fn ceiling_bytes(&self) -> usize {
        self.shared.grade.get().cache_ceiling_bytes()
    }

    pub fn grade(&self) -> CardGrade {
        self.shared.grade.get()
    }

    pub fn hits(&self) -> usize {
        self.shared.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.shared.misses.load(Ordering::Relaxed)
    }

    /// Fraction of `body` lookups that found a resident body.
    pub fn hit_rate(&self) -> f32 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f32 / total as f32
        }
    }
}

impl Drop for StreamingPreviewCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for StreamingPreviewCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingPreviewCache")
            .field("open", &self.is_open())
            .field("resident_kb", &(self.resident_bytes() / 1024))
            .field("ceiling_kb", &(self.ceiling_bytes() / 1024))
            .field("grade", &self.grade())
            .finish()
    }
}
