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
//! Background loader thread: the only writer of the cache map.

use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use thread_priority::{set_current_thread_priority, ThreadPriority};
use tracing::{debug, warn};

use super::pak::{PakRecord, BLOCK_SIZE};
use super::{BodyBuffer, CacheShared};
use crate::pcm::{gain_from_q15, PcmSlice};
use crate::SampleId;

/// How long the loader waits on an empty queue before rechecking its stop flag.
const IDLE_WAIT: Duration = Duration::from_millis(2);

/// A queued body read.
#[derive(Clone, Copy, Debug)]
pub struct ReadRequest {
    pub record: PakRecord,
    pub requested_at: Instant,
}

impl ReadRequest {
    pub fn id(&self) -> SampleId {
        self.record.id
    }
}

/// Handle to a running loader thread.
pub struct LoaderHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl LoaderHandle {
    /// Starts the loader over `reader`.
    pub fn spawn<R>(
        reader: R,
        requests: Receiver<ReadRequest>,
        shared: Arc<CacheShared>,
    ) -> std::io::Result<LoaderHandle>
    where
        R: Read + Seek + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name("preview-loader".to_string())
            .spawn(move || {
                if let Err(e) = set_current_thread_priority(ThreadPriority::Min) {
                    debug!(error = ?e, "Unable to lower loader thread priority");
                }
                Loader {
                    reader,
                    shared,
                    scratch: Vec::new(),
                }
                .run(requests, thread_stop);
            })?;
        Ok(LoaderHandle {
            stop,
            thread: Some(thread),
        })
    }

    /// Signals the loader to stop and waits for it to exit.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Preview loader thread panicked");
            }
        }
    }
}

struct Loader<R> {
    reader: R,
    shared: Arc<CacheShared>,
    scratch: Vec<u8>,
}

impl<R: Read + Seek> Loader<R> {
    fn run(mut self, requests: Receiver<ReadRequest>, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Acquire) {
            match requests.recv_timeout(IDLE_WAIT) {
                Ok(request) => self.load(request),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        debug!("Preview loader stopped");
    }

    fn load(&mut self, request: ReadRequest) {
        let id = request.id();
        self.shared.begin_load(id);

        match self.read_body(&request.record) {
            Ok(Some(body)) => {
                let frames = body.frames();
                self.shared.publish(id, body);
                debug!(
                    id,
                    frames,
                    latency_us = request.requested_at.elapsed().as_micros() as u64,
                    "Preview body loaded"
                );
            }
            Ok(None) => {
                self.shared.abandon(id);
                debug!(id, "Preview body read returned no audio");
            }
            Err(e) => {
                self.shared.abandon(id);
                warn!(id, error = %e, "Preview body read failed");
            }
        }
        self.shared.finish_request(id);
    }

    /// Reads and decodes one body. Returns None when the store holds no audio
    /// at the record's offset.
    fn read_body(&mut self, record: &PakRecord) -> std::io::Result<Option<BodyBuffer>> {
        let grade = self.shared.grade.get();
        let expected_frames = record.frames(grade.max_body_ms());
        if expected_frames == 0 {
            return Ok(None);
        }

        let offset = record.byte_offset as u64;
        let aligned = offset - offset % BLOCK_SIZE;
        let skip = (offset - aligned) as usize;
        let needed = (skip + expected_frames * 2) as u64;
        let total = needed.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
        let chunk = grade.read_size_bytes().max(BLOCK_SIZE as usize);

        self.scratch.clear();
        self.scratch.resize(total as usize, 0);
        self.reader.seek(SeekFrom::Start(aligned))?;

        let mut filled = 0;
        while filled < self.scratch.len() {
            let end = (filled + chunk).min(self.scratch.len());
            match self.reader.read(&mut self.scratch[filled..end]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        // A short read keeps whatever whole frames arrived.
        let frames = (filled.saturating_sub(skip) / 2).min(expected_frames);
        if frames == 0 {
            return Ok(None);
        }
        let pcm: Arc<[i16]> = self.scratch[skip..skip + frames * 2]
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Ok(Some(BodyBuffer {
            pcm: PcmSlice::whole(pcm),
            gain: gain_from_q15(record.gain_q15),
        }))
    }
}
