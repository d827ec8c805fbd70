//! This module is responsible for getting snapshots out to disk

// The consumer that polls the radio must never wait on a file. Windows are
// copied into an rtrb ring and a writer thread drains it. If the writer falls
// behind, the window is dropped and counted instead of stalling the poll loop.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use byte_slice_cast::AsByteSlice;
use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::{debug, info, warn};

use crate::error::{RadioError, Result};
use crate::IqType;

// How long the writer naps when the ring is empty
const IDLE_WAIT: Duration = Duration::from_millis(1);

/// Filesystem-friendly UTC timestamp
fn dump_timestamp(time: &DateTime<Utc>) -> String {
    format!(
        "{}{:02}{:02}-{:02}{:02}{:02}",
        time.year(),
        time.month(),
        time.day(),
        time.hour(),
        time.minute(),
        time.second()
    )
}

/// Name of the dump file for a capture started at `time`
pub fn dump_path(dir: &Path, time: &DateTime<Utc>) -> PathBuf {
    dir.join(format!("btle-{}.iq", dump_timestamp(time)))
}

/// Drain `consumer` into `writer` until `done` is raised and the ring is
/// empty. Returns the number of bytes written.
fn drain<W: Write>(
    mut consumer: rtrb::Consumer<Vec<IqType>>,
    mut writer: W,
    done: &AtomicBool,
) -> std::io::Result<u64> {
    let mut bytes = 0u64;
    loop {
        match consumer.pop() {
            Ok(window) => {
                let raw = window.as_byte_slice();
                writer.write_all(raw)?;
                bytes += raw.len() as u64;
            }
            Err(_) => {
                // Check after the failed pop so nothing pushed before `done` is lost
                if done.load(Ordering::Acquire) && consumer.is_empty() {
                    break;
                }
                thread::sleep(IDLE_WAIT);
            }
        }
    }
    writer.flush()?;
    Ok(bytes)
}

/// Raw signed 8-bit interleaved IQ written on a background thread
pub struct SnapshotDump {
    producer: rtrb::Producer<Vec<IqType>>,
    done: Arc<AtomicBool>,
    handle: Option<JoinHandle<std::io::Result<u64>>>,
    path: Option<PathBuf>,
    dropped: u64,
}

impl SnapshotDump {
    /// Create `btle-<timestamp>.iq` in `dir` and start the writer thread.
    /// `capacity` is the number of windows the hand-off ring holds.
    pub fn create(dir: &Path, capacity: usize) -> Result<Self> {
        let path = dump_path(dir, &Utc::now());
        let file = File::create(&path).map_err(RadioError::Dump)?;
        info!(path = %path.display(), "dumping snapshots");
        let mut dump = Self::with_writer(BufWriter::new(file), capacity)?;
        dump.path = Some(path);
        Ok(dump)
    }

    /// Start a writer thread draining into any sink
    pub fn with_writer<W: Write + Send + 'static>(writer: W, capacity: usize) -> Result<Self> {
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let done = Arc::new(AtomicBool::new(false));
        let thread_done = done.clone();
        let handle = thread::Builder::new()
            .name("snapshot-dump".to_string())
            .spawn(move || drain(consumer, writer, &thread_done))?;
        Ok(Self {
            producer,
            done,
            handle: Some(handle),
            path: None,
            dropped: 0,
        })
    }

    /// File being written, if this dump goes to disk
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Queue a copy of `window`. Returns false if the writer is behind and
    /// the window was dropped.
    pub fn push(&mut self, window: &[IqType]) -> bool {
        match self.producer.push(window.to_vec()) {
            Ok(()) => true,
            Err(_) => {
                self.dropped += 1;
                warn!(dropped = self.dropped, "dump writer behind, window dropped");
                false
            }
        }
    }

    /// Windows dropped because the hand-off ring was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Flush everything queued and stop the writer. Returns bytes written.
    pub fn finish(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        self.done.store(true, Ordering::Release);
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => return Ok(0),
        };
        let bytes = match handle.join() {
            Ok(res) => res.map_err(RadioError::Dump)?,
            Err(_) => {
                return Err(RadioError::Dump(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "dump writer panicked",
                )))
            }
        };
        debug!(bytes, dropped = self.dropped, "dump writer finished");
        Ok(bytes)
    }
}

impl Drop for SnapshotDump {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(%e, "snapshot dump did not finish cleanly");
        }
    }
}
