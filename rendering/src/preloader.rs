use crate::database::SpriteSource;
use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded, unbounded};
use formats::codec::{self, DecodeDiagnostics};
use formats::spr;
use rustc_hash::FxHashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, trace, warn};

/// Default cap on tasks queued and not yet drained by `update`.
pub const MAX_QUEUE_SIZE: usize = 50_000;

#[derive(Clone, Debug)]
pub struct Task {
    pub id: u32,
    pub generation: u32,
    pub epoch: u64,
    pub sprite_file: Arc<PathBuf>,
    pub extended: bool,
    pub transparency: bool,
}

enum Outcome {
    Decoded(Decoded),
    Failed { id: u32, epoch: u64 },
}

/// Pixels decoded off-thread, ready for the owner to intern.
#[derive(Debug)]
pub struct Decoded {
    pub id: u32,
    pub generation: u32,
    pub epoch: u64,
    pub pixels: Vec<u8>,
    pub sprite_file: Arc<PathBuf>,
}

/// Background decode worker.
///
/// Tasks travel over a bounded channel and results come back over an
/// unbounded one. Every message carries the epoch it was issued under;
/// [`SpritePreloader::clear`] bumps the epoch so anything issued before it is
/// skipped by the worker or discarded on arrival. The in-flight set lives on
/// the owner thread only.
pub struct SpritePreloader {
    tasks: Option<Sender<Task>>,
    results: Receiver<Outcome>,
    epoch: Arc<AtomicU64>,
    pending: FxHashSet<u32>,
    queue_size: usize,
    owner: ThreadId,
    worker: Option<JoinHandle<()>>,
}

impl SpritePreloader {
    /// Requests are dropped while `queue_size` tasks are in flight.
    pub fn new(diagnostics: Arc<DecodeDiagnostics>, queue_size: usize) -> anyhow::Result<Self> {
        let queue_size = queue_size.max(1);
        let (task_tx, task_rx) = bounded::<Task>(queue_size);
        let (result_tx, result_rx) = unbounded();
        let epoch = Arc::new(AtomicU64::new(0));

        let worker_epoch = epoch.clone();
        let worker = thread::Builder::new()
            .name("sprite-preloader".into())
            .spawn(move || worker_loop(task_rx, result_tx, worker_epoch, diagnostics))?;

        Ok(Self {
            tasks: Some(task_tx),
            results: result_rx,
            epoch,
            pending: FxHashSet::default(),
            queue_size,
            owner: thread::current().id(),
            worker: Some(worker),
        })
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn is_pending(&self, id: u32) -> bool {
        self.pending.contains(&id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Queues a decode unless one is already in flight for `id`. Returns
    /// whether a task was queued.
    pub fn request(&mut self, id: u32, generation: u32, source: &SpriteSource) -> bool {
        if self.pending.contains(&id) {
            return false;
        }
        if self.pending.len() >= self.queue_size {
            trace!(id, "Preload queue full, dropping request");
            return false;
        }
        let Some(tasks) = self.tasks.as_ref() else {
            return false;
        };

        let task = Task {
            id,
            generation,
            epoch: self.epoch(),
            sprite_file: source.path.clone(),
            extended: source.extended,
            transparency: source.transparency,
        };
        match tasks.try_send(task) {
            Ok(()) => {
                self.pending.insert(id);
                true
            }
            Err(TrySendError::Full(_)) => {
                trace!(id, "Preload queue full, dropping request");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!(id, "Preload worker is gone");
                false
            }
        }
    }

    /// Drains finished work. Must run on the thread that created the
    /// preloader.
    pub fn update(&mut self) -> Vec<Decoded> {
        debug_assert_eq!(
            thread::current().id(),
            self.owner,
            "SpritePreloader::update called off the owner thread"
        );

        let current = self.epoch();
        let mut ready = Vec::new();
        loop {
            let outcome = match self.results.try_recv() {
                Ok(outcome) => outcome,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    warn!("Preload worker disconnected");
                    break;
                }
            };
            match outcome {
                Outcome::Decoded(decoded) => {
                    if decoded.epoch != current {
                        trace!(id = decoded.id, "Dropping result from a cleared epoch");
                        continue;
                    }
                    if self.pending.remove(&decoded.id) {
                        ready.push(decoded);
                    }
                }
                Outcome::Failed { id, epoch } => {
                    if epoch == current {
                        self.pending.remove(&id);
                    }
                }
            }
        }
        ready
    }

    /// Cancels all outstanding work. Queued tasks are skipped by the worker,
    /// results already produced are discarded.
    pub fn clear(&mut self) {
        let previous = self.epoch.fetch_add(1, Ordering::AcqRel);
        let cancelled = self.pending.len();
        self.pending.clear();
        let dropped = self.results.try_iter().count();
        debug!(epoch = previous + 1, cancelled, dropped, "Preloader cleared");
    }
}

impl Drop for SpritePreloader {
    fn drop(&mut self) {
        // Closing the task channel ends the worker loop.
        self.tasks.take();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Preload worker panicked");
            }
        }
    }
}

fn worker_loop(
    tasks: Receiver<Task>,
    results: Sender<Outcome>,
    epoch: Arc<AtomicU64>,
    diagnostics: Arc<DecodeDiagnostics>,
) {
    for task in tasks.iter() {
        if task.epoch != epoch.load(Ordering::Acquire) {
            continue;
        }

        let outcome = match spr::load_dump(task.sprite_file.as_path(), task.extended, task.id) {
            Ok(dump) => {
                let decoded = codec::decode_rgba(&dump, task.transparency, task.id);
                diagnostics.observe(task.id, &decoded.report);
                Outcome::Decoded(Decoded {
                    id: task.id,
                    generation: task.generation,
                    epoch: task.epoch,
                    pixels: decoded.pixels,
                    sprite_file: task.sprite_file,
                })
            }
            Err(e) => {
                debug!(id = task.id, "Preload failed: {:#}", e);
                Outcome::Failed {
                    id: task.id,
                    epoch: task.epoch,
                }
            }
        };

        if results.send(outcome).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write_sprite_file(name: &str, count: u16) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.spr", name, std::process::id()));
        let mut out = Vec::new();
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        let table_end = 6 + count as usize * 4;
        let dump = [0u8, 0, 1, 0, 200, 100, 50];
        for i in 0..count as usize {
            let offset = table_end + i * (5 + dump.len());
            out.extend_from_slice(&(offset as u32).to_le_bytes());
        }
        for _ in 0..count {
            out.extend_from_slice(&[0xff, 0, 0xff]);
            out.extend_from_slice(&(dump.len() as u16).to_le_bytes());
            out.extend_from_slice(&dump);
        }
        std::fs::write(&path, out).unwrap();
        path
    }

    fn source(path: PathBuf) -> SpriteSource {
        SpriteSource {
            path: Arc::new(path),
            extended: false,
            transparency: false,
        }
    }

    /// Pumps `update` until `id` shows up, collecting everything seen.
    fn wait_for(preloader: &mut SpritePreloader, id: u32) -> Vec<Decoded> {
        let mut seen = Vec::new();
        for _ in 0..1000 {
            seen.extend(preloader.update());
            if seen.iter().any(|d| d.id == id) {
                return seen;
            }
            thread::sleep(Duration::from_millis(2));
        }
        panic!("sprite {} never decoded", id);
    }

    #[test]
    fn test_decodes_off_thread() {
        let source = source(write_sprite_file("preload-basic", 3));
        let mut preloader = SpritePreloader::new(Arc::new(DecodeDiagnostics::new()), MAX_QUEUE_SIZE).unwrap();
        assert!(preloader.request(2, 0, &source));
        let results = wait_for(&mut preloader, 2);
        assert_eq!(results.len(), 1);
        assert_eq!(&results[0].pixels[..4], &[200, 100, 50, 255]);
        assert!(!preloader.is_pending(2));
        std::fs::remove_file(source.path.as_path()).ok();
    }

    #[test]
    fn test_duplicate_requests_queue_once() {
        let source = source(write_sprite_file("preload-dedup", 6));
        let mut preloader = SpritePreloader::new(Arc::new(DecodeDiagnostics::new()), MAX_QUEUE_SIZE).unwrap();
        let queued = (0..10).filter(|_| preloader.request(5, 0, &source)).count();
        assert_eq!(queued, 1);
        assert_eq!(preloader.pending_count(), 1);

        preloader.request(6, 0, &source);
        let results = wait_for(&mut preloader, 6);
        assert_eq!(results.iter().filter(|d| d.id == 5).count(), 1);
        std::fs::remove_file(source.path.as_path()).ok();
    }

    #[test]
    fn test_clear_discards_late_results() {
        let source = source(write_sprite_file("preload-clear", 6));
        let mut preloader = SpritePreloader::new(Arc::new(DecodeDiagnostics::new()), MAX_QUEUE_SIZE).unwrap();
        preloader.request(5, 0, &source);
        preloader.clear();
        assert!(!preloader.is_pending(5));

        // The registry reloads and asks for a later sprite; the old id 5 work
        // must not come back.
        preloader.request(6, 1, &source);
        let results = wait_for(&mut preloader, 6);
        assert!(results.iter().all(|d| d.id != 5));
        assert!(results.iter().all(|d| d.epoch == preloader.epoch()));
        std::fs::remove_file(source.path.as_path()).ok();
    }

    #[test]
    fn test_requests_past_the_cap_are_dropped() {
        let source = source(write_sprite_file("preload-cap", 3));
        let mut preloader = SpritePreloader::new(Arc::new(DecodeDiagnostics::new()), 2).unwrap();
        assert!(preloader.request(1, 0, &source));
        assert!(preloader.request(2, 0, &source));
        assert!(!preloader.request(3, 0, &source));
        assert!(!preloader.is_pending(3));
        assert_eq!(preloader.pending_count(), 2);

        let mut seen = wait_for(&mut preloader, 1);
        if !seen.iter().any(|d| d.id == 2) {
            seen.extend(wait_for(&mut preloader, 2));
        }
        assert_eq!(preloader.pending_count(), 0);
        assert!(preloader.request(3, 0, &source), "draining frees room");
        std::fs::remove_file(source.path.as_path()).ok();
    }

    #[test]
    fn test_failed_decode_frees_the_id() {
        let source = source(std::env::temp_dir().join("preload-missing-file.spr"));
        let mut preloader = SpritePreloader::new(Arc::new(DecodeDiagnostics::new()), MAX_QUEUE_SIZE).unwrap();
        assert!(preloader.request(3, 0, &source));
        for _ in 0..1000 {
            preloader.update();
            if !preloader.is_pending(3) {
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(!preloader.is_pending(3));
        assert!(preloader.request(3, 0, &source), "a failed id can be requested again");
    }
}
