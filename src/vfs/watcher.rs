//! Polling directory watcher
//!
//! Cards have no change notification, so the watcher re-lists a directory
//! on a fixed interval and classifies differences. A file that has just
//! appeared is held back until its size stays unchanged for more than two
//! intervals; cameras write files in place, and reporting a half-written
//! file would hand the consumer a torn download.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::fat32::FileInfo;
use crate::vfs::directory::Directory;

/// Default polling interval
pub const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// One classified change, dispatched per pass in New, Modified, Removed order
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A file appeared and its size stayed stable past the holdback window
    New(FileInfo),
    /// A known file changed size or modification time
    Modified(FileInfo),
    /// A known file vanished from the listing
    Removed(FileInfo),
}

pub type WatchCallback = Box<dyn FnMut(WatchEvent) + Send>;

/// Classification state between passes. A name lives in exactly one of
/// `known` and `unstable`.
#[derive(Default)]
struct WatchState {
    known: HashMap<String, FileInfo>,
    unstable: HashMap<String, (u32, Instant)>,
}

impl WatchState {
    /// Record the files present before watching started; they never
    /// produce New events.
    fn seed(&mut self, listing: &[FileInfo]) {
        for file in listing.iter().filter(|f| !f.is_directory) {
            self.known.insert(file.name.clone(), file.clone());
        }
    }

    /// Classify one fresh listing against the accumulated state.
    fn detect(&mut self, listing: &[FileInfo], now: Instant, interval: Duration) -> Vec<WatchEvent> {
        let current: HashMap<&str, &FileInfo> = listing
            .iter()
            .filter(|f| !f.is_directory)
            .map(|f| (f.name.as_str(), f))
            .collect();

        let mut modified = Vec::new();
        for (&name, &file) in &current {
            if let Some(prev) = self.known.get(name) {
                if prev.size != file.size || prev.modified != file.modified {
                    modified.push(WatchEvent::Modified(file.clone()));
                    self.known.insert(name.to_string(), file.clone());
                }
            } else {
                let restart = match self.unstable.get(name) {
                    Some((size, _)) => *size != file.size,
                    None => true,
                };
                if restart {
                    self.unstable.insert(name.to_string(), (file.size, now));
                }
            }
        }

        let mut new = Vec::new();
        let holdback = interval * 2;
        let candidates: Vec<String> = self.unstable.keys().cloned().collect();
        for name in candidates {
            match current.get(name.as_str()) {
                Some(&file) if file.size == self.unstable[&name].0 => {
                    if now.duration_since(self.unstable[&name].1) > holdback {
                        self.unstable.remove(&name);
                        self.known.insert(name, file.clone());
                        new.push(WatchEvent::New(file.clone()));
                    }
                }
                Some(_) => {}
                // Vanished before ever stabilizing; forget it silently
                None => {
                    self.unstable.remove(&name);
                }
            }
        }

        let mut removed = Vec::new();
        let gone: Vec<String> = self
            .known
            .keys()
            .filter(|name| !current.contains_key(name.as_str()))
            .cloned()
            .collect();
        for name in gone {
            if let Some(prev) = self.known.remove(&name) {
                removed.push(WatchEvent::Removed(prev));
            }
        }

        let mut events = new;
        events.extend(modified);
        events.extend(removed);
        events
    }
}

/// Watches one directory by polling
pub struct DirectoryWatcher {
    directory: Directory,
    interval: Duration,
    callback: Arc<Mutex<Option<WatchCallback>>>,
    // stop flag + wakeup for the poll loop
    gate: Arc<(Mutex<bool>, Condvar)>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl DirectoryWatcher {
    pub fn new(directory: Directory) -> Self {
        Self::with_interval(directory, CHECK_INTERVAL)
    }

    pub fn with_interval(directory: Directory, interval: Duration) -> Self {
        Self {
            directory,
            interval,
            callback: Arc::new(Mutex::new(None)),
            gate: Arc::new((Mutex::new(false), Condvar::new())),
            worker: Mutex::new(None),
        }
    }

    /// Register the change handler.
    pub fn on_event(&self, callback: impl FnMut(WatchEvent) + Send + 'static) {
        *self.callback.lock().unwrap() = Some(Box::new(callback));
    }

    /// Seed from the current listing and begin polling.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            return Ok(());
        }
        *self.gate.0.lock().unwrap() = false;

        let directory = self.directory.clone();
        let interval = self.interval;
        let callback = Arc::clone(&self.callback);
        let gate = Arc::clone(&self.gate);
        let handle = thread::Builder::new()
            .name("aircard-watcher".into())
            .spawn(move || poll_loop(directory, interval, callback, gate))?;
        *worker = Some(handle);
        Ok(())
    }

    /// Stop polling and clear the classification state.
    pub fn stop(&self) {
        {
            let (stopped, wakeup) = &*self.gate;
            *stopped.lock().unwrap() = true;
            wakeup.notify_all();
        }
        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    directory: Directory,
    interval: Duration,
    callback: Arc<Mutex<Option<WatchCallback>>>,
    gate: Arc<(Mutex<bool>, Condvar)>,
) {
    let mut state = WatchState::default();
    match list_files(&directory) {
        Ok(listing) => state.seed(&listing),
        Err(err) => log::warn!("watcher seed listing failed: {}", err),
    }

    let (stopped, wakeup) = &*gate;
    loop {
        match list_files(&directory) {
            Ok(listing) => {
                let events = state.detect(&listing, Instant::now(), interval);
                if !events.is_empty() {
                    let mut callback = callback.lock().unwrap();
                    if let Some(cb) = callback.as_mut() {
                        for event in events {
                            cb(event);
                        }
                    }
                }
            }
            // A slow or failing listing only delays the next pass
            Err(err) => log::warn!("watcher listing failed: {}", err),
        }

        let guard = stopped.lock().unwrap();
        let (guard, _timeout) = wakeup
            .wait_timeout_while(guard, interval, |stop| !*stop)
            .unwrap();
        if *guard {
            return;
        }
    }
}

fn list_files(directory: &Directory) -> Result<Vec<FileInfo>> {
    let nodes = directory.list(true)?;
    Ok(nodes.into_iter().map(|node| node.info().clone()).collect())
}
