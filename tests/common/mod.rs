#![allow(dead_code)]

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use arkdrop_engine::{
    BatchDescriptor, BatchRegistry, BlobStore, DropError, EngineConfig,
    Result, Transport, TransportEvent, TransportListener,
};

pub fn config(root: &Path) -> EngineConfig {
    EngineConfig {
        local_name: "Pixel".to_owned(),
        max_concurrent_units: 2,
        ..EngineConfig::with_root(root)
    }
}

/// Writes `count` small text files and returns their paths.
pub fn source_files(dir: &Path, count: usize) -> Vec<PathBuf> {
    let sources = dir.join("sources");
    fs::create_dir_all(&sources).unwrap();
    (0..count)
        .map(|i| {
            let path = sources.join(format!("note-{i}.txt"));
            fs::write(&path, format!("content of note {i}")).unwrap();
            path
        })
        .collect()
}

pub fn file_count(dir: &Path) -> usize {
    fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

/// In-memory blob store. Any remote path containing a marker registered
/// with [`MemoryStore::fail_on`] fails.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn fail_on(&self, marker: impl Into<String>) {
        self.failing.lock().unwrap().insert(marker.into());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn put(&self, remote_path: &str, bytes: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(remote_path.to_owned(), bytes.to_vec());
    }

    pub fn blob(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(remote_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }

    fn check(&self, remote_path: &str) -> Result<()> {
        let failing = self.failing.lock().unwrap();
        if failing.iter().any(|m| remote_path.contains(m.as_str())) {
            return Err(DropError::Collaborator(format!(
                "store refused {remote_path}"
            )));
        }
        Ok(())
    }
}

impl BlobStore for MemoryStore {
    async fn upload(&self, bytes: Vec<u8>, remote_path: String) -> Result<()> {
        self.check(&remote_path)?;
        self.blobs.lock().unwrap().insert(remote_path, bytes);
        Ok(())
    }

    async fn download(&self, remote_path: String) -> Result<Vec<u8>> {
        self.check(&remote_path)?;
        self.blob(&remote_path).ok_or_else(|| {
            DropError::Collaborator(format!("no blob at {remote_path}"))
        })
    }
}

#[derive(Default)]
pub struct MemoryRegistry {
    published: Mutex<Vec<BatchDescriptor>>,
    fail_publish: AtomicBool,
}

impl MemoryRegistry {
    pub fn set_failing(&self, failing: bool) {
        self.fail_publish.store(failing, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<BatchDescriptor> {
        self.published.lock().unwrap().clone()
    }
}

impl BatchRegistry for MemoryRegistry {
    async fn publish(&self, descriptor: BatchDescriptor) -> Result<String> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(DropError::Collaborator("registry offline".to_owned()));
        }
        let reference = format!("batches/{}", descriptor.batch_id);
        self.published.lock().unwrap().push(descriptor);
        Ok(reference)
    }
}

/// Transport double that records outgoing payloads and lets tests inject
/// notifications.
#[derive(Default)]
pub struct LoopbackTransport {
    listeners: Mutex<HashMap<String, Arc<dyn TransportListener>>>,
    sent: Mutex<Vec<(String, Vec<u8>)>>,
    fail_connect: AtomicBool,
    fail_disconnect: AtomicBool,
    fail_send: AtomicBool,
}

impl LoopbackTransport {
    pub fn emit(&self, event: TransportEvent) {
        let listeners: Vec<_> =
            self.listeners.lock().unwrap().values().cloned().collect();
        for listener in listeners {
            listener.notify(event.clone());
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn set_fail_connect(&self, failing: bool) {
        self.fail_connect.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, failing: bool) {
        self.fail_disconnect.store(failing, Ordering::SeqCst);
    }

    pub fn set_fail_send(&self, failing: bool) {
        self.fail_send.store(failing, Ordering::SeqCst);
    }
}

impl Transport for LoopbackTransport {
    async fn connect(&self, endpoint_id: &str) -> Result<()> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(DropError::Collaborator(format!(
                "cannot reach {endpoint_id}"
            )));
        }
        Ok(())
    }

    async fn disconnect(&self, endpoint_id: &str) -> Result<()> {
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(DropError::Collaborator(format!(
                "cannot disconnect {endpoint_id}"
            )));
        }
        Ok(())
    }

    fn send_bytes(&self, endpoint_id: &str, bytes: Vec<u8>) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(DropError::Collaborator("channel closed".to_owned()));
        }
        self.sent.lock().unwrap().push((endpoint_id.to_owned(), bytes));
        Ok(())
    }

    fn register(&self, listener: Arc<dyn TransportListener>) {
        self.listeners
            .lock()
            .unwrap()
            .insert(listener.get_id(), listener);
    }

    fn unregister(&self, listener_id: &str) {
        self.listeners.lock().unwrap().remove(listener_id);
    }
}
