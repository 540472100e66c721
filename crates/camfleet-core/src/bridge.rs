// ── In-process media bridge ──
//
// One broadcast endpoint per camera. The camera's relay task publishes
// captured frames; the upload-media handle subscribes and forwards them
// upstream. Delivery is best effort: with no subscriber frames are
// dropped, and a lagging subscriber skips ahead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;

use crate::collab::MediaFrame;

const ENDPOINT_CAPACITY: usize = 512;

#[derive(Debug, Clone, Default)]
pub struct MediaBridge {
    endpoints: Arc<Mutex<HashMap<String, broadcast::Sender<MediaFrame>>>>,
}

impl MediaBridge {
    pub fn new() -> Self {
        Self::default()
    }

    fn endpoint(&self, camera_id: &str) -> broadcast::Sender<MediaFrame> {
        let mut endpoints = self
            .endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        endpoints
            .entry(camera_id.to_owned())
            .or_insert_with(|| broadcast::channel(ENDPOINT_CAPACITY).0)
            .clone()
    }

    /// Producer side for a camera.
    pub fn publisher(&self, camera_id: &str) -> broadcast::Sender<MediaFrame> {
        self.endpoint(camera_id)
    }

    /// Consumer side for a camera.
    pub fn subscribe(&self, camera_id: &str) -> broadcast::Receiver<MediaFrame> {
        self.endpoint(camera_id).subscribe()
    }

    /// Drop a camera's endpoint; current subscribers see the channel close
    /// once the last publisher is gone.
    pub fn remove(&self, camera_id: &str) {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(camera_id);
    }

    pub fn len(&self) -> usize {
        self.endpoints
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
