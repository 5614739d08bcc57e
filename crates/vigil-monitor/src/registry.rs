//! Process-wide registry of camera monitors.
//!
//! At most one monitor runs per camera id. Start and stop on the same camera
//! serialize on a per-camera slot lock; different cameras proceed in parallel.
//! Status queries read each camera's watch channel and never take a slot lock,
//! so a camera that is still connecting reports `Starting` instead of blocking.
//!
//! Lock order is slot, then map. The map lock is never held across an await on
//! a slot or a monitor.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use vigil_models::{CameraConfig, CameraId};

use crate::error::{MonitorError, MonitorResult};
use crate::monitor::{CameraMonitor, MonitorContext, MonitorStatus};

type Slot = Arc<Mutex<Option<CameraMonitor>>>;

#[derive(Clone)]
struct Entry {
    slot: Slot,
    status: Arc<watch::Sender<MonitorStatus>>,
}

impl Entry {
    fn new(camera_id: &CameraId) -> Self {
        let (status, _) = watch::channel(MonitorStatus::starting(camera_id.clone()));
        Self {
            slot: Slot::default(),
            status: Arc::new(status),
        }
    }
}

/// Owns every running [`CameraMonitor`] keyed by camera id.
pub struct MonitorRegistry {
    ctx: MonitorContext,
    monitors: Mutex<HashMap<CameraId, Entry>>,
}

impl MonitorRegistry {
    pub fn new(ctx: MonitorContext) -> Self {
        Self {
            ctx,
            monitors: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    async fn entry(&self, camera_id: &CameraId) -> Entry {
        let mut monitors = self.monitors.lock().await;
        monitors
            .entry(camera_id.clone())
            .or_insert_with(|| Entry::new(camera_id))
            .clone()
    }

    async fn existing_entry(&self, camera_id: &CameraId) -> Option<Entry> {
        self.monitors.lock().await.get(camera_id).cloned()
    }

    /// True while `slot` is still the one registered for `camera_id`.
    async fn holds(&self, camera_id: &CameraId, slot: &Slot) -> bool {
        self.monitors
            .lock()
            .await
            .get(camera_id)
            .map_or(false, |entry| Arc::ptr_eq(&entry.slot, slot))
    }

    /// Drop the entry for `camera_id` if it still points at `slot`.
    ///
    /// Callers hold the slot lock, so nobody can be mid-start on it.
    async fn prune(&self, camera_id: &CameraId, slot: &Slot) {
        let mut monitors = self.monitors.lock().await;
        if monitors
            .get(camera_id)
            .map_or(false, |entry| Arc::ptr_eq(&entry.slot, slot))
        {
            monitors.remove(camera_id);
            debug!(camera_id = %camera_id, "Registry entry removed");
        }
    }

    /// Start monitoring a camera, replacing any monitor already running for it.
    ///
    /// The previous monitor is fully stopped before the new source opens.
    pub async fn start(&self, camera: CameraConfig) -> MonitorResult<MonitorStatus> {
        if !camera.enabled {
            return Err(MonitorError::CameraDisabled(camera.id));
        }

        loop {
            let entry = self.entry(&camera.id).await;
            let mut guard = entry.slot.lock().await;

            // A stop may have removed this entry while we waited on its lock
            if !self.holds(&camera.id, &entry.slot).await {
                continue;
            }

            if let Some(previous) = guard.take() {
                info!(camera_id = %camera.id, "Replacing running monitor");
                previous.stop().await;
            }

            let camera_id = camera.id.clone();
            return match CameraMonitor::start_with_status(camera, self.ctx.clone(), Arc::clone(&entry.status)).await {
                Ok(monitor) => {
                    let status = monitor.status();
                    *guard = Some(monitor);
                    Ok(status)
                }
                Err(e) => {
                    self.prune(&camera_id, &entry.slot).await;
                    Err(e)
                }
            };
        }
    }

    /// Stop a camera's monitor and return its final status.
    pub async fn stop(&self, camera_id: &CameraId) -> MonitorResult<MonitorStatus> {
        let Some(entry) = self.existing_entry(camera_id).await else {
            return Err(MonitorError::NotRunning(camera_id.clone()));
        };
        let mut guard = entry.slot.lock().await;
        let stopped = match guard.take() {
            Some(monitor) => Ok(monitor.stop().await),
            None => Err(MonitorError::NotRunning(camera_id.clone())),
        };
        // Still holding the slot, so a waiting start sees the removal and re-registers
        self.prune(camera_id, &entry.slot).await;
        stopped
    }

    /// Status of a camera's monitor, if one was started.
    ///
    /// Cameras still opening their source report `Starting`. Monitors that
    /// stopped on their own keep their final status until stopped or replaced.
    pub async fn status(&self, camera_id: &CameraId) -> Option<MonitorStatus> {
        let monitors = self.monitors.lock().await;
        monitors.get(camera_id).map(|entry| entry.status.borrow().clone())
    }

    /// Ids of cameras whose monitor is currently running, sorted.
    pub async fn list_active(&self) -> Vec<CameraId> {
        let mut active: Vec<CameraId> = {
            let monitors = self.monitors.lock().await;
            monitors
                .iter()
                .filter(|(_, entry)| entry.status.borrow().running)
                .map(|(id, _)| id.clone())
                .collect()
        };
        active.sort();
        active
    }

    /// Stop every monitor concurrently.
    pub async fn stop_all(&self) -> Vec<MonitorStatus> {
        let slots: Vec<Slot> = self
            .monitors
            .lock()
            .await
            .drain()
            .map(|(_, entry)| entry.slot)
            .collect();

        let mut tasks = JoinSet::new();
        for slot in slots {
            tasks.spawn(async move {
                let monitor = slot.lock().await.take();
                match monitor {
                    Some(monitor) => Some(monitor.stop().await),
                    None => None,
                }
            });
        }

        let mut stopped = Vec::new();
        while let Some(result) = tasks.join_next().await {
            match result {
                Ok(Some(status)) => stopped.push(status),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "Stop task failed"),
            }
        }
        info!(count = stopped.len(), "All monitors stopped");
        stopped
    }
}
