use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

use crate::config::OrganizeConfig;
use crate::error::AppError;
use crate::services::host::BrowserHost;
use crate::services::snapshot_service::{self, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrganizePhase {
    Snapshot,
    Solving,
    Classifying,
    Planning,
    Executing,
    Converging,
    Cleanup,
    Done,
    Error,
}

impl OrganizePhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

/// Progress notification handed to observers of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub phase: OrganizePhase,
    pub current: usize,
    pub total: usize,
    pub detail: String,
}

impl ProgressEvent {
    pub fn new(
        phase: OrganizePhase,
        current: usize,
        total: usize,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            phase,
            current,
            total,
            detail: detail.into(),
        }
    }
}

/// Fire-and-forget progress observer. Implementations must not block.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: ProgressEvent) {
        self(event)
    }
}

/// Forwards events into a channel; a dropped receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelProgress(pub UnboundedSender<ProgressEvent>);

impl ProgressSink for ChannelProgress {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.0.send(event);
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn on_progress(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeProgressState {
    pub run_id: String,
    pub phase: OrganizePhase,
    pub current: usize,
    pub total: usize,
    pub percent: usize,
    pub combined_percent: usize,
    pub detail: String,
    pub sequence: u64,
}

/// Latest known browser state for fast synchronous reads. Hydrated once at
/// startup, replaced after every pipeline read and cleared when the host
/// reports a change.
#[derive(Debug, Default)]
pub struct BrowserStateCache {
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    version: AtomicU64,
}

impl BrowserStateCache {
    pub async fn hydrate(&self, host: &dyn BrowserHost) -> Result<Arc<Snapshot>, AppError> {
        let snapshot = snapshot_service::capture(host).await?;
        Ok(self.store(snapshot))
    }

    pub fn store(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(snapshot.clone());
        self.version.fetch_add(1, Ordering::Relaxed);
        snapshot
    }

    pub fn invalidate(&self) {
        let mut slot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if slot.take().is_some() {
            self.version.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }
}

pub struct AppState {
    pub config: OrganizeConfig,
    pub browser_cache: BrowserStateCache,
    pub organize_status: Mutex<Option<OrganizeProgressState>>,
    pub organize_progress_sequence: AtomicU64,
    pub organize_running: AtomicBool,
}

/// Held for the duration of a run; releases the running flag on drop.
pub struct OrganizeRunGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for OrganizeRunGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl AppState {
    pub fn new(config: OrganizeConfig) -> Self {
        Self {
            config,
            browser_cache: BrowserStateCache::default(),
            organize_status: Mutex::new(None),
            organize_progress_sequence: AtomicU64::new(0),
            organize_running: AtomicBool::new(false),
        }
    }

    pub fn try_begin_organize(&self) -> Result<OrganizeRunGuard<'_>, AppError> {
        self.organize_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| AppError::AlreadyRunning)?;
        Ok(OrganizeRunGuard {
            flag: &self.organize_running,
        })
    }

    pub fn is_organize_running(&self) -> bool {
        self.organize_running.load(Ordering::Acquire)
    }

    pub fn get_organize_status(&self) -> Option<OrganizeProgressState> {
        self.organize_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn set_organize_status(&self, status: OrganizeProgressState) {
        *self
            .organize_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(status);
    }

    pub fn clear_organize_status(&self) {
        self.organize_status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
    }

    pub fn next_organize_progress_sequence(&self) -> u64 {
        self.organize_progress_sequence
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new(OrganizeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory_host::tests::{tab, window};
    use crate::services::memory_host::{HostFixture, InMemoryHost};

    #[test]
    fn run_guard_rejects_second_run_until_dropped() {
        let state = AppState::default();
        let guard = state.try_begin_organize().unwrap();
        assert!(state.is_organize_running());
        assert!(matches!(
            state.try_begin_organize(),
            Err(AppError::AlreadyRunning)
        ));

        drop(guard);
        assert!(!state.is_organize_running());
        assert!(state.try_begin_organize().is_ok());
    }

    #[test]
    fn cache_versions_bump_on_store_and_invalidate() {
        let cache = BrowserStateCache::default();
        assert!(cache.latest().is_none());

        cache.store(Snapshot::default());
        assert_eq!(cache.version(), 1);
        assert!(cache.latest().is_some());

        cache.invalidate();
        assert_eq!(cache.version(), 2);
        assert!(cache.latest().is_none());

        cache.invalidate();
        assert_eq!(cache.version(), 2);
    }

    #[tokio::test]
    async fn hydrate_reads_host_once() {
        let host = InMemoryHost::new(HostFixture {
            windows: vec![window(1)],
            tabs: vec![tab(1, 1, "https://a.com")],
            groups: Vec::new(),
        });
        let cache = BrowserStateCache::default();
        let snapshot = cache.hydrate(&host).await.unwrap();
        assert_eq!(snapshot.tabs.len(), 1);
        assert_eq!(cache.latest().unwrap().tabs.len(), 1);
    }

    #[test]
    fn closures_and_channels_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: ProgressEvent| {
            seen.lock().unwrap().push(event.phase);
        };
        sink.on_progress(ProgressEvent::new(OrganizePhase::Planning, 0, 1, ""));
        assert_eq!(*seen.lock().unwrap(), vec![OrganizePhase::Planning]);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        ChannelProgress(tx).on_progress(ProgressEvent::new(OrganizePhase::Done, 1, 1, "ok"));
        assert_eq!(rx.try_recv().unwrap().detail, "ok");
    }

    #[test]
    fn progress_event_serializes_with_camel_case_shape() {
        let event = ProgressEvent::new(OrganizePhase::Executing, 2, 5, "Moving tabs");
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "phase": "executing",
                "current": 2,
                "total": 5,
                "detail": "Moving tabs",
            })
        );
    }
}
