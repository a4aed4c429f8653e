// UPGRADE MODE: EVENT EMISSION
// Ordered, version-tagged lifecycle events
//
// SAFETY INVARIANTS:
// 1. Every event carries the version of the window it belongs to
// 2. Sinks observe events in transition order

use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Lifecycle events, each tagged with the upgrade version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "version")]
pub enum UpgradeEvent {
    UpgradeModeActivated(u64),
    UpgradeModeFinalizeStatusActivated(u64),
    UpgradeCanceled(u64),
    UpgradeCompleted(u64),
    UpgradeForciblyCanceled(u64),
}

impl UpgradeEvent {
    pub fn version(&self) -> u64 {
        match *self {
            UpgradeEvent::UpgradeModeActivated(v)
            | UpgradeEvent::UpgradeModeFinalizeStatusActivated(v)
            | UpgradeEvent::UpgradeCanceled(v)
            | UpgradeEvent::UpgradeCompleted(v)
            | UpgradeEvent::UpgradeForciblyCanceled(v) => v,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            UpgradeEvent::UpgradeModeActivated(_) => "UpgradeModeActivated",
            UpgradeEvent::UpgradeModeFinalizeStatusActivated(_) => {
                "UpgradeModeFinalizeStatusActivated"
            }
            UpgradeEvent::UpgradeCanceled(_) => "UpgradeCanceled",
            UpgradeEvent::UpgradeCompleted(_) => "UpgradeCompleted",
            UpgradeEvent::UpgradeForciblyCanceled(_) => "UpgradeForciblyCanceled",
        }
    }
}

/// Destination for emitted events.
///
/// Called while the upgrade state is locked; implementations must not
/// call back into the emitting component.
#[cfg_attr(test, mockall::automock)]
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UpgradeEvent);
}

/// In-memory event log
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<UpgradeEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        RecordingEventSink::default()
    }

    /// Copy of every event recorded so far, oldest first
    pub fn events(&self) -> Vec<UpgradeEvent> {
        self.events.lock().clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<UpgradeEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn last(&self) -> Option<UpgradeEvent> {
        self.events.lock().last().copied()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: UpgradeEvent) {
        self.events.lock().push(event);
    }
}

/// Writes events to the `log` facade
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn emit(&self, event: UpgradeEvent) {
        info!("event {} (version {})", event.name(), event.version());
    }
}
