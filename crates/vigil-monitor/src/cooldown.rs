//! Per-camera detection and notification cooldowns.

use std::time::{Duration, Instant};

/// Two independent "elapsed since last" gates.
///
/// The detection gate decides whether a frame is evaluated at all. The
/// notification gate only decides whether an event should alert.
#[derive(Debug, Clone)]
pub struct CooldownGate {
    detection_cooldown: Duration,
    notification_cooldown: Duration,
    last_detection: Option<Instant>,
    last_notification: Option<Instant>,
}

impl CooldownGate {
    pub fn new(detection_cooldown: Duration, notification_cooldown: Duration) -> Self {
        Self {
            detection_cooldown,
            notification_cooldown,
            last_detection: None,
            last_notification: None,
        }
    }

    /// True if the pipeline may run at `now`.
    pub fn detection_open(&self, now: Instant) -> bool {
        is_open(self.last_detection, self.detection_cooldown, now)
    }

    /// True if an event raised at `now` would notify.
    pub fn notification_open(&self, now: Instant) -> bool {
        is_open(self.last_notification, self.notification_cooldown, now)
    }

    /// Record an intrusion at `now`. Returns whether it should notify.
    ///
    /// Timestamps never move backwards.
    pub fn record_detection(&mut self, now: Instant) -> bool {
        self.last_detection = Some(self.last_detection.map_or(now, |prev| prev.max(now)));

        if self.notification_open(now) {
            self.last_notification = Some(self.last_notification.map_or(now, |prev| prev.max(now)));
            true
        } else {
            false
        }
    }

    pub fn last_detection(&self) -> Option<Instant> {
        self.last_detection
    }
}

fn is_open(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    match last {
        Some(last) => now.saturating_duration_since(last) >= cooldown,
        None => true,
    }
}
