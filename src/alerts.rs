// src/alerts.rs

use serde::Serialize;

/// Frame pushed to dashboard sessions when a new emergency arrives.
/// `duration` of zero means the toast stays until dismissed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyAlert {
    pub message: &'static str,
    pub description: &'static str,
    pub duration: u32,
    pub placement: &'static str,
    pub sound: &'static str,
}

impl EmergencyAlert {
    fn new() -> Self {
        EmergencyAlert {
            message: "🚨 NEW EMERGENCY!",
            description: "A user has requested emergency assistance.",
            duration: 0,
            placement: "topRight",
            sound: "/sounds/emergency-alert.mp3",
        }
    }
}

/// Tracks the pending-emergency count across live updates and decides
/// when to raise an alert. Only a rise triggers one, and never from a
/// zero baseline: the first snapshot after connecting (or after the
/// queue drains) describes existing state, not a new request.
#[derive(Debug, Default)]
pub struct EmergencyAlertWatcher {
    previous: usize,
}

impl EmergencyAlertWatcher {
    pub fn new() -> Self {
        EmergencyAlertWatcher { previous: 0 }
    }

    pub fn observe(&mut self, count: usize) -> Option<EmergencyAlert> {
        let alert = if count > self.previous && self.previous != 0 {
            Some(EmergencyAlert::new())
        } else {
            None
        };
        self.previous = count;
        alert
    }
}
