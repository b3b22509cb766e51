// src/realtime_server.rs

use actix::prelude::*;
use log::info;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::alerts::{EmergencyAlert, EmergencyAlertWatcher};
use crate::emergency::{
    active_emergencies_query, enrich_with_user_data, pending_count_query, transform_emergency,
    EmergencyRequest,
};
use crate::normalize::doc_id;
use crate::store::Store;

#[derive(Message)]
#[rtype(result = "()")]
pub struct PushFrame {
    pub payload: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub session_id: String,
    pub addr: Recipient<PushFrame>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub session_id: String,
}

#[derive(Message)]
#[rtype(result = "()")]
struct ActiveEmergenciesChanged {
    emergencies: Vec<EmergencyRequest>,
}

#[derive(Message)]
#[rtype(result = "()")]
struct PendingCountChanged {
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ActiveEmergenciesFrame<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    emergencies: &'a [EmergencyRequest],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PendingCountFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(flatten)]
    alert: EmergencyAlert,
}

/// Pushes live emergency state to every connected dashboard session.
/// Two store subscriptions feed it: the open-request list and the
/// pending count, the latter run through the alert watcher.
pub struct RealtimeServer {
    sessions: HashMap<String, Recipient<PushFrame>>,
    store: Arc<Store>,
    watcher: EmergencyAlertWatcher,
    last_active: Option<String>,
    last_count: Option<String>,
}

impl RealtimeServer {
    pub fn new(store: Arc<Store>) -> Self {
        RealtimeServer {
            sessions: HashMap::new(),
            store,
            watcher: EmergencyAlertWatcher::new(),
            last_active: None,
            last_count: None,
        }
    }

    fn broadcast(&self, payload: &str) {
        for addr in self.sessions.values() {
            addr.do_send(PushFrame {
                payload: payload.to_string(),
            });
        }
    }
}

impl Actor for RealtimeServer {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Context<Self>) {
        let addr = ctx.address();
        let store = self.store.clone();
        let mut active = self.store.subscribe("emergency_requests", active_emergencies_query());
        actix::spawn(async move {
            while let Some(docs) = active.next().await {
                let emergencies: Vec<EmergencyRequest> = docs
                    .iter()
                    .map(|d| transform_emergency(&doc_id(d), d))
                    .collect();
                let emergencies = enrich_with_user_data(&store, emergencies).await;
                addr.do_send(ActiveEmergenciesChanged { emergencies });
            }
        });

        let addr = ctx.address();
        let mut pending = self.store.subscribe("emergency_requests", pending_count_query());
        actix::spawn(async move {
            while let Some(docs) = pending.next().await {
                addr.do_send(PendingCountChanged { count: docs.len() });
            }
        });
    }
}

impl Handler<Connect> for RealtimeServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("Dashboard session {} connected (WS)", msg.session_id);
        // Catch the new session up on current state before any change lands.
        if let Some(frame) = &self.last_active {
            msg.addr.do_send(PushFrame { payload: frame.clone() });
        }
        if let Some(frame) = &self.last_count {
            msg.addr.do_send(PushFrame { payload: frame.clone() });
        }
        self.sessions.insert(msg.session_id, msg.addr);
    }
}

impl Handler<Disconnect> for RealtimeServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("Dashboard session {} disconnected (WS)", msg.session_id);
        self.sessions.remove(&msg.session_id);
    }
}

impl Handler<ActiveEmergenciesChanged> for RealtimeServer {
    type Result = ();

    fn handle(&mut self, msg: ActiveEmergenciesChanged, _: &mut Context<Self>) {
        let frame = ActiveEmergenciesFrame {
            kind: "activeEmergencies",
            emergencies: &msg.emergencies,
        };
        let payload = serde_json::to_string(&frame).unwrap_or_default();
        self.last_active = Some(payload.clone());
        self.broadcast(&payload);
    }
}

impl Handler<PendingCountChanged> for RealtimeServer {
    type Result = ();

    fn handle(&mut self, msg: PendingCountChanged, _: &mut Context<Self>) {
        let count_frame = PendingCountFrame {
            kind: "pendingEmergencies",
            count: msg.count,
        };
        let payload = serde_json::to_string(&count_frame).unwrap_or_default();
        self.last_count = Some(payload.clone());
        self.broadcast(&payload);

        if let Some(alert) = self.watcher.observe(msg.count) {
            let alert_frame = AlertFrame {
                kind: "emergencyAlert",
                alert,
            };
            let payload = serde_json::to_string(&alert_frame).unwrap_or_default();
            self.broadcast(&payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    struct Probe {
        tx: mpsc::UnboundedSender<String>,
    }

    impl Actor for Probe {
        type Context = Context<Self>;
    }

    impl Handler<PushFrame> for Probe {
        type Result = ();

        fn handle(&mut self, msg: PushFrame, _: &mut Context<Self>) {
            let _ = self.tx.send(msg.payload);
        }
    }

    async fn next_frame_containing(
        rx: &mut mpsc::UnboundedReceiver<String>,
        needle: &str,
    ) -> String {
        loop {
            let frame = timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("feed closed");
            if frame.contains(needle) {
                return frame;
            }
        }
    }

    #[actix_web::test]
    async fn sessions_receive_live_emergency_frames() {
        let store = Arc::new(Store::memory());
        let server = RealtimeServer::new(store.clone()).start();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = Probe { tx }.start();
        server
            .send(Connect {
                session_id: "s1".to_string(),
                addr: probe.recipient(),
            })
            .await
            .unwrap();

        store
            .create(
                "emergency_requests",
                doc! { "status": "pending", "userId": "u1", "address": "Jalan Ampang" },
            )
            .await
            .unwrap();

        let active = next_frame_containing(&mut rx, "Jalan Ampang").await;
        assert!(active.contains("\"type\":\"activeEmergencies\""));
        let count = next_frame_containing(&mut rx, "\"count\":1").await;
        assert!(count.contains("pendingEmergencies"));
    }

    #[actix_web::test]
    async fn alert_frames_fire_on_a_rise_from_nonzero() {
        let store = Arc::new(Store::memory());
        store
            .create("emergency_requests", doc! { "status": "pending" })
            .await
            .unwrap();

        let server = RealtimeServer::new(store.clone()).start();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let probe = Probe { tx }.start();
        server
            .send(Connect {
                session_id: "s1".to_string(),
                addr: probe.recipient(),
            })
            .await
            .unwrap();

        // Baseline snapshot: one pending, no alert yet.
        next_frame_containing(&mut rx, "\"count\":1").await;

        store
            .create("emergency_requests", doc! { "status": "pending" })
            .await
            .unwrap();

        let alert = next_frame_containing(&mut rx, "emergencyAlert").await;
        assert!(alert.contains("NEW EMERGENCY"));
        assert!(alert.contains("emergency-alert.mp3"));
    }
}
