// src/ws_server.rs

use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::warn;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::realtime_server::{Connect, Disconnect, PushFrame, RealtimeServer};

/// One connected dashboard tab. Receives pushed frames only; inbound
/// text is ignored.
pub struct DashboardSocket {
    pub id: String,
    pub hb: Instant,
    pub addr: Addr<RealtimeServer>,
}

impl Actor for DashboardSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        let addr = ctx.address();
        self.addr
            .send(Connect {
                session_id: self.id.clone(),
                addr: addr.recipient(),
            })
            .into_actor(self)
            .then(|res, _, ctx| {
                if res.is_err() {
                    warn!("Failed to register dashboard session, closing socket");
                    ctx.stop();
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopped(&mut self, _: &mut Self::Context) {
        self.addr.do_send(Disconnect {
            session_id: self.id.clone(),
        });
    }
}

impl DashboardSocket {
    pub fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(Duration::from_secs(5), |act, ctx| {
            if Instant::now().duration_since(act.hb) > Duration::from_secs(10) {
                warn!("Dashboard session {} heartbeat failed, disconnecting", act.id);
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for DashboardSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) => {}
            Ok(ws::Message::Close(_)) => {
                ctx.stop();
            }
            Err(e) => {
                warn!("WebSocket error on session {}: {}", self.id, e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

impl Handler<PushFrame> for DashboardSocket {
    type Result = ();

    fn handle(&mut self, msg: PushFrame, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.text(msg.payload);
    }
}

pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::start(
        DashboardSocket {
            id: Uuid::new_v4().to_string(),
            hb: Instant::now(),
            addr: data.realtime.clone(),
        },
        &req,
        stream,
    )
}
