use crate::config::Config;
use crate::realtime_server::RealtimeServer;
use crate::store::Store;
use actix::Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub realtime: Addr<RealtimeServer>,
    pub store: Arc<Store>,
    pub config: Config,
}
