// src/main.rs

mod alerts;
mod analytics;
mod app_state;
mod auth;
mod bookings;
mod config;
mod emergency;
mod faqs;
mod normalize;
mod notifications;
mod orders;
mod products;
mod realtime_server;
mod reviews;
mod store;
mod support;
mod users;
mod vouchers;
mod workshops;
mod ws_server;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use actix::Actor;
use actix_cors::Cors;
use actix_web::{
    body::{BoxBody, MessageBody},
    dev::{Service, ServiceRequest, ServiceResponse, Transform},
    http,
    middleware::Logger,
    web, App, Error, HttpMessage, HttpResponse, HttpServer,
};
use env_logger::Env;
use futures::future::{ok, Ready};
use log::info;

use crate::analytics::{get_dashboard_stats, get_revenue_chart};
use crate::app_state::AppState;
use crate::auth::{login, validate_jwt};
use crate::bookings::{
    get_booking, get_booking_stats, list_bookings, list_today_bookings, reschedule_booking,
    update_booking_status,
};
use crate::emergency::{
    assign_mechanic, get_emergency, get_emergency_stats, list_active_emergencies, list_emergencies,
    update_emergency_status,
};
use crate::faqs::{
    create_faq, create_faq_category, delete_faq, delete_faq_category, get_faq, get_faq_stats,
    list_faq_categories, list_faqs, reorder_faqs_handler, toggle_faq, update_faq,
    update_faq_category,
};
use crate::notifications::{
    get_notification_stats, list_user_notifications, send_notification_to_all,
    send_notification_to_user, send_push_notification,
};
use crate::orders::{
    get_order, get_order_stats, get_revenue_stats, list_orders, update_order, update_order_status,
};
use crate::products::{
    bulk_update_product_prices, create_category, create_product, delete_category, delete_product,
    get_inventory_stats, get_product, list_categories, list_low_stock_products, list_products,
    update_category, update_product, update_product_stock,
};
use crate::reviews::{
    approve_review_handler, delete_review, get_review, get_review_stats, hide_review,
    list_pending_reviews, list_recent_reviews, list_reviews,
};
use crate::support::{
    add_ticket_reply, assign_ticket, get_ticket, get_ticket_stats, list_tickets,
    update_ticket_status,
};
use crate::users::{
    get_loyalty_account, get_user, get_user_stats, list_user_addresses, list_user_vehicles,
    list_users, update_user, update_user_status,
};
use crate::vouchers::{
    create_voucher, delete_voucher, get_voucher, get_voucher_stats, list_vouchers, toggle_voucher,
    update_voucher,
};
use crate::workshops::{
    create_workshop, delete_workshop, get_workshop, list_workshops, toggle_workshop,
    update_workshop,
};
use crate::ws_server::ws_index;

#[derive(Debug)]
pub struct Authentication {
    secret: String,
}

impl Authentication {
    pub fn new(secret: &str) -> Self {
        Authentication {
            secret: secret.to_string(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for Authentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Transform = AuthMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddleware {
            service,
            secret: self.secret.clone(),
        })
    }
}

pub struct AuthMiddleware<S> {
    service: S,
    secret: String,
}

impl<S, B> Service<ServiceRequest> for AuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: MessageBody + 'static,
{
    type Response = ServiceResponse<BoxBody>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&self, req: ServiceRequest) -> Self::Future {
        // Login and the websocket handshake stay open; CORS preflights carry
        // no Authorization header, so OPTIONS passes through as well.
        let open = req.method() == &http::Method::OPTIONS
            || req.path().starts_with("/auth")
            || req.path() == "/ws";

        if !open {
            let token = req
                .headers()
                .get(http::header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .filter(|value| value.starts_with("Bearer "))
                .map(|value| value.trim_start_matches("Bearer ").trim().to_string());

            match token {
                Some(token) => match validate_jwt(&token, &self.secret) {
                    Ok(claims) => {
                        // Downstream handlers can read the admin uid
                        req.extensions_mut().insert(claims.sub);
                    }
                    Err(e) => {
                        let (req_parts, _payload) = req.into_parts();
                        let resp = HttpResponse::Unauthorized()
                            .body(format!("Invalid token: {}", e))
                            .map_into_boxed_body();
                        let srv_resp = ServiceResponse::new(req_parts, resp);
                        return Box::pin(async move { Ok(srv_resp) });
                    }
                },
                None => {
                    let (req_parts, _payload) = req.into_parts();
                    let resp = HttpResponse::Unauthorized()
                        .body("Unauthorized")
                        .map_into_boxed_body();
                    let srv_resp = ServiceResponse::new(req_parts, resp);
                    return Box::pin(async move { Ok(srv_resp) });
                }
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_boxed_body())
        })
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = config::Config::from_env();
    let store = Arc::new(store::Store::connect(&config.mongo_uri, &config.database_name).await);
    let realtime = realtime_server::RealtimeServer::new(store.clone()).start();

    info!("Server running at http://{}", config.bind_addr);
    info!("Allowed CORS origin: {}", config.frontend_origin);

    let bind_addr = config.bind_addr.clone();
    HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin(&config.frontend_origin)
            .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
            .allowed_headers(vec![
                http::header::CONTENT_TYPE,
                http::header::ACCEPT,
                http::header::AUTHORIZATION,
            ])
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .wrap(Authentication::new(&config.jwt_secret))
            .app_data(web::Data::new(AppState {
                realtime: realtime.clone(),
                store: store.clone(),
                config: config.clone(),
            }))
            // AUTH
            .service(
                web::scope("/auth")
                    .route("/login", web::post().to(login))
            )
            // ORDERS
            .service(
                web::scope("/orders")
                    .route("", web::get().to(list_orders))
                    .route("/stats", web::get().to(get_order_stats))
                    .route("/revenue", web::get().to(get_revenue_stats))
                    .route("/{order_id}", web::get().to(get_order))
                    .route("/{order_id}", web::put().to(update_order))
                    .route("/{order_id}/status", web::put().to(update_order_status))
            )
            // BOOKINGS
            .service(
                web::scope("/bookings")
                    .route("", web::get().to(list_bookings))
                    .route("/today", web::get().to(list_today_bookings))
                    .route("/stats", web::get().to(get_booking_stats))
                    .route("/{booking_id}", web::get().to(get_booking))
                    .route("/{booking_id}/status", web::put().to(update_booking_status))
                    .route("/{booking_id}/schedule", web::put().to(reschedule_booking))
            )
            // EMERGENCIES
            .service(
                web::scope("/emergencies")
                    .route("", web::get().to(list_emergencies))
                    .route("/active", web::get().to(list_active_emergencies))
                    .route("/stats", web::get().to(get_emergency_stats))
                    .route("/{request_id}", web::get().to(get_emergency))
                    .route("/{request_id}/status", web::put().to(update_emergency_status))
                    .route("/{request_id}/assign", web::put().to(assign_mechanic))
            )
            // SUPPORT TICKETS
            .service(
                web::scope("/support")
                    .route("", web::get().to(list_tickets))
                    .route("/stats", web::get().to(get_ticket_stats))
                    .route("/{ticket_id}", web::get().to(get_ticket))
                    .route("/{ticket_id}/status", web::put().to(update_ticket_status))
                    .route("/{ticket_id}/assign", web::put().to(assign_ticket))
                    .route("/{ticket_id}/replies", web::post().to(add_ticket_reply))
            )
            // PRODUCTS and CATEGORIES
            .service(
                web::scope("/products")
                    .route("", web::get().to(list_products))
                    .route("", web::post().to(create_product))
                    .route("/stats", web::get().to(get_inventory_stats))
                    .route("/low-stock", web::get().to(list_low_stock_products))
                    .route("/bulk-prices", web::post().to(bulk_update_product_prices))
                    .service(
                        web::scope("/categories")
                            .route("", web::get().to(list_categories))
                            .route("", web::post().to(create_category))
                            .route("/{category_id}", web::put().to(update_category))
                            .route("/{category_id}", web::delete().to(delete_category))
                    )
                    .route("/{product_id}", web::get().to(get_product))
                    .route("/{product_id}", web::put().to(update_product))
                    .route("/{product_id}", web::delete().to(delete_product))
                    .route("/{product_id}/stock", web::put().to(update_product_stock))
            )
            // VOUCHERS
            .service(
                web::scope("/vouchers")
                    .route("", web::get().to(list_vouchers))
                    .route("", web::post().to(create_voucher))
                    .route("/stats", web::get().to(get_voucher_stats))
                    .route("/{voucher_id}", web::get().to(get_voucher))
                    .route("/{voucher_id}", web::put().to(update_voucher))
                    .route("/{voucher_id}", web::delete().to(delete_voucher))
                    .route("/{voucher_id}/toggle", web::put().to(toggle_voucher))
            )
            // WORKSHOPS
            .service(
                web::scope("/workshops")
                    .route("", web::get().to(list_workshops))
                    .route("", web::post().to(create_workshop))
                    .route("/{workshop_id}", web::get().to(get_workshop))
                    .route("/{workshop_id}", web::put().to(update_workshop))
                    .route("/{workshop_id}", web::delete().to(delete_workshop))
                    .route("/{workshop_id}/toggle", web::put().to(toggle_workshop))
            )
            // USERS
            .service(
                web::scope("/users")
                    .route("", web::get().to(list_users))
                    .route("/stats", web::get().to(get_user_stats))
                    .route("/{user_id}", web::get().to(get_user))
                    .route("/{user_id}", web::put().to(update_user))
                    .route("/{user_id}/status", web::put().to(update_user_status))
                    .route("/{user_id}/vehicles", web::get().to(list_user_vehicles))
                    .route("/{user_id}/addresses", web::get().to(list_user_addresses))
                    .route("/{user_id}/loyalty", web::get().to(get_loyalty_account))
            )
            // REVIEWS
            .service(
                web::scope("/reviews")
                    .route("", web::get().to(list_reviews))
                    .route("/stats", web::get().to(get_review_stats))
                    .route("/recent", web::get().to(list_recent_reviews))
                    .route("/pending", web::get().to(list_pending_reviews))
                    .route("/{review_id}", web::get().to(get_review))
                    .route("/{review_id}", web::delete().to(delete_review))
                    .route("/{review_id}/approve", web::put().to(approve_review_handler))
                    .route("/{review_id}/hide", web::put().to(hide_review))
            )
            // FAQS and CATEGORIES
            .service(
                web::scope("/faqs")
                    .route("", web::get().to(list_faqs))
                    .route("", web::post().to(create_faq))
                    .route("/stats", web::get().to(get_faq_stats))
                    .route("/reorder", web::put().to(reorder_faqs_handler))
                    .service(
                        web::scope("/categories")
                            .route("", web::get().to(list_faq_categories))
                            .route("", web::post().to(create_faq_category))
                            .route("/{category_id}", web::put().to(update_faq_category))
                            .route("/{category_id}", web::delete().to(delete_faq_category))
                    )
                    .route("/{faq_id}", web::get().to(get_faq))
                    .route("/{faq_id}", web::put().to(update_faq))
                    .route("/{faq_id}", web::delete().to(delete_faq))
                    .route("/{faq_id}/toggle", web::put().to(toggle_faq))
            )
            // NOTIFICATIONS
            .service(
                web::scope("/notifications")
                    .route("/stats", web::get().to(get_notification_stats))
                    .route("/user/{user_id}", web::get().to(list_user_notifications))
                    .route("/user/{user_id}", web::post().to(send_notification_to_user))
                    .route("/send", web::post().to(send_push_notification))
                    .route("/broadcast", web::post().to(send_notification_to_all))
            )
            // ANALYTICS
            .service(
                web::scope("/analytics")
                    .route("/dashboard", web::get().to(get_dashboard_stats))
                    .route("/revenue", web::get().to(get_revenue_chart))
            )
            // WEBSOCKET route for real-time
            .service(
                web::resource("/ws").route(web::get().to(ws_index))
            )
    })
        .bind(&bind_addr)?
        .run()
        .await
}
