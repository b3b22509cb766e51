// src/analytics.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::Utc;
use log::error;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::bookings::compute_booking_stats;
use crate::emergency::compute_emergency_stats;
use crate::orders::{compute_order_stats, compute_revenue_stats, OrderStats, RevenuePoint};
use crate::products::compute_inventory_stats;
use crate::store::{Store, StoreResult};
use crate::support::compute_ticket_stats;
use crate::users::compute_user_stats;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingSummary {
    pub total: i64,
    pub pending: i64,
    pub today_bookings: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub total: i64,
    pub new_this_month: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencySummary {
    pub pending: i64,
    pub active: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportSummary {
    pub open: i64,
    pub in_progress: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventorySummary {
    pub total_products: i64,
    pub low_stock: i64,
    pub out_of_stock: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub orders: OrderStats,
    pub bookings: BookingSummary,
    pub users: UserSummary,
    pub emergencies: EmergencySummary,
    pub support: SupportSummary,
    pub inventory: InventorySummary,
}

/// One round trip for the landing page: every section's counters are
/// gathered concurrently and projected down to what the cards show.
pub async fn compute_dashboard_stats(store: &Store) -> StoreResult<DashboardStats> {
    let (orders, bookings, users, emergencies, support, inventory) = futures::try_join!(
        compute_order_stats(store, Utc::now()),
        compute_booking_stats(store),
        compute_user_stats(store),
        compute_emergency_stats(store),
        compute_ticket_stats(store),
        compute_inventory_stats(store),
    )?;

    Ok(DashboardStats {
        orders,
        bookings: BookingSummary {
            total: bookings.total,
            pending: bookings.pending,
            today_bookings: bookings.today_bookings,
        },
        users: UserSummary {
            total: users.total,
            new_this_month: users.new_this_month,
        },
        emergencies: EmergencySummary {
            pending: emergencies.pending,
            active: emergencies.active,
        },
        support: SupportSummary {
            open: support.open,
            in_progress: support.in_progress,
        },
        inventory: InventorySummary {
            total_products: inventory.total_products,
            low_stock: inventory.low_stock,
            out_of_stock: inventory.out_of_stock,
        },
    })
}

pub async fn fetch_revenue_chart(store: &Store, days: i64) -> StoreResult<Vec<RevenuePoint>> {
    compute_revenue_stats(store, days).await
}

pub async fn get_dashboard_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_dashboard_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing dashboard stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing dashboard stats")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RevenueChartQuery {
    pub days: Option<i64>,
}

pub async fn get_revenue_chart(
    data: web::Data<AppState>,
    query: web::Query<RevenueChartQuery>,
) -> impl Responder {
    match fetch_revenue_chart(&data.store, query.days.unwrap_or(30)).await {
        Ok(points) => HttpResponse::Ok().json(points),
        Err(e) => {
            error!("Error computing revenue chart: {}", e);
            HttpResponse::InternalServerError().body("Error computing revenue chart")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::bson_date;
    use mongodb::bson::doc;

    #[tokio::test]
    async fn dashboard_composes_every_section() {
        let store = Store::memory();
        let now = bson_date(Utc::now());

        store
            .create(
                "orders",
                doc! { "status": "pendingPayment", "total": 50.0, "createdAt": now.clone() },
            )
            .await
            .unwrap();
        store
            .create(
                "orders",
                doc! { "status": "completed", "total": 100.0, "createdAt": now.clone() },
            )
            .await
            .unwrap();

        store
            .create(
                "bookings",
                doc! { "status": "pending", "appointmentDate": now.clone() },
            )
            .await
            .unwrap();

        store
            .create("users", doc! { "name": "a", "createdAt": now.clone() })
            .await
            .unwrap();

        store
            .create("emergency_requests", doc! { "status": "pending" })
            .await
            .unwrap();
        store
            .create("emergency_requests", doc! { "status": "dispatched" })
            .await
            .unwrap();

        store
            .create("support_tickets", doc! { "status": "open" })
            .await
            .unwrap();
        store
            .create("support_tickets", doc! { "status": "inProgress" })
            .await
            .unwrap();

        store
            .create("products", doc! { "price": 30.0, "stockQuantity": 0_i64 })
            .await
            .unwrap();
        store
            .create("products", doc! { "price": 10.0, "stockQuantity": 3_i64 })
            .await
            .unwrap();

        let stats = compute_dashboard_stats(&store).await.unwrap();

        assert_eq!(stats.orders.total, 2);
        assert_eq!(stats.orders.pending, 1);
        assert_eq!(stats.orders.completed, 1);
        assert_eq!(stats.orders.revenue, 150.0);

        assert_eq!(stats.bookings.total, 1);
        assert_eq!(stats.bookings.pending, 1);
        assert_eq!(stats.bookings.today_bookings, 1);

        assert_eq!(stats.users.total, 1);
        assert_eq!(stats.users.new_this_month, 1);

        assert_eq!(stats.emergencies.pending, 1);
        assert_eq!(stats.emergencies.active, 1);

        assert_eq!(stats.support.open, 1);
        assert_eq!(stats.support.in_progress, 1);

        assert_eq!(stats.inventory.total_products, 2);
        assert_eq!(stats.inventory.low_stock, 1);
        assert_eq!(stats.inventory.out_of_stock, 1);
    }

    #[tokio::test]
    async fn revenue_chart_delegates_to_order_history() {
        let store = Store::memory();
        store
            .create(
                "orders",
                doc! { "status": "completed", "total": 80.0, "createdAt": bson_date(Utc::now()) },
            )
            .await
            .unwrap();

        let points = fetch_revenue_chart(&store, 7).await.unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].revenue, 80.0);
        assert_eq!(points[0].orders, 1);
    }
}
