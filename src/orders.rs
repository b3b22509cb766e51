// src/orders.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::app_state::AppState;
use crate::normalize::{
    bson_date, doc_id, doc_list_field, int_field, num_field, opt_str_field, str_field,
    timestamp_field,
};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    PendingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::PendingPayment => "pendingPayment",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::InProgress => "inProgress",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Lenient read of stored values; anything unknown is treated as the
    /// initial status.
    pub fn parse(value: &str) -> Self {
        match value {
            "confirmed" => OrderStatus::Confirmed,
            "inProgress" => OrderStatus::InProgress,
            "completed" => OrderStatus::Completed,
            "cancelled" => OrderStatus::Cancelled,
            "refunded" => OrderStatus::Refunded,
            _ => OrderStatus::PendingPayment,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    EWallet,
    Bnpl,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "creditCard",
            PaymentMethod::DebitCard => "debitCard",
            PaymentMethod::EWallet => "eWallet",
            PaymentMethod::Bnpl => "bnpl",
            PaymentMethod::Cash => "cash",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "creditCard" => Some(PaymentMethod::CreditCard),
            "debitCard" => Some(PaymentMethod::DebitCard),
            "eWallet" => Some(PaymentMethod::EWallet),
            "bnpl" => Some(PaymentMethod::Bnpl),
            "cash" => Some(PaymentMethod::Cash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: f64,
    pub total_price: f64,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub order_number: String,
    pub items: Vec<OrderItem>,
    pub subtotal: f64,
    pub discount: f64,
    pub tax: f64,
    pub total: f64,
    pub status: OrderStatus,
    pub payment_method: Option<PaymentMethod>,
    pub payment_id: Option<String>,
    pub workshop_id: Option<String>,
    pub booking_id: Option<String>,
    pub voucher_id: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Normalizes a stored order. Item rows still carry the old `price` and
/// `subtotal` field names on legacy documents.
pub fn transform_order(id: &str, data: &Document) -> Order {
    let items = doc_list_field(data, "items")
        .iter()
        .map(|item| OrderItem {
            product_id: str_field(item, &["productId"], ""),
            product_name: str_field(item, &["productName"], ""),
            quantity: int_field(item, &["quantity"], 0),
            unit_price: num_field(item, &["unitPrice", "price"], 0.0),
            total_price: num_field(item, &["totalPrice", "subtotal"], 0.0),
            image_url: opt_str_field(item, &["imageUrl"]),
        })
        .collect();

    let fallback_number: String = id.chars().take(8).collect::<String>().to_uppercase();

    Order {
        id: id.to_string(),
        user_id: str_field(data, &["userId"], ""),
        order_number: str_field(data, &["orderNumber"], &fallback_number),
        items,
        subtotal: num_field(data, &["subtotal"], 0.0),
        discount: num_field(data, &["discount"], 0.0),
        tax: num_field(data, &["tax"], 0.0),
        total: num_field(data, &["total"], 0.0),
        status: OrderStatus::parse(data.get_str("status").unwrap_or("")),
        payment_method: data
            .get_str("paymentMethod")
            .ok()
            .and_then(PaymentMethod::parse),
        payment_id: opt_str_field(data, &["paymentId"]),
        workshop_id: opt_str_field(data, &["workshopId"]),
        booking_id: opt_str_field(data, &["bookingId"]),
        voucher_id: opt_str_field(data, &["voucherId"]),
        notes: opt_str_field(data, &["notes"]),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderFilters {
    pub status: Option<OrderStatus>,
    pub user_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub async fn fetch_orders(store: &Store, filters: &OrderFilters) -> StoreResult<Vec<Order>> {
    let mut query = StoreQuery::new().order_desc("createdAt");
    if let Some(status) = filters.status {
        query = query.filter(Predicate::Eq("status".into(), Bson::from(status.as_str())));
    }
    if let Some(user_id) = &filters.user_id {
        query = query.filter(Predicate::Eq("userId".into(), Bson::from(user_id.as_str())));
    }
    if let Some(limit) = filters.limit {
        query = query.limit(limit);
    }

    let docs = store.fetch_filtered("orders", &query).await?;
    let mut orders: Vec<Order> = docs.iter().map(|d| transform_order(&doc_id(d), d)).collect();

    // Date bounds run on normalized timestamps, whichever query path ran.
    if let Some(start) = filters.start_date {
        orders.retain(|o| o.created_at >= start);
    }
    if let Some(end) = filters.end_date {
        orders.retain(|o| o.created_at <= end);
    }
    Ok(orders)
}

pub async fn fetch_order(store: &Store, order_id: &str) -> StoreResult<Option<Order>> {
    let found = store.get("orders", order_id).await?;
    Ok(found.map(|d| transform_order(order_id, &d)))
}

pub async fn set_order_status(
    store: &Store,
    order_id: &str,
    status: OrderStatus,
) -> StoreResult<bool> {
    store
        .update(
            "orders",
            order_id,
            doc! {
                "status": status.as_str(),
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateOrderRequest {
    pub status: Option<OrderStatus>,
    pub payment_method: Option<PaymentMethod>,
    pub payment_id: Option<String>,
    pub workshop_id: Option<String>,
    pub booking_id: Option<String>,
    pub voucher_id: Option<String>,
    pub notes: Option<String>,
    pub discount: Option<f64>,
    pub tax: Option<f64>,
    pub total: Option<f64>,
}

pub async fn update_order_fields(
    store: &Store,
    order_id: &str,
    payload: &UpdateOrderRequest,
) -> StoreResult<bool> {
    let mut update_doc = doc! {};
    if let Some(status) = payload.status {
        update_doc.insert("status", status.as_str());
    }
    if let Some(method) = payload.payment_method {
        update_doc.insert("paymentMethod", method.as_str());
    }
    if let Some(payment_id) = &payload.payment_id {
        update_doc.insert("paymentId", payment_id);
    }
    if let Some(workshop_id) = &payload.workshop_id {
        update_doc.insert("workshopId", workshop_id);
    }
    if let Some(booking_id) = &payload.booking_id {
        update_doc.insert("bookingId", booking_id);
    }
    if let Some(voucher_id) = &payload.voucher_id {
        update_doc.insert("voucherId", voucher_id);
    }
    if let Some(notes) = &payload.notes {
        update_doc.insert("notes", notes);
    }
    if let Some(discount) = payload.discount {
        update_doc.insert("discount", discount);
    }
    if let Some(tax) = payload.tax {
        update_doc.insert("tax", tax);
    }
    if let Some(total) = payload.total {
        update_doc.insert("total", total);
    }
    update_doc.insert("updatedAt", BsonDateTime::now());
    store.update("orders", order_id, update_doc).await
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderStats {
    pub total: i64,
    pub pending: i64,
    pub completed: i64,
    pub revenue: f64,
}

/// Counts for one calendar day, over raw documents. Pending covers both
/// payment-pending and confirmed orders.
pub async fn compute_order_stats(store: &Store, date: DateTime<Utc>) -> StoreResult<OrderStats> {
    let start = Utc.from_utc_datetime(&date.date_naive().and_time(NaiveTime::MIN));
    let end = start + Duration::days(1) - Duration::milliseconds(1);

    let query = StoreQuery::new()
        .filter(Predicate::Gte("createdAt".into(), bson_date(start)))
        .filter(Predicate::Lte("createdAt".into(), bson_date(end)));
    let docs = store.list("orders", &query).await?;

    let mut stats = OrderStats {
        total: docs.len() as i64,
        pending: 0,
        completed: 0,
        revenue: 0.0,
    };
    for order in &docs {
        match order.get_str("status").unwrap_or("") {
            "pendingPayment" | "confirmed" => stats.pending += 1,
            "completed" => stats.completed += 1,
            _ => {}
        }
        stats.revenue += num_field(order, &["total"], 0.0);
    }
    Ok(stats)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RevenuePoint {
    pub date: String,
    pub revenue: f64,
    pub orders: i64,
}

/// Daily revenue over the trailing period, for the dashboard chart. Only
/// billable statuses count, and only documents with a store-native
/// timestamp land on the chart.
pub async fn compute_revenue_stats(store: &Store, days: i64) -> StoreResult<Vec<RevenuePoint>> {
    let start = Utc::now() - Duration::days(days);
    let query = StoreQuery::new()
        .filter(Predicate::Gte("createdAt".into(), bson_date(start)))
        .filter(Predicate::In(
            "status".into(),
            vec![
                Bson::from("completed"),
                Bson::from("confirmed"),
                Bson::from("inProgress"),
            ],
        ))
        .order_asc("createdAt");
    let docs = store.list("orders", &query).await?;

    let mut grouped: BTreeMap<String, (f64, i64)> = BTreeMap::new();
    for order in &docs {
        let created = match order.get_datetime("createdAt") {
            Ok(dt) => dt.to_chrono(),
            Err(_) => continue,
        };
        let day = created.format("%Y-%m-%d").to_string();
        let entry = grouped.entry(day).or_insert((0.0, 0));
        entry.0 += num_field(order, &["total"], 0.0);
        entry.1 += 1;
    }

    Ok(grouped
        .into_iter()
        .map(|(date, (revenue, orders))| RevenuePoint {
            date,
            revenue,
            orders,
        })
        .collect())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    pub status: Option<OrderStatus>,
    pub user_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub async fn list_orders(
    data: web::Data<AppState>,
    query: web::Query<OrderListQuery>,
) -> impl Responder {
    let filters = OrderFilters {
        status: query.status,
        user_id: query.user_id.clone(),
        start_date: query.start_date,
        end_date: query.end_date,
        limit: query.limit,
    };
    match fetch_orders(&data.store, &filters).await {
        Ok(orders) => HttpResponse::Ok().json(orders),
        Err(e) => {
            error!("Error fetching orders: {}", e);
            HttpResponse::InternalServerError().body("Error fetching orders")
        }
    }
}

pub async fn get_order(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let order_id = path.into_inner();
    match fetch_order(&data.store, &order_id).await {
        Ok(Some(order)) => HttpResponse::Ok().json(order),
        Ok(None) => HttpResponse::NotFound().body("Order not found"),
        Err(e) => {
            error!("Error fetching order {}: {}", order_id, e);
            HttpResponse::InternalServerError().body("Error fetching order")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateOrderStatusRequest {
    pub status: OrderStatus,
}

pub async fn update_order_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateOrderStatusRequest>,
) -> impl Responder {
    let order_id = path.into_inner();
    match set_order_status(&data.store, &order_id, payload.status).await {
        Ok(true) => HttpResponse::Ok().body("Order status updated"),
        Ok(false) => HttpResponse::NotFound().body("Order not found"),
        Err(e) => {
            error!("Error updating order {}: {}", order_id, e);
            HttpResponse::InternalServerError().body("Error updating order")
        }
    }
}

pub async fn update_order(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateOrderRequest>,
) -> impl Responder {
    let order_id = path.into_inner();
    match update_order_fields(&data.store, &order_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("Order updated"),
        Ok(false) => HttpResponse::NotFound().body("Order not found"),
        Err(e) => {
            error!("Error updating order {}: {}", order_id, e);
            HttpResponse::InternalServerError().body("Error updating order")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrderStatsQuery {
    pub date: Option<DateTime<Utc>>,
}

pub async fn get_order_stats(
    data: web::Data<AppState>,
    query: web::Query<OrderStatsQuery>,
) -> impl Responder {
    let date = query.date.unwrap_or_else(Utc::now);
    match compute_order_stats(&data.store, date).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing order stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing order stats")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RevenueStatsQuery {
    pub days: Option<i64>,
}

pub async fn get_revenue_stats(
    data: web::Data<AppState>,
    query: web::Query<RevenueStatsQuery>,
) -> impl Responder {
    let days = query.days.unwrap_or(30);
    match compute_revenue_stats(&data.store, days).await {
        Ok(points) => HttpResponse::Ok().json(points),
        Err(e) => {
            error!("Error computing revenue stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing revenue stats")
        }
    }
}
