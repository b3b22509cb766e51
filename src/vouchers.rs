// src/vouchers.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use mongodb::bson::{doc, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::normalize::{
    bool_field, bson_date, doc_id, int_field, num_field, opt_bool_field, opt_num_field, str_field,
    timestamp_field,
};
use crate::store::{Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Voucher {
    pub id: String,
    pub code: String,
    pub title: String,
    pub description: String,
    pub discount_value: f64,
    pub is_percentage: bool,
    pub min_spend: Option<f64>,
    pub max_discount: Option<f64>,
    pub applicable_categories: Option<Vec<String>>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub points_cost: i64,
}

/// Early vouchers carried `discountType`/`minPurchase`/`name`; the flag
/// and spend floor fall back to those when the newer fields are absent.
pub fn transform_voucher(id: &str, data: &Document) -> Voucher {
    let is_percentage = opt_bool_field(data, &["isPercentage"])
        .unwrap_or_else(|| data.get_str("discountType").unwrap_or("") == "percentage");

    Voucher {
        id: id.to_string(),
        code: str_field(data, &["code"], ""),
        title: str_field(data, &["title", "name"], ""),
        description: str_field(data, &["description"], ""),
        discount_value: num_field(data, &["discountValue"], 0.0),
        is_percentage,
        min_spend: opt_num_field(data, &["minSpend", "minPurchase"]),
        max_discount: opt_num_field(data, &["maxDiscount"]),
        applicable_categories: data.get_array("applicableCategories").ok().map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        }),
        valid_from: timestamp_field(data, "validFrom"),
        valid_until: timestamp_field(data, "validUntil"),
        is_active: bool_field(data, &["isActive"], true),
        points_cost: int_field(data, &["pointsCost"], 0),
    }
}

pub async fn fetch_vouchers(store: &Store) -> StoreResult<Vec<Voucher>> {
    let query = StoreQuery::new().order_desc("createdAt");
    let docs = store.list("vouchers", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_voucher(&doc_id(d), d))
        .collect())
}

pub async fn fetch_voucher(store: &Store, voucher_id: &str) -> StoreResult<Option<Voucher>> {
    let found = store.get("vouchers", voucher_id).await?;
    Ok(found.map(|d| transform_voucher(voucher_id, &d)))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVoucherRequest {
    pub code: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub discount_value: f64,
    pub is_percentage: bool,
    pub min_spend: Option<f64>,
    pub max_discount: Option<f64>,
    pub applicable_categories: Option<Vec<String>>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub points_cost: i64,
}

pub async fn add_voucher(store: &Store, req: &CreateVoucherRequest) -> StoreResult<String> {
    let mut voucher = doc! {
        "code": &req.code,
        "title": &req.title,
        "description": &req.description,
        "discountValue": req.discount_value,
        "isPercentage": req.is_percentage,
        "validFrom": bson_date(req.valid_from),
        "validUntil": bson_date(req.valid_until),
        "isActive": req.is_active,
        "pointsCost": req.points_cost,
        "createdAt": bson_date(Utc::now()),
    };
    if let Some(min_spend) = req.min_spend {
        voucher.insert("minSpend", min_spend);
    }
    if let Some(max_discount) = req.max_discount {
        voucher.insert("maxDiscount", max_discount);
    }
    if let Some(categories) = &req.applicable_categories {
        voucher.insert("applicableCategories", categories.clone());
    }
    store.create("vouchers", voucher).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVoucherRequest {
    pub code: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub discount_value: Option<f64>,
    pub is_percentage: Option<bool>,
    pub min_spend: Option<f64>,
    pub max_discount: Option<f64>,
    pub applicable_categories: Option<Vec<String>>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: Option<bool>,
    pub points_cost: Option<i64>,
}

pub async fn update_voucher_fields(
    store: &Store,
    voucher_id: &str,
    req: &UpdateVoucherRequest,
) -> StoreResult<bool> {
    let mut update_doc = Document::new();
    if let Some(code) = &req.code {
        update_doc.insert("code", code);
    }
    if let Some(title) = &req.title {
        update_doc.insert("title", title);
    }
    if let Some(description) = &req.description {
        update_doc.insert("description", description);
    }
    if let Some(discount_value) = req.discount_value {
        update_doc.insert("discountValue", discount_value);
    }
    if let Some(is_percentage) = req.is_percentage {
        update_doc.insert("isPercentage", is_percentage);
    }
    if let Some(min_spend) = req.min_spend {
        update_doc.insert("minSpend", min_spend);
    }
    if let Some(max_discount) = req.max_discount {
        update_doc.insert("maxDiscount", max_discount);
    }
    if let Some(categories) = &req.applicable_categories {
        update_doc.insert("applicableCategories", categories.clone());
    }
    if let Some(valid_from) = req.valid_from {
        update_doc.insert("validFrom", bson_date(valid_from));
    }
    if let Some(valid_until) = req.valid_until {
        update_doc.insert("validUntil", bson_date(valid_until));
    }
    if let Some(is_active) = req.is_active {
        update_doc.insert("isActive", is_active);
    }
    if let Some(points_cost) = req.points_cost {
        update_doc.insert("pointsCost", points_cost);
    }
    store.update("vouchers", voucher_id, update_doc).await
}

pub async fn remove_voucher(store: &Store, voucher_id: &str) -> StoreResult<bool> {
    store.delete("vouchers", voucher_id).await
}

pub async fn set_voucher_active(
    store: &Store,
    voucher_id: &str,
    is_active: bool,
) -> StoreResult<bool> {
    store
        .update("vouchers", voucher_id, doc! { "isActive": is_active })
        .await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoucherStats {
    pub total: i64,
    pub active: i64,
    pub expired: i64,
}

/// A voucher counts as active only while its flag is set and its window
/// has not closed. Expiry ignores the flag entirely.
pub async fn compute_voucher_stats(store: &Store) -> StoreResult<VoucherStats> {
    let vouchers = fetch_vouchers(store).await?;
    let now = Utc::now();
    Ok(VoucherStats {
        total: vouchers.len() as i64,
        active: vouchers
            .iter()
            .filter(|v| v.is_active && v.valid_until > now)
            .count() as i64,
        expired: vouchers.iter().filter(|v| v.valid_until <= now).count() as i64,
    })
}

pub async fn list_vouchers(data: web::Data<AppState>) -> impl Responder {
    match fetch_vouchers(&data.store).await {
        Ok(vouchers) => HttpResponse::Ok().json(vouchers),
        Err(e) => {
            error!("Error fetching vouchers: {}", e);
            HttpResponse::InternalServerError().body("Error fetching vouchers")
        }
    }
}

pub async fn get_voucher(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let voucher_id = path.into_inner();
    match fetch_voucher(&data.store, &voucher_id).await {
        Ok(Some(voucher)) => HttpResponse::Ok().json(voucher),
        Ok(None) => HttpResponse::NotFound().body("Voucher not found"),
        Err(e) => {
            error!("Error fetching voucher {}: {}", voucher_id, e);
            HttpResponse::InternalServerError().body("Error fetching voucher")
        }
    }
}

pub async fn create_voucher(
    data: web::Data<AppState>,
    payload: web::Json<CreateVoucherRequest>,
) -> impl Responder {
    match add_voucher(&data.store, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error creating voucher: {}", e);
            HttpResponse::InternalServerError().body("Error creating voucher")
        }
    }
}

pub async fn update_voucher(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateVoucherRequest>,
) -> impl Responder {
    let voucher_id = path.into_inner();
    match update_voucher_fields(&data.store, &voucher_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("Voucher updated"),
        Ok(false) => HttpResponse::NotFound().body("Voucher not found"),
        Err(e) => {
            error!("Error updating voucher {}: {}", voucher_id, e);
            HttpResponse::InternalServerError().body("Error updating voucher")
        }
    }
}

pub async fn delete_voucher(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let voucher_id = path.into_inner();
    match remove_voucher(&data.store, &voucher_id).await {
        Ok(true) => HttpResponse::Ok().body("Voucher deleted"),
        Ok(false) => HttpResponse::NotFound().body("Voucher not found"),
        Err(e) => {
            error!("Error deleting voucher {}: {}", voucher_id, e);
            HttpResponse::InternalServerError().body("Error deleting voucher")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleVoucherRequest {
    pub is_active: bool,
}

pub async fn toggle_voucher(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ToggleVoucherRequest>,
) -> impl Responder {
    let voucher_id = path.into_inner();
    match set_voucher_active(&data.store, &voucher_id, payload.is_active).await {
        Ok(true) => HttpResponse::Ok().body("Voucher status updated"),
        Ok(false) => HttpResponse::NotFound().body("Voucher not found"),
        Err(e) => {
            error!("Error toggling voucher {}: {}", voucher_id, e);
            HttpResponse::InternalServerError().body("Error toggling voucher")
        }
    }
}

pub async fn get_voucher_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_voucher_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing voucher stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing voucher stats")
        }
    }
}
