// src/faqs.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::normalize::{bool_field, doc_id, int_field, str_field, timestamp_field};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Faq {
    pub id: String,
    pub question: String,
    pub answer: String,
    pub category: String,
    pub sort_order: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn transform_faq(id: &str, data: &Document) -> Faq {
    Faq {
        id: id.to_string(),
        question: str_field(data, &["question"], ""),
        answer: str_field(data, &["answer"], ""),
        category: str_field(data, &["category"], "General"),
        sort_order: int_field(data, &["sortOrder"], 0),
        is_active: bool_field(data, &["isActive"], true),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct FaqFilters {
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn fetch_faqs(store: &Store, filters: &FaqFilters) -> StoreResult<Vec<Faq>> {
    let mut query = StoreQuery::new().order_asc("sortOrder");
    if let Some(category) = &filters.category {
        query = query.filter(Predicate::Eq(
            "category".into(),
            Bson::from(category.as_str()),
        ));
    }
    if let Some(is_active) = filters.is_active {
        query = query.filter(Predicate::Eq("isActive".into(), Bson::Boolean(is_active)));
    }
    let docs = store.fetch_filtered("faqs", &query).await?;
    Ok(docs.iter().map(|d| transform_faq(&doc_id(d), d)).collect())
}

pub async fn fetch_faq(store: &Store, faq_id: &str) -> StoreResult<Option<Faq>> {
    let found = store.get("faqs", faq_id).await?;
    Ok(found.map(|d| transform_faq(faq_id, &d)))
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFaqRequest {
    pub question: String,
    pub answer: String,
    pub category: String,
    #[serde(default)]
    pub sort_order: i64,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

pub async fn add_faq(store: &Store, req: &CreateFaqRequest) -> StoreResult<String> {
    store
        .create(
            "faqs",
            doc! {
                "question": &req.question,
                "answer": &req.answer,
                "category": &req.category,
                "sortOrder": req.sort_order,
                "isActive": req.is_active,
                "createdAt": BsonDateTime::now(),
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFaqRequest {
    pub question: Option<String>,
    pub answer: Option<String>,
    pub category: Option<String>,
    pub sort_order: Option<i64>,
    pub is_active: Option<bool>,
}

pub async fn update_faq_fields(
    store: &Store,
    faq_id: &str,
    req: &UpdateFaqRequest,
) -> StoreResult<bool> {
    let mut update_doc = Document::new();
    if let Some(question) = &req.question {
        update_doc.insert("question", question);
    }
    if let Some(answer) = &req.answer {
        update_doc.insert("answer", answer);
    }
    if let Some(category) = &req.category {
        update_doc.insert("category", category);
    }
    if let Some(sort_order) = req.sort_order {
        update_doc.insert("sortOrder", sort_order);
    }
    if let Some(is_active) = req.is_active {
        update_doc.insert("isActive", is_active);
    }
    update_doc.insert("updatedAt", BsonDateTime::now());
    store.update("faqs", faq_id, update_doc).await
}

pub async fn remove_faq(store: &Store, faq_id: &str) -> StoreResult<bool> {
    store.delete("faqs", faq_id).await
}

pub async fn set_faq_active(store: &Store, faq_id: &str, is_active: bool) -> StoreResult<bool> {
    store
        .update(
            "faqs",
            faq_id,
            doc! { "isActive": is_active, "updatedAt": BsonDateTime::now() },
        )
        .await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqOrder {
    pub id: String,
    pub sort_order: i64,
}

/// Rewrites the sort position of each listed FAQ. Positions are the only
/// thing touched; the edit stamp is left alone so reordering does not
/// mark every entry as recently changed.
pub async fn reorder_faqs(store: &Store, orders: &[FaqOrder]) -> StoreResult<()> {
    let writes = orders
        .iter()
        .map(|o| store.update("faqs", &o.id, doc! { "sortOrder": o.sort_order }));
    try_join_all(writes).await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqCategory {
    pub id: String,
    pub name: String,
    pub sort_order: i64,
    pub is_active: bool,
}

pub fn transform_faq_category(id: &str, data: &Document) -> FaqCategory {
    FaqCategory {
        id: id.to_string(),
        name: str_field(data, &["name"], ""),
        sort_order: int_field(data, &["sortOrder"], 0),
        is_active: bool_field(data, &["isActive"], true),
    }
}

pub async fn fetch_faq_categories(store: &Store) -> StoreResult<Vec<FaqCategory>> {
    let query = StoreQuery::new().order_asc("sortOrder");
    let docs = store.fetch_filtered("faq_categories", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_faq_category(&doc_id(d), d))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqCategoryRequest {
    pub name: Option<String>,
    pub sort_order: Option<i64>,
    pub is_active: Option<bool>,
}

fn faq_category_doc(req: &FaqCategoryRequest) -> Document {
    let mut out = Document::new();
    if let Some(name) = &req.name {
        out.insert("name", name);
    }
    if let Some(sort_order) = req.sort_order {
        out.insert("sortOrder", sort_order);
    }
    if let Some(is_active) = req.is_active {
        out.insert("isActive", is_active);
    }
    out
}

pub async fn add_faq_category(store: &Store, req: &FaqCategoryRequest) -> StoreResult<String> {
    store.create("faq_categories", faq_category_doc(req)).await
}

pub async fn update_faq_category_fields(
    store: &Store,
    category_id: &str,
    req: &FaqCategoryRequest,
) -> StoreResult<bool> {
    store
        .update("faq_categories", category_id, faq_category_doc(req))
        .await
}

pub async fn remove_faq_category(store: &Store, category_id: &str) -> StoreResult<bool> {
    store.delete("faq_categories", category_id).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqStats {
    pub total: i64,
    pub active: i64,
    pub by_category: HashMap<String, i64>,
}

pub async fn compute_faq_stats(store: &Store) -> StoreResult<FaqStats> {
    let faqs = fetch_faqs(store, &FaqFilters::default()).await?;

    let mut by_category: HashMap<String, i64> = HashMap::new();
    for faq in &faqs {
        *by_category.entry(faq.category.clone()).or_insert(0) += 1;
    }

    Ok(FaqStats {
        total: faqs.len() as i64,
        active: faqs.iter().filter(|f| f.is_active).count() as i64,
        by_category,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaqListQuery {
    pub category: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list_faqs(
    data: web::Data<AppState>,
    query: web::Query<FaqListQuery>,
) -> impl Responder {
    let filters = FaqFilters {
        category: query.category.clone(),
        is_active: query.is_active,
    };
    match fetch_faqs(&data.store, &filters).await {
        Ok(faqs) => HttpResponse::Ok().json(faqs),
        Err(e) => {
            error!("Error fetching FAQs: {}", e);
            HttpResponse::InternalServerError().body("Error fetching FAQs")
        }
    }
}

pub async fn get_faq(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let faq_id = path.into_inner();
    match fetch_faq(&data.store, &faq_id).await {
        Ok(Some(faq)) => HttpResponse::Ok().json(faq),
        Ok(None) => HttpResponse::NotFound().body("FAQ not found"),
        Err(e) => {
            error!("Error fetching FAQ {}: {}", faq_id, e);
            HttpResponse::InternalServerError().body("Error fetching FAQ")
        }
    }
}

pub async fn create_faq(
    data: web::Data<AppState>,
    payload: web::Json<CreateFaqRequest>,
) -> impl Responder {
    match add_faq(&data.store, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error creating FAQ: {}", e);
            HttpResponse::InternalServerError().body("Error creating FAQ")
        }
    }
}

pub async fn update_faq(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateFaqRequest>,
) -> impl Responder {
    let faq_id = path.into_inner();
    match update_faq_fields(&data.store, &faq_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("FAQ updated"),
        Ok(false) => HttpResponse::NotFound().body("FAQ not found"),
        Err(e) => {
            error!("Error updating FAQ {}: {}", faq_id, e);
            HttpResponse::InternalServerError().body("Error updating FAQ")
        }
    }
}

pub async fn delete_faq(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let faq_id = path.into_inner();
    match remove_faq(&data.store, &faq_id).await {
        Ok(true) => HttpResponse::Ok().body("FAQ deleted"),
        Ok(false) => HttpResponse::NotFound().body("FAQ not found"),
        Err(e) => {
            error!("Error deleting FAQ {}: {}", faq_id, e);
            HttpResponse::InternalServerError().body("Error deleting FAQ")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleFaqRequest {
    pub is_active: bool,
}

pub async fn toggle_faq(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ToggleFaqRequest>,
) -> impl Responder {
    let faq_id = path.into_inner();
    match set_faq_active(&data.store, &faq_id, payload.is_active).await {
        Ok(true) => HttpResponse::Ok().body("FAQ status updated"),
        Ok(false) => HttpResponse::NotFound().body("FAQ not found"),
        Err(e) => {
            error!("Error toggling FAQ {}: {}", faq_id, e);
            HttpResponse::InternalServerError().body("Error toggling FAQ")
        }
    }
}

pub async fn reorder_faqs_handler(
    data: web::Data<AppState>,
    payload: web::Json<Vec<FaqOrder>>,
) -> impl Responder {
    match reorder_faqs(&data.store, &payload).await {
        Ok(()) => HttpResponse::Ok().body("FAQs reordered"),
        Err(e) => {
            error!("Error reordering FAQs: {}", e);
            HttpResponse::InternalServerError().body("Error reordering FAQs")
        }
    }
}

pub async fn list_faq_categories(data: web::Data<AppState>) -> impl Responder {
    match fetch_faq_categories(&data.store).await {
        Ok(categories) => HttpResponse::Ok().json(categories),
        Err(e) => {
            error!("Error fetching FAQ categories: {}", e);
            HttpResponse::InternalServerError().body("Error fetching FAQ categories")
        }
    }
}

pub async fn create_faq_category(
    data: web::Data<AppState>,
    payload: web::Json<FaqCategoryRequest>,
) -> impl Responder {
    match add_faq_category(&data.store, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error creating FAQ category: {}", e);
            HttpResponse::InternalServerError().body("Error creating FAQ category")
        }
    }
}

pub async fn update_faq_category(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<FaqCategoryRequest>,
) -> impl Responder {
    let category_id = path.into_inner();
    match update_faq_category_fields(&data.store, &category_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("FAQ category updated"),
        Ok(false) => HttpResponse::NotFound().body("FAQ category not found"),
        Err(e) => {
            error!("Error updating FAQ category {}: {}", category_id, e);
            HttpResponse::InternalServerError().body("Error updating FAQ category")
        }
    }
}

pub async fn delete_faq_category(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let category_id = path.into_inner();
    match remove_faq_category(&data.store, &category_id).await {
        Ok(true) => HttpResponse::Ok().body("FAQ category deleted"),
        Ok(false) => HttpResponse::NotFound().body("FAQ category not found"),
        Err(e) => {
            error!("Error deleting FAQ category {}: {}", category_id, e);
            HttpResponse::InternalServerError().body("Error deleting FAQ category")
        }
    }
}

pub async fn get_faq_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_faq_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing FAQ stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing FAQ stats")
        }
    }
}
