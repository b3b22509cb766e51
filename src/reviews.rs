// src/reviews.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::app_state::AppState;
use crate::normalize::{
    bool_field, doc_id, num_field, opt_str_field, str_field, str_list_field, timestamp_field,
};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReviewTarget {
    Workshop,
    Product,
}

impl ReviewTarget {
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewTarget::Workshop => "workshop",
            ReviewTarget::Product => "product",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "workshop" => ReviewTarget::Workshop,
            _ => ReviewTarget::Product,
        }
    }

    /// Collection holding the reviewed entity.
    pub fn collection(self) -> &'static str {
        match self {
            ReviewTarget::Workshop => "workshops",
            ReviewTarget::Product => "products",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub user_id: String,
    pub user_name: String,
    pub user_photo_url: Option<String>,
    pub target_id: String,
    pub target_type: ReviewTarget,
    pub rating: f64,
    pub comment: Option<String>,
    pub image_urls: Vec<String>,
    pub is_approved: bool,
    pub is_hidden: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reviews written before moderation existed have no flags; they count
/// as approved and visible.
pub fn transform_review(id: &str, data: &Document) -> Review {
    Review {
        id: id.to_string(),
        user_id: str_field(data, &["userId"], ""),
        user_name: str_field(data, &["userName"], "Anonymous"),
        user_photo_url: opt_str_field(data, &["userPhotoUrl"]),
        target_id: str_field(data, &["targetId"], ""),
        target_type: ReviewTarget::parse(data.get_str("targetType").unwrap_or("")),
        rating: num_field(data, &["rating"], 0.0),
        comment: opt_str_field(data, &["comment"]),
        image_urls: str_list_field(data, &["imageUrls"]),
        is_approved: bool_field(data, &["isApproved"], true),
        is_hidden: bool_field(data, &["isHidden"], false),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReviewFilters {
    pub target_type: Option<ReviewTarget>,
    pub target_id: Option<String>,
    pub user_id: Option<String>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub is_approved: Option<bool>,
    pub is_hidden: Option<bool>,
}

/// Identity filters run in the store; rating and moderation filters run
/// on the transformed rows so that legacy documents without flags are
/// judged by their defaults.
pub async fn fetch_reviews(store: &Store, filters: &ReviewFilters) -> StoreResult<Vec<Review>> {
    let mut query = StoreQuery::new().order_desc("createdAt");
    if let Some(target_type) = filters.target_type {
        query = query.filter(Predicate::Eq(
            "targetType".into(),
            Bson::from(target_type.as_str()),
        ));
    }
    if let Some(target_id) = &filters.target_id {
        query = query.filter(Predicate::Eq(
            "targetId".into(),
            Bson::from(target_id.as_str()),
        ));
    }
    if let Some(user_id) = &filters.user_id {
        query = query.filter(Predicate::Eq("userId".into(), Bson::from(user_id.as_str())));
    }
    let docs = store.fetch_filtered("reviews", &query).await?;
    let mut reviews: Vec<Review> = docs
        .iter()
        .map(|d| transform_review(&doc_id(d), d))
        .collect();

    if let Some(min_rating) = filters.min_rating {
        reviews.retain(|r| r.rating >= min_rating);
    }
    if let Some(max_rating) = filters.max_rating {
        reviews.retain(|r| r.rating <= max_rating);
    }
    if let Some(is_approved) = filters.is_approved {
        reviews.retain(|r| r.is_approved == is_approved);
    }
    if let Some(is_hidden) = filters.is_hidden {
        reviews.retain(|r| r.is_hidden == is_hidden);
    }
    Ok(reviews)
}

pub async fn fetch_review(store: &Store, review_id: &str) -> StoreResult<Option<Review>> {
    let found = store.get("reviews", review_id).await?;
    Ok(found.map(|d| transform_review(review_id, &d)))
}

pub async fn fetch_target_reviews(
    store: &Store,
    target_id: &str,
    target_type: ReviewTarget,
) -> StoreResult<Vec<Review>> {
    let query = StoreQuery::new()
        .filter(Predicate::Eq("targetId".into(), Bson::from(target_id)))
        .filter(Predicate::Eq(
            "targetType".into(),
            Bson::from(target_type.as_str()),
        ))
        .order_desc("createdAt");
    let docs = store.list("reviews", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_review(&doc_id(d), d))
        .collect())
}

pub async fn approve_review(store: &Store, review_id: &str) -> StoreResult<bool> {
    store
        .update(
            "reviews",
            review_id,
            doc! { "isApproved": true, "updatedAt": BsonDateTime::now() },
        )
        .await
}

pub async fn set_review_hidden(store: &Store, review_id: &str, hide: bool) -> StoreResult<bool> {
    store
        .update(
            "reviews",
            review_id,
            doc! { "isHidden": hide, "updatedAt": BsonDateTime::now() },
        )
        .await
}

/// Removes a review and recomputes the target's aggregate rating from
/// the reviews that remain.
pub async fn remove_review(store: &Store, review_id: &str) -> StoreResult<bool> {
    let review = match fetch_review(store, review_id).await? {
        Some(review) => review,
        None => return Ok(false),
    };
    store.delete("reviews", review_id).await?;
    update_aggregate_rating(store, &review.target_id, review.target_type).await?;
    Ok(true)
}

/// Rewrites the target's `rating` and `reviewCount` from its visible
/// reviews. With no visible reviews left the previous aggregate stays;
/// wiping it would zero the rating of every freshly moderated target.
pub async fn update_aggregate_rating(
    store: &Store,
    target_id: &str,
    target_type: ReviewTarget,
) -> StoreResult<()> {
    let reviews = fetch_target_reviews(store, target_id, target_type).await?;
    let visible: Vec<&Review> = reviews
        .iter()
        .filter(|r| !r.is_hidden && r.is_approved)
        .collect();

    if visible.is_empty() {
        return Ok(());
    }

    let total: f64 = visible.iter().map(|r| r.rating).sum();
    let average = total / visible.len() as f64;
    store
        .update(
            target_type.collection(),
            target_id,
            doc! {
                "rating": (average * 10.0).round() / 10.0,
                "reviewCount": visible.len() as i64,
            },
        )
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total: i64,
    pub average_rating: f64,
    pub pending: i64,
    pub approved: i64,
    pub hidden: i64,
    pub by_rating: BTreeMap<i64, i64>,
}

pub async fn compute_review_stats(
    store: &Store,
    target_type: Option<ReviewTarget>,
) -> StoreResult<ReviewStats> {
    let mut query = StoreQuery::new();
    if let Some(target_type) = target_type {
        query = query.filter(Predicate::Eq(
            "targetType".into(),
            Bson::from(target_type.as_str()),
        ));
    }
    let docs = store.list("reviews", &query).await?;
    let reviews: Vec<Review> = docs
        .iter()
        .map(|d| transform_review(&doc_id(d), d))
        .collect();

    let mut by_rating: BTreeMap<i64, i64> = (1..=5).map(|r| (r, 0)).collect();
    for review in &reviews {
        let rounded = review.rating.round() as i64;
        if (1..=5).contains(&rounded) {
            *by_rating.entry(rounded).or_insert(0) += 1;
        }
    }

    let total_rating: f64 = reviews.iter().map(|r| r.rating).sum();
    let average_rating = if reviews.is_empty() {
        0.0
    } else {
        (total_rating / reviews.len() as f64 * 10.0).round() / 10.0
    };

    Ok(ReviewStats {
        total: reviews.len() as i64,
        average_rating,
        pending: reviews.iter().filter(|r| !r.is_approved && !r.is_hidden).count() as i64,
        approved: reviews.iter().filter(|r| r.is_approved).count() as i64,
        hidden: reviews.iter().filter(|r| r.is_hidden).count() as i64,
        by_rating,
    })
}

pub async fn fetch_recent_reviews(store: &Store, limit: usize) -> StoreResult<Vec<Review>> {
    let query = StoreQuery::new().order_desc("createdAt");
    let docs = store.list("reviews", &query).await?;
    Ok(docs
        .iter()
        .take(limit)
        .map(|d| transform_review(&doc_id(d), d))
        .collect())
}

/// Reviews waiting on moderation: explicitly unapproved and not hidden.
/// Legacy reviews with no flags are implicitly approved, so they never
/// show up here on either query path.
pub async fn fetch_pending_reviews(store: &Store) -> StoreResult<Vec<Review>> {
    let query = StoreQuery::new()
        .filter(Predicate::Eq("isApproved".into(), Bson::Boolean(false)))
        .filter(Predicate::Eq("isHidden".into(), Bson::Boolean(false)))
        .order_desc("createdAt");
    match store.list("reviews", &query).await {
        Ok(docs) => Ok(docs
            .iter()
            .map(|d| transform_review(&doc_id(d), d))
            .collect()),
        Err(_) => {
            let mut reviews = fetch_reviews(store, &ReviewFilters::default()).await?;
            reviews.retain(|r| !r.is_approved && !r.is_hidden);
            Ok(reviews)
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewListQuery {
    pub target_type: Option<ReviewTarget>,
    pub target_id: Option<String>,
    pub user_id: Option<String>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub is_approved: Option<bool>,
    pub is_hidden: Option<bool>,
}

pub async fn list_reviews(
    data: web::Data<AppState>,
    query: web::Query<ReviewListQuery>,
) -> impl Responder {
    let filters = ReviewFilters {
        target_type: query.target_type,
        target_id: query.target_id.clone(),
        user_id: query.user_id.clone(),
        min_rating: query.min_rating,
        max_rating: query.max_rating,
        is_approved: query.is_approved,
        is_hidden: query.is_hidden,
    };
    match fetch_reviews(&data.store, &filters).await {
        Ok(reviews) => HttpResponse::Ok().json(reviews),
        Err(e) => {
            error!("Error fetching reviews: {}", e);
            HttpResponse::InternalServerError().body("Error fetching reviews")
        }
    }
}

pub async fn get_review(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let review_id = path.into_inner();
    match fetch_review(&data.store, &review_id).await {
        Ok(Some(review)) => HttpResponse::Ok().json(review),
        Ok(None) => HttpResponse::NotFound().body("Review not found"),
        Err(e) => {
            error!("Error fetching review {}: {}", review_id, e);
            HttpResponse::InternalServerError().body("Error fetching review")
        }
    }
}

pub async fn approve_review_handler(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let review_id = path.into_inner();
    match approve_review(&data.store, &review_id).await {
        Ok(true) => HttpResponse::Ok().body("Review approved"),
        Ok(false) => HttpResponse::NotFound().body("Review not found"),
        Err(e) => {
            error!("Error approving review {}: {}", review_id, e);
            HttpResponse::InternalServerError().body("Error approving review")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HideReviewRequest {
    pub hide: Option<bool>,
}

pub async fn hide_review(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<HideReviewRequest>,
) -> impl Responder {
    let review_id = path.into_inner();
    let hide = payload.hide.unwrap_or(true);
    match set_review_hidden(&data.store, &review_id, hide).await {
        Ok(true) => HttpResponse::Ok().body("Review visibility updated"),
        Ok(false) => HttpResponse::NotFound().body("Review not found"),
        Err(e) => {
            error!("Error hiding review {}: {}", review_id, e);
            HttpResponse::InternalServerError().body("Error hiding review")
        }
    }
}

pub async fn delete_review(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let review_id = path.into_inner();
    match remove_review(&data.store, &review_id).await {
        Ok(true) => HttpResponse::Ok().body("Review deleted"),
        Ok(false) => HttpResponse::NotFound().body("Review not found"),
        Err(e) => {
            error!("Error deleting review {}: {}", review_id, e);
            HttpResponse::InternalServerError().body("Error deleting review")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatsQuery {
    pub target_type: Option<ReviewTarget>,
}

pub async fn get_review_stats(
    data: web::Data<AppState>,
    query: web::Query<ReviewStatsQuery>,
) -> impl Responder {
    match compute_review_stats(&data.store, query.target_type).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing review stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing review stats")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RecentReviewsQuery {
    pub limit: Option<usize>,
}

pub async fn list_recent_reviews(
    data: web::Data<AppState>,
    query: web::Query<RecentReviewsQuery>,
) -> impl Responder {
    match fetch_recent_reviews(&data.store, query.limit.unwrap_or(10)).await {
        Ok(reviews) => HttpResponse::Ok().json(reviews),
        Err(e) => {
            error!("Error fetching recent reviews: {}", e);
            HttpResponse::InternalServerError().body("Error fetching recent reviews")
        }
    }
}

pub async fn list_pending_reviews(data: web::Data<AppState>) -> impl Responder {
    match fetch_pending_reviews(&data.store).await {
        Ok(reviews) => HttpResponse::Ok().json(reviews),
        Err(e) => {
            error!("Error fetching pending reviews: {}", e);
            HttpResponse::InternalServerError().body("Error fetching pending reviews")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::bson_date;
    use chrono::Duration;

    async fn seed_review(store: &Store, target_id: &str, fields: Document) -> String {
        let mut review = doc! {
            "targetId": target_id,
            "targetType": "workshop",
            "createdAt": bson_date(Utc::now()),
        };
        for (key, value) in fields {
            review.insert(key, value);
        }
        store.create("reviews", review).await.unwrap()
    }

    #[test]
    fn transform_defaults_favor_visibility() {
        let review = transform_review("r1", &doc! { "rating": 4.0 });
        assert_eq!(review.user_name, "Anonymous");
        assert_eq!(review.target_type, ReviewTarget::Product);
        assert!(review.is_approved);
        assert!(!review.is_hidden);
    }

    #[tokio::test]
    async fn moderation_filters_judge_legacy_rows_by_their_defaults() {
        let store = Store::memory();
        seed_review(&store, "w1", doc! { "rating": 5.0 }).await;
        seed_review(&store, "w1", doc! { "rating": 2.0, "isApproved": false }).await;

        let unapproved = fetch_reviews(
            &store,
            &ReviewFilters { is_approved: Some(false), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(unapproved.len(), 1);
        assert_eq!(unapproved[0].rating, 2.0);
    }

    #[tokio::test]
    async fn deleting_a_review_recomputes_the_target_aggregate() {
        let store = Store::memory();
        let workshop_id = store
            .create("workshops", doc! { "name": "W", "rating": 0.0, "reviewCount": 0_i64 })
            .await
            .unwrap();

        seed_review(&store, &workshop_id, doc! { "rating": 5.0 }).await;
        let to_delete = seed_review(&store, &workshop_id, doc! { "rating": 4.0 }).await;
        seed_review(&store, &workshop_id, doc! { "rating": 5.0 }).await;
        seed_review(&store, &workshop_id, doc! { "rating": 1.0, "isHidden": true }).await;

        assert!(remove_review(&store, &to_delete).await.unwrap());

        let workshop = store.get("workshops", &workshop_id).await.unwrap().unwrap();
        // Visible reviews left: 5 and 5.
        assert_eq!(workshop.get_f64("rating").unwrap(), 5.0);
        assert_eq!(workshop.get_i64("reviewCount").unwrap(), 2);
        // Aggregate writes never stamp the target.
        assert!(workshop.get_datetime("updatedAt").is_err());

        assert!(!remove_review(&store, "missing").await.unwrap());
    }

    #[tokio::test]
    async fn aggregate_keeps_the_last_value_when_nothing_visible_remains() {
        let store = Store::memory();
        let workshop_id = store
            .create("workshops", doc! { "rating": 4.5, "reviewCount": 9_i64 })
            .await
            .unwrap();
        let only = seed_review(&store, &workshop_id, doc! { "rating": 3.0 }).await;

        assert!(remove_review(&store, &only).await.unwrap());

        let workshop = store.get("workshops", &workshop_id).await.unwrap().unwrap();
        assert_eq!(workshop.get_f64("rating").unwrap(), 4.5);
        assert_eq!(workshop.get_i64("reviewCount").unwrap(), 9);
    }

    #[tokio::test]
    async fn aggregate_rounds_to_one_decimal() {
        let store = Store::memory();
        let workshop_id = store
            .create("workshops", doc! { "rating": 0.0 })
            .await
            .unwrap();
        seed_review(&store, &workshop_id, doc! { "rating": 5.0 }).await;
        seed_review(&store, &workshop_id, doc! { "rating": 4.0 }).await;
        let extra = seed_review(&store, &workshop_id, doc! { "rating": 5.0 }).await;
        seed_review(&store, &workshop_id, doc! { "rating": 5.0 }).await;

        // (5 + 4 + 5) / 3 = 4.666...
        assert!(remove_review(&store, &extra).await.unwrap());
        let workshop = store.get("workshops", &workshop_id).await.unwrap().unwrap();
        assert_eq!(workshop.get_f64("rating").unwrap(), 4.7);
    }

    #[tokio::test]
    async fn stats_always_carry_all_five_buckets() {
        let store = Store::memory();
        seed_review(&store, "w1", doc! { "rating": 5.0 }).await;
        seed_review(&store, "w1", doc! { "rating": 4.0 }).await;
        seed_review(&store, "w1", doc! { "rating": 4.0, "isApproved": false }).await;
        seed_review(&store, "w1", doc! { "rating": 1.0, "isHidden": true }).await;

        let stats = compute_review_stats(&store, None).await.unwrap();
        assert_eq!(stats.total, 4);
        // (5 + 4 + 4 + 1) / 4 = 3.5
        assert_eq!(stats.average_rating, 3.5);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.approved, 3);
        assert_eq!(stats.hidden, 1);
        assert_eq!(stats.by_rating.len(), 5);
        assert_eq!(*stats.by_rating.get(&4).unwrap(), 2);
        assert_eq!(*stats.by_rating.get(&2).unwrap(), 0);
    }

    #[tokio::test]
    async fn pending_list_skips_legacy_reviews_on_both_paths() {
        let store = Store::memory();
        seed_review(&store, "w1", doc! { "rating": 5.0 }).await;
        seed_review(
            &store,
            "w1",
            doc! { "rating": 2.0, "isApproved": false, "isHidden": false },
        )
        .await;

        let pending = fetch_pending_reviews(&store).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].rating, 2.0);

        store.set_fail_ordered(true);
        let fallback = fetch_pending_reviews(&store).await.unwrap();
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].rating, 2.0);
    }

    #[tokio::test]
    async fn recent_reviews_keep_only_the_newest() {
        let store = Store::memory();
        for minutes in [30_i64, 20, 10] {
            store
                .create(
                    "reviews",
                    doc! {
                        "rating": 4.0,
                        "createdAt": bson_date(Utc::now() - Duration::minutes(minutes)),
                    },
                )
                .await
                .unwrap();
        }
        let recent = fetch_recent_reviews(&store, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].created_at > recent[1].created_at);
    }
}
