// src/emergency.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use futures::future::join_all;
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::normalize::{
    doc_id, num_field, opt_str_field, opt_timestamp_field, str_field, timestamp_field,
};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmergencyStatus {
    Pending,
    Dispatched,
    EnRoute,
    Arrived,
    Completed,
    Cancelled,
}

impl EmergencyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EmergencyStatus::Pending => "pending",
            EmergencyStatus::Dispatched => "dispatched",
            EmergencyStatus::EnRoute => "enRoute",
            EmergencyStatus::Arrived => "arrived",
            EmergencyStatus::Completed => "completed",
            EmergencyStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "dispatched" => EmergencyStatus::Dispatched,
            "enRoute" => EmergencyStatus::EnRoute,
            "arrived" => EmergencyStatus::Arrived,
            "completed" => EmergencyStatus::Completed,
            "cancelled" => EmergencyStatus::Cancelled,
            _ => EmergencyStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EmergencyType {
    Breakdown,
    Accident,
    FlatTire,
    Battery,
    Fuel,
    Lockout,
    Other,
}

impl EmergencyType {
    pub fn parse(value: &str) -> Self {
        match value {
            "breakdown" => EmergencyType::Breakdown,
            "accident" => EmergencyType::Accident,
            "flatTire" => EmergencyType::FlatTire,
            "battery" => EmergencyType::Battery,
            "fuel" => EmergencyType::Fuel,
            "lockout" => EmergencyType::Lockout,
            _ => EmergencyType::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyRequest {
    pub id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_phone: Option<String>,
    pub vehicle_id: Option<String>,
    pub vehicle_info: Option<String>,
    #[serde(rename = "type")]
    pub emergency_type: EmergencyType,
    pub status: EmergencyStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub description: Option<String>,
    pub mechanic_id: Option<String>,
    pub mechanic_name: Option<String>,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub arrived_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn transform_emergency(id: &str, data: &Document) -> EmergencyRequest {
    EmergencyRequest {
        id: id.to_string(),
        user_id: str_field(data, &["userId"], ""),
        user_name: opt_str_field(data, &["userName"]),
        user_phone: opt_str_field(data, &["userPhone"]),
        vehicle_id: opt_str_field(data, &["vehicleId"]),
        vehicle_info: opt_str_field(data, &["vehicleInfo"]),
        emergency_type: EmergencyType::parse(data.get_str("type").unwrap_or("")),
        status: EmergencyStatus::parse(data.get_str("status").unwrap_or("")),
        latitude: num_field(data, &["latitude"], 0.0),
        longitude: num_field(data, &["longitude"], 0.0),
        address: str_field(data, &["address"], ""),
        description: opt_str_field(data, &["description"]),
        mechanic_id: opt_str_field(data, &["mechanicId"]),
        mechanic_name: opt_str_field(data, &["mechanicName"]),
        estimated_arrival: opt_timestamp_field(data, "estimatedArrival"),
        dispatched_at: opt_timestamp_field(data, "dispatchedAt"),
        arrived_at: opt_timestamp_field(data, "arrivedAt"),
        completed_at: opt_timestamp_field(data, "completedAt"),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct EmergencyFilters {
    pub status: Option<EmergencyStatus>,
    pub user_id: Option<String>,
}

pub async fn fetch_emergency_requests(
    store: &Store,
    filters: &EmergencyFilters,
) -> StoreResult<Vec<EmergencyRequest>> {
    let mut query = StoreQuery::new().order_desc("createdAt");
    if let Some(status) = filters.status {
        query = query.filter(Predicate::Eq("status".into(), Bson::from(status.as_str())));
    }
    if let Some(user_id) = &filters.user_id {
        query = query.filter(Predicate::Eq("userId".into(), Bson::from(user_id.as_str())));
    }
    let docs = store.fetch_filtered("emergency_requests", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_emergency(&doc_id(d), d))
        .collect())
}

/// Live-board query: everything a roadside crew could still act on.
pub fn active_emergencies_query() -> StoreQuery {
    StoreQuery::new()
        .filter(Predicate::In(
            "status".into(),
            vec![
                Bson::from("pending"),
                Bson::from("dispatched"),
                Bson::from("enRoute"),
                Bson::from("arrived"),
            ],
        ))
        .order_desc("createdAt")
}

pub fn pending_count_query() -> StoreQuery {
    StoreQuery::new().filter(Predicate::Eq("status".into(), Bson::from("pending")))
}

/// Open requests for the list page: pending, dispatched or en route,
/// newest first, with requester details backfilled.
pub async fn fetch_active_emergencies(store: &Store) -> StoreResult<Vec<EmergencyRequest>> {
    let query = StoreQuery::new()
        .filter(Predicate::In(
            "status".into(),
            vec![
                Bson::from("pending"),
                Bson::from("dispatched"),
                Bson::from("enRoute"),
            ],
        ))
        .order_desc("createdAt");
    let docs = store.fetch_filtered("emergency_requests", &query).await?;
    let emergencies = docs
        .iter()
        .map(|d| transform_emergency(&doc_id(d), d))
        .collect();
    Ok(enrich_with_user_data(store, emergencies).await)
}

pub async fn fetch_emergency_request(
    store: &Store,
    request_id: &str,
) -> StoreResult<Option<EmergencyRequest>> {
    let found = store.get("emergency_requests", request_id).await?;
    Ok(found.map(|d| transform_emergency(request_id, &d)))
}

/// Status change with per-stage arrival stamps. Transitions are not
/// validated; dispatch from any status re-stamps `dispatchedAt`.
pub async fn set_emergency_status(
    store: &Store,
    request_id: &str,
    status: EmergencyStatus,
) -> StoreResult<bool> {
    let mut update_doc = doc! {
        "status": status.as_str(),
        "updatedAt": BsonDateTime::now(),
    };
    match status {
        EmergencyStatus::Dispatched => {
            update_doc.insert("dispatchedAt", BsonDateTime::now());
        }
        EmergencyStatus::Arrived => {
            update_doc.insert("arrivedAt", BsonDateTime::now());
        }
        EmergencyStatus::Completed => {
            update_doc.insert("completedAt", BsonDateTime::now());
        }
        _ => {}
    }
    store.update("emergency_requests", request_id, update_doc).await
}

/// Puts a mechanic on the request and marks it dispatched in one write.
pub async fn set_assigned_mechanic(
    store: &Store,
    request_id: &str,
    mechanic_id: &str,
    mechanic_name: &str,
) -> StoreResult<bool> {
    store
        .update(
            "emergency_requests",
            request_id,
            doc! {
                "mechanicId": mechanic_id,
                "mechanicName": mechanic_name,
                "status": "dispatched",
                "dispatchedAt": BsonDateTime::now(),
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyStats {
    pub total: i64,
    pub pending: i64,
    pub active: i64,
    pub completed_today: i64,
    pub average_response_time: i64,
}

pub async fn compute_emergency_stats(store: &Store) -> StoreResult<EmergencyStats> {
    let all = store.list_all("emergency_requests").await?;
    let today = Utc.from_utc_datetime(&Utc::now().date_naive().and_time(NaiveTime::MIN));

    let mut response_minutes = 0.0;
    let mut response_count = 0;
    let mut completed_today = 0;
    let mut pending = 0;
    let mut active = 0;

    for request in &all {
        match request.get_str("status").unwrap_or("") {
            "pending" => pending += 1,
            "dispatched" | "enRoute" | "arrived" => active += 1,
            "completed" => {
                if let Ok(completed_at) = request.get_datetime("completedAt") {
                    if completed_at.to_chrono() >= today {
                        completed_today += 1;
                    }
                }
            }
            _ => {}
        }
        if let (Ok(created), Ok(dispatched)) = (
            request.get_datetime("createdAt"),
            request.get_datetime("dispatchedAt"),
        ) {
            let millis = dispatched.timestamp_millis() - created.timestamp_millis();
            response_minutes += millis as f64 / 60_000.0;
            response_count += 1;
        }
    }

    let average_response_time = if response_count > 0 {
        (response_minutes / response_count as f64).round() as i64
    } else {
        0
    };

    Ok(EmergencyStats {
        total: all.len() as i64,
        pending,
        active,
        completed_today,
        average_response_time,
    })
}

/// Backfills requester name and phone from the users collection for rows
/// the mobile app submitted without them. Lookup failures only log; the
/// affected rows keep their blanks.
pub async fn enrich_with_user_data(
    store: &Store,
    mut emergencies: Vec<EmergencyRequest>,
) -> Vec<EmergencyRequest> {
    let mut ids: Vec<String> = Vec::new();
    for emergency in &emergencies {
        if emergency.user_name.is_none()
            && !emergency.user_id.is_empty()
            && !ids.contains(&emergency.user_id)
        {
            ids.push(emergency.user_id.clone());
        }
    }
    if ids.is_empty() {
        return emergencies;
    }

    let lookups = ids.iter().map(|user_id| store.get("users", user_id));
    let results = join_all(lookups).await;

    let mut users: HashMap<String, (String, Option<String>)> = HashMap::new();
    for (user_id, result) in ids.iter().zip(results) {
        match result {
            Ok(Some(user)) => {
                users.insert(
                    user_id.clone(),
                    (
                        str_field(&user, &["name", "displayName"], "User"),
                        opt_str_field(&user, &["phone", "phoneNumber"]),
                    ),
                );
            }
            Ok(None) => {}
            Err(e) => error!("Failed to fetch user {}: {}", user_id, e),
        }
    }

    for emergency in &mut emergencies {
        if emergency.user_name.is_some() {
            continue;
        }
        if let Some((name, phone)) = users.get(&emergency.user_id) {
            emergency.user_name = Some(name.clone());
            if emergency.user_phone.is_none() {
                emergency.user_phone = phone.clone();
            }
        }
    }
    emergencies
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencyListQuery {
    pub status: Option<EmergencyStatus>,
    pub user_id: Option<String>,
}

pub async fn list_emergencies(
    data: web::Data<AppState>,
    query: web::Query<EmergencyListQuery>,
) -> impl Responder {
    let filters = EmergencyFilters {
        status: query.status,
        user_id: query.user_id.clone(),
    };
    match fetch_emergency_requests(&data.store, &filters).await {
        Ok(requests) => HttpResponse::Ok().json(requests),
        Err(e) => {
            error!("Error fetching emergency requests: {}", e);
            HttpResponse::InternalServerError().body("Error fetching emergency requests")
        }
    }
}

pub async fn list_active_emergencies(data: web::Data<AppState>) -> impl Responder {
    match fetch_active_emergencies(&data.store).await {
        Ok(requests) => HttpResponse::Ok().json(requests),
        Err(e) => {
            error!("Error fetching active emergencies: {}", e);
            HttpResponse::InternalServerError().body("Error fetching active emergencies")
        }
    }
}

pub async fn get_emergency(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let request_id = path.into_inner();
    match fetch_emergency_request(&data.store, &request_id).await {
        Ok(Some(request)) => HttpResponse::Ok().json(request),
        Ok(None) => HttpResponse::NotFound().body("Emergency request not found"),
        Err(e) => {
            error!("Error fetching emergency request {}: {}", request_id, e);
            HttpResponse::InternalServerError().body("Error fetching emergency request")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateEmergencyStatusRequest {
    pub status: EmergencyStatus,
}

pub async fn update_emergency_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateEmergencyStatusRequest>,
) -> impl Responder {
    let request_id = path.into_inner();
    match set_emergency_status(&data.store, &request_id, payload.status).await {
        Ok(true) => HttpResponse::Ok().body("Emergency status updated"),
        Ok(false) => HttpResponse::NotFound().body("Emergency request not found"),
        Err(e) => {
            error!("Error updating emergency request {}: {}", request_id, e);
            HttpResponse::InternalServerError().body("Error updating emergency request")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignMechanicRequest {
    pub mechanic_id: String,
    pub mechanic_name: String,
}

pub async fn assign_mechanic(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AssignMechanicRequest>,
) -> impl Responder {
    let request_id = path.into_inner();
    match set_assigned_mechanic(
        &data.store,
        &request_id,
        &payload.mechanic_id,
        &payload.mechanic_name,
    )
    .await
    {
        Ok(true) => HttpResponse::Ok().body("Mechanic assigned"),
        Ok(false) => HttpResponse::NotFound().body("Emergency request not found"),
        Err(e) => {
            error!("Error assigning mechanic to {}: {}", request_id, e);
            HttpResponse::InternalServerError().body("Error assigning mechanic")
        }
    }
}

pub async fn get_emergency_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_emergency_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing emergency stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing emergency stats")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::bson_date;
    use crate::store::Store;
    use chrono::Duration;

    #[test]
    fn transform_defaults_type_and_status() {
        let request = transform_emergency("e1", &doc! { "userId": "u1" });
        assert_eq!(request.emergency_type, EmergencyType::Other);
        assert_eq!(request.status, EmergencyStatus::Pending);
        assert_eq!(request.latitude, 0.0);
        assert_eq!(request.address, "");
        assert!(request.dispatched_at.is_none());
    }

    #[tokio::test]
    async fn dispatch_stamps_dispatched_at() {
        let store = Store::memory();
        let id = store
            .create("emergency_requests", doc! { "status": "pending" })
            .await
            .unwrap();

        set_emergency_status(&store, &id, EmergencyStatus::Dispatched)
            .await
            .unwrap();
        let doc = store.get("emergency_requests", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "dispatched");
        assert!(doc.get_datetime("dispatchedAt").is_ok());
        assert!(doc.get_datetime("arrivedAt").is_err());

        set_emergency_status(&store, &id, EmergencyStatus::Arrived)
            .await
            .unwrap();
        set_emergency_status(&store, &id, EmergencyStatus::Completed)
            .await
            .unwrap();
        let doc = store.get("emergency_requests", &id).await.unwrap().unwrap();
        assert!(doc.get_datetime("arrivedAt").is_ok());
        assert!(doc.get_datetime("completedAt").is_ok());
    }

    #[tokio::test]
    async fn en_route_leaves_stage_stamps_alone() {
        let store = Store::memory();
        let id = store
            .create("emergency_requests", doc! { "status": "dispatched" })
            .await
            .unwrap();
        set_emergency_status(&store, &id, EmergencyStatus::EnRoute)
            .await
            .unwrap();
        let doc = store.get("emergency_requests", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "enRoute");
        assert!(doc.get_datetime("dispatchedAt").is_err());
    }

    #[tokio::test]
    async fn assignment_dispatches_unconditionally() {
        let store = Store::memory();
        let id = store
            .create(
                "emergency_requests",
                doc! { "status": "completed", "userName": "Siti" },
            )
            .await
            .unwrap();
        set_assigned_mechanic(&store, &id, "m1", "Rahim").await.unwrap();
        let doc = store.get("emergency_requests", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "dispatched");
        assert_eq!(doc.get_str("mechanicId").unwrap(), "m1");
        assert_eq!(doc.get_str("mechanicName").unwrap(), "Rahim");
        assert!(doc.get_datetime("dispatchedAt").is_ok());
    }

    #[tokio::test]
    async fn enrichment_fills_missing_names_only() {
        let store = Store::memory();
        let user_id = store
            .create("users", doc! { "displayName": "Aina", "phoneNumber": "+60123" })
            .await
            .unwrap();

        let emergencies = vec![
            transform_emergency("e1", &doc! { "userId": user_id.as_str() }),
            transform_emergency(
                "e2",
                &doc! { "userId": user_id.as_str(), "userName": "Already Set" },
            ),
            transform_emergency("e3", &doc! { "userId": "ghost" }),
        ];

        let enriched = enrich_with_user_data(&store, emergencies).await;
        assert_eq!(enriched[0].user_name.as_deref(), Some("Aina"));
        assert_eq!(enriched[0].user_phone.as_deref(), Some("+60123"));
        assert_eq!(enriched[1].user_name.as_deref(), Some("Already Set"));
        assert!(enriched[2].user_name.is_none());

        // Running it again changes nothing.
        let again = enrich_with_user_data(&store, enriched.clone()).await;
        assert_eq!(again[0].user_name, enriched[0].user_name);
        assert_eq!(again[1].user_name, enriched[1].user_name);
    }

    #[tokio::test]
    async fn stats_average_response_and_active_counts() {
        let store = Store::memory();
        let now = Utc::now();
        store
            .create(
                "emergency_requests",
                doc! { "status": "completed",
                       "createdAt": bson_date(now - Duration::minutes(60)),
                       "dispatchedAt": bson_date(now - Duration::minutes(50)),
                       "completedAt": bson_date(now) },
            )
            .await
            .unwrap();
        store
            .create(
                "emergency_requests",
                doc! { "status": "enRoute",
                       "createdAt": bson_date(now - Duration::minutes(30)),
                       "dispatchedAt": bson_date(now - Duration::minutes(10)) },
            )
            .await
            .unwrap();
        store
            .create("emergency_requests", doc! { "status": "pending" })
            .await
            .unwrap();

        let stats = compute_emergency_stats(&store).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.completed_today, 1);
        // (10 + 20) / 2
        assert_eq!(stats.average_response_time, 15);
    }
}
