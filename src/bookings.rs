// src/bookings.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::normalize::{
    bson_date, doc_id, opt_num_field, opt_str_field, str_field, str_list_field, timestamp_field,
};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "inProgress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "noShow",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "confirmed" => BookingStatus::Confirmed,
            "inProgress" => BookingStatus::InProgress,
            "completed" => BookingStatus::Completed,
            "cancelled" => BookingStatus::Cancelled,
            "noShow" => BookingStatus::NoShow,
            _ => BookingStatus::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    pub workshop_id: String,
    pub workshop_name: Option<String>,
    pub order_id: Option<String>,
    pub appointment_date: DateTime<Utc>,
    pub time_slot: String,
    pub status: BookingStatus,
    pub vehicle_id: Option<String>,
    pub services: Vec<String>,
    pub notes: Option<String>,
    pub cancellation_fee: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub fn transform_booking(id: &str, data: &Document) -> Booking {
    Booking {
        id: id.to_string(),
        user_id: str_field(data, &["userId"], ""),
        workshop_id: str_field(data, &["workshopId"], ""),
        workshop_name: opt_str_field(data, &["workshopName"]),
        order_id: opt_str_field(data, &["orderId"]),
        appointment_date: timestamp_field(data, "appointmentDate"),
        time_slot: str_field(data, &["timeSlot"], ""),
        status: BookingStatus::parse(data.get_str("status").unwrap_or("")),
        vehicle_id: opt_str_field(data, &["vehicleId"]),
        services: str_list_field(data, &["services"]),
        notes: opt_str_field(data, &["notes"]),
        cancellation_fee: opt_num_field(data, &["cancellationFee"]),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct BookingFilters {
    pub status: Option<BookingStatus>,
    pub user_id: Option<String>,
    pub workshop_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

/// Bookings sorted by appointment, newest first. Date bounds apply to the
/// appointment date, after normalization.
pub async fn fetch_bookings(store: &Store, filters: &BookingFilters) -> StoreResult<Vec<Booking>> {
    let mut query = StoreQuery::new().order_desc("appointmentDate");
    if let Some(status) = filters.status {
        query = query.filter(Predicate::Eq("status".into(), Bson::from(status.as_str())));
    }
    if let Some(workshop_id) = &filters.workshop_id {
        query = query.filter(Predicate::Eq(
            "workshopId".into(),
            Bson::from(workshop_id.as_str()),
        ));
    }
    if let Some(user_id) = &filters.user_id {
        query = query.filter(Predicate::Eq("userId".into(), Bson::from(user_id.as_str())));
    }

    let docs = store.fetch_filtered("bookings", &query).await?;
    let mut bookings: Vec<Booking> = docs
        .iter()
        .map(|d| transform_booking(&doc_id(d), d))
        .collect();

    if let Some(start) = filters.start_date {
        bookings.retain(|b| b.appointment_date >= start);
    }
    if let Some(end) = filters.end_date {
        bookings.retain(|b| b.appointment_date <= end);
    }
    Ok(bookings)
}

pub async fn fetch_booking(store: &Store, booking_id: &str) -> StoreResult<Option<Booking>> {
    let found = store.get("bookings", booking_id).await?;
    Ok(found.map(|d| transform_booking(booking_id, &d)))
}

pub async fn set_booking_status(
    store: &Store,
    booking_id: &str,
    status: BookingStatus,
) -> StoreResult<bool> {
    store
        .update(
            "bookings",
            booking_id,
            doc! {
                "status": status.as_str(),
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

/// Moves a booking to a new slot. No status guard; the console only offers
/// this on pending bookings.
pub async fn set_booking_schedule(
    store: &Store,
    booking_id: &str,
    new_date: DateTime<Utc>,
    new_time_slot: &str,
) -> StoreResult<bool> {
    store
        .update(
            "bookings",
            booking_id,
            doc! {
                "appointmentDate": bson_date(new_date),
                "timeSlot": new_time_slot,
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

fn today_window() -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.from_utc_datetime(&Utc::now().date_naive().and_time(NaiveTime::MIN));
    (start, start + Duration::days(1))
}

pub async fn fetch_today_bookings(store: &Store) -> StoreResult<Vec<Booking>> {
    let (today, tomorrow) = today_window();
    let query = StoreQuery::new()
        .filter(Predicate::Gte("appointmentDate".into(), bson_date(today)))
        .filter(Predicate::Lt("appointmentDate".into(), bson_date(tomorrow)))
        .order_asc("appointmentDate");
    let docs = store.list("bookings", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_booking(&doc_id(d), d))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingStats {
    pub total: i64,
    pub pending: i64,
    pub confirmed: i64,
    pub completed: i64,
    pub today_bookings: i64,
}

pub async fn compute_booking_stats(store: &Store) -> StoreResult<BookingStats> {
    let all = store.list_all("bookings").await?;

    let (today, tomorrow) = today_window();
    let today_query = StoreQuery::new()
        .filter(Predicate::Gte("appointmentDate".into(), bson_date(today)))
        .filter(Predicate::Lt("appointmentDate".into(), bson_date(tomorrow)));
    let today_count = store.list("bookings", &today_query).await?.len();

    let count = |status: &str| {
        all.iter()
            .filter(|b| b.get_str("status").unwrap_or("") == status)
            .count() as i64
    };

    Ok(BookingStats {
        total: all.len() as i64,
        pending: count("pending"),
        confirmed: count("confirmed"),
        completed: count("completed"),
        today_bookings: today_count as i64,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingListQuery {
    pub status: Option<BookingStatus>,
    pub user_id: Option<String>,
    pub workshop_id: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

pub async fn list_bookings(
    data: web::Data<AppState>,
    query: web::Query<BookingListQuery>,
) -> impl Responder {
    let filters = BookingFilters {
        status: query.status,
        user_id: query.user_id.clone(),
        workshop_id: query.workshop_id.clone(),
        start_date: query.start_date,
        end_date: query.end_date,
    };
    match fetch_bookings(&data.store, &filters).await {
        Ok(bookings) => HttpResponse::Ok().json(bookings),
        Err(e) => {
            error!("Error fetching bookings: {}", e);
            HttpResponse::InternalServerError().body("Error fetching bookings")
        }
    }
}

pub async fn get_booking(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let booking_id = path.into_inner();
    match fetch_booking(&data.store, &booking_id).await {
        Ok(Some(booking)) => HttpResponse::Ok().json(booking),
        Ok(None) => HttpResponse::NotFound().body("Booking not found"),
        Err(e) => {
            error!("Error fetching booking {}: {}", booking_id, e);
            HttpResponse::InternalServerError().body("Error fetching booking")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateBookingStatusRequest {
    pub status: BookingStatus,
}

pub async fn update_booking_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateBookingStatusRequest>,
) -> impl Responder {
    let booking_id = path.into_inner();
    match set_booking_status(&data.store, &booking_id, payload.status).await {
        Ok(true) => HttpResponse::Ok().body("Booking status updated"),
        Ok(false) => HttpResponse::NotFound().body("Booking not found"),
        Err(e) => {
            error!("Error updating booking {}: {}", booking_id, e);
            HttpResponse::InternalServerError().body("Error updating booking")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBookingRequest {
    pub appointment_date: DateTime<Utc>,
    pub time_slot: String,
}

pub async fn reschedule_booking(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<RescheduleBookingRequest>,
) -> impl Responder {
    let booking_id = path.into_inner();
    match set_booking_schedule(
        &data.store,
        &booking_id,
        payload.appointment_date,
        &payload.time_slot,
    )
    .await
    {
        Ok(true) => HttpResponse::Ok().body("Booking rescheduled"),
        Ok(false) => HttpResponse::NotFound().body("Booking not found"),
        Err(e) => {
            error!("Error rescheduling booking {}: {}", booking_id, e);
            HttpResponse::InternalServerError().body("Error rescheduling booking")
        }
    }
}

pub async fn list_today_bookings(data: web::Data<AppState>) -> impl Responder {
    match fetch_today_bookings(&data.store).await {
        Ok(bookings) => HttpResponse::Ok().json(bookings),
        Err(e) => {
            error!("Error fetching today's bookings: {}", e);
            HttpResponse::InternalServerError().body("Error fetching today's bookings")
        }
    }
}

pub async fn get_booking_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_booking_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing booking stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing booking stats")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn transform_applies_defaults() {
        let booking = transform_booking("b1", &doc! { "userId": "u1" });
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.time_slot, "");
        assert!(booking.services.is_empty());
        assert!(booking.cancellation_fee.is_none());
    }

    #[tokio::test]
    async fn bookings_sort_by_appointment_newest_first() {
        let store = Store::memory();
        for days_ago in [3, 1, 2] {
            store
                .create(
                    "bookings",
                    doc! { "status": "pending",
                           "appointmentDate": bson_date(Utc::now() - Duration::days(days_ago)) },
                )
                .await
                .unwrap();
        }
        let bookings = fetch_bookings(&store, &BookingFilters::default())
            .await
            .unwrap();
        assert_eq!(bookings.len(), 3);
        assert!(bookings[0].appointment_date > bookings[1].appointment_date);
        assert!(bookings[1].appointment_date > bookings[2].appointment_date);
    }

    #[tokio::test]
    async fn reschedule_rewrites_slot_and_date() {
        let store = Store::memory();
        let id = store
            .create(
                "bookings",
                doc! { "status": "pending", "timeSlot": "09:00 - 10:00",
                       "appointmentDate": bson_date(Utc::now()) },
            )
            .await
            .unwrap();

        let new_date = Utc::now() + Duration::days(2);
        assert!(
            set_booking_schedule(&store, &id, new_date, "14:00 - 15:00")
                .await
                .unwrap()
        );
        let doc = store.get("bookings", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("timeSlot").unwrap(), "14:00 - 15:00");
        assert_eq!(
            doc.get_datetime("appointmentDate").unwrap().timestamp_millis(),
            new_date.timestamp_millis()
        );
        assert!(doc.get_datetime("updatedAt").is_ok());
    }

    #[tokio::test]
    async fn today_listing_stays_inside_the_day() {
        let store = Store::memory();
        let now = Utc::now();
        let (today_start, _) = today_window();
        store
            .create(
                "bookings",
                doc! { "appointmentDate": bson_date(today_start + Duration::hours(9)) },
            )
            .await
            .unwrap();
        store
            .create(
                "bookings",
                doc! { "appointmentDate": bson_date(now + Duration::days(1)) },
            )
            .await
            .unwrap();
        store
            .create(
                "bookings",
                doc! { "appointmentDate": bson_date(now - Duration::days(1)) },
            )
            .await
            .unwrap();

        let today = fetch_today_bookings(&store).await.unwrap();
        assert_eq!(today.len(), 1);
    }

    #[tokio::test]
    async fn stats_match_the_ten_booking_scenario() {
        let store = Store::memory();
        let (today_start, _) = today_window();
        let today = today_start + Duration::hours(10);
        let next_week = today + Duration::days(7);

        let mut slots = Vec::new();
        slots.extend(std::iter::repeat(("pending", next_week)).take(4));
        slots.extend(std::iter::repeat(("confirmed", today)).take(3));
        slots.extend(std::iter::repeat(("completed", next_week)).take(3));
        for (status, date) in slots {
            store
                .create(
                    "bookings",
                    doc! { "status": status, "appointmentDate": bson_date(date) },
                )
                .await
                .unwrap();
        }

        let stats = compute_booking_stats(&store).await.unwrap();
        assert_eq!(stats.total, 10);
        assert_eq!(stats.pending, 4);
        assert_eq!(stats.confirmed, 3);
        assert_eq!(stats.completed, 3);
        assert_eq!(stats.today_bookings, 3);
    }
}
