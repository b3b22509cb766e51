// src/notifications.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Datelike, Duration, NaiveTime, TimeZone, Utc};
use futures::future::try_join_all;
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::normalize::{bool_field, doc_id, str_field, timestamp_field};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationType {
    Booking,
    Order,
    Promo,
    System,
    Emergency,
}

impl NotificationType {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::Booking => "booking",
            NotificationType::Order => "order",
            NotificationType::Promo => "promo",
            NotificationType::System => "system",
            NotificationType::Emergency => "emergency",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "booking" => NotificationType::Booking,
            "order" => NotificationType::Order,
            "promo" => NotificationType::Promo,
            "emergency" => NotificationType::Emergency,
            _ => NotificationType::System,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub data: Option<Document>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

pub fn transform_notification(id: &str, data: &Document) -> Notification {
    Notification {
        id: id.to_string(),
        user_id: str_field(data, &["userId"], ""),
        title: str_field(data, &["title"], ""),
        body: str_field(data, &["body"], ""),
        kind: NotificationType::parse(data.get_str("type").unwrap_or("")),
        data: data.get_document("data").ok().cloned(),
        is_read: bool_field(data, &["isRead"], false),
        created_at: timestamp_field(data, "createdAt"),
    }
}

pub async fn fetch_user_notifications(
    store: &Store,
    user_id: &str,
) -> StoreResult<Vec<Notification>> {
    let query = StoreQuery::new()
        .filter(Predicate::Eq("userId".into(), Bson::from(user_id)))
        .order_desc("createdAt");
    let docs = store.fetch_filtered("notifications", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_notification(&doc_id(d), d))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationMessage {
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub data: Option<HashMap<String, String>>,
}

fn notification_doc(user_id: &str, message: &NotificationMessage) -> Document {
    let mut out = doc! {
        "title": &message.title,
        "body": &message.body,
        "type": message.kind.as_str(),
        "userId": user_id,
        "isRead": false,
        "createdAt": BsonDateTime::now(),
    };
    if let Some(data) = &message.data {
        let mut data_doc = Document::new();
        for (key, value) in data {
            data_doc.insert(key.clone(), value.clone());
        }
        out.insert("data", data_doc);
    }
    out
}

/// New notifications always land unread.
pub async fn send_to_user(
    store: &Store,
    user_id: &str,
    message: &NotificationMessage,
) -> StoreResult<String> {
    store
        .create("notifications", notification_doc(user_id, message))
        .await
}

pub async fn send_to_users(
    store: &Store,
    user_ids: &[String],
    message: &NotificationMessage,
) -> StoreResult<()> {
    let writes = user_ids
        .iter()
        .map(|user_id| store.create("notifications", notification_doc(user_id, message)));
    try_join_all(writes).await?;
    Ok(())
}

/// Fans the message out to every registered user.
pub async fn send_to_all(store: &Store, message: &NotificationMessage) -> StoreResult<()> {
    let users = store.list_all("users").await?;
    let user_ids: Vec<String> = users.iter().map(|d| doc_id(d)).collect();
    send_to_users(store, &user_ids, message).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PushTarget {
    Single,
    Segment,
    All,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushNotificationPayload {
    pub title: String,
    pub body: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub target_type: PushTarget,
    pub target_user_id: Option<String>,
    pub target_tier: Option<String>,
    pub data: Option<HashMap<String, String>>,
}

/// Wire shape expected by the mobile push pipeline: display fields under
/// `notification`, the type folded into `data` next to any extra keys.
pub fn build_push_payload(payload: &PushNotificationPayload) -> serde_json::Value {
    let mut data = serde_json::Map::new();
    data.insert(
        "type".to_string(),
        serde_json::Value::String(payload.kind.as_str().to_string()),
    );
    if let Some(extra) = &payload.data {
        for (key, value) in extra {
            data.insert(key.clone(), serde_json::Value::String(value.clone()));
        }
    }
    serde_json::json!({
        "notification": {
            "title": payload.title,
            "body": payload.body,
        },
        "data": data,
    })
}

/// Resolves the audience, writes one in-app row per recipient and returns
/// the wire payload a delivery worker would pick up. Delivery itself
/// happens outside this service.
pub async fn dispatch_push(
    store: &Store,
    payload: &PushNotificationPayload,
) -> StoreResult<(usize, serde_json::Value)> {
    let user_ids: Vec<String> = match payload.target_type {
        PushTarget::Single => payload.target_user_id.iter().cloned().collect(),
        PushTarget::Segment => {
            // Loyalty account ids double as user ids.
            let tier = payload.target_tier.as_deref().unwrap_or("");
            let query = StoreQuery::new().filter(Predicate::Eq("tier".into(), Bson::from(tier)));
            let accounts = store.list("loyalty_accounts", &query).await?;
            accounts.iter().map(|d| doc_id(d)).collect()
        }
        PushTarget::All => {
            let users = store.list_all("users").await?;
            users.iter().map(|d| doc_id(d)).collect()
        }
    };

    let message = NotificationMessage {
        title: payload.title.clone(),
        body: payload.body.clone(),
        kind: payload.kind,
        data: payload.data.clone(),
    };
    send_to_users(store, &user_ids, &message).await?;
    Ok((user_ids.len(), build_push_payload(payload)))
}

pub fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

/// Weeks run Sunday through Saturday, matching the dashboard's calendar.
pub fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let days_back = now.weekday().num_days_from_sunday() as i64;
    start_of_day(now) - Duration::days(days_back)
}

pub fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now
        .date_naive()
        .with_day(1)
        .unwrap_or_else(|| now.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub sent_today: i64,
    pub sent_this_week: i64,
    pub sent_this_month: i64,
}

pub async fn compute_notification_stats(store: &Store) -> StoreResult<NotificationStats> {
    let now = Utc::now();
    let day_start = start_of_day(now);
    let week_start = start_of_week(now);
    let month_start = start_of_month(now);

    let all = store.list_all("notifications").await?;

    let mut sent_today = 0;
    let mut sent_this_week = 0;
    let mut sent_this_month = 0;
    for notification in &all {
        let created = timestamp_field(notification, "createdAt");
        if created >= day_start {
            sent_today += 1;
        }
        if created >= week_start {
            sent_this_week += 1;
        }
        if created >= month_start {
            sent_this_month += 1;
        }
    }

    Ok(NotificationStats {
        sent_today,
        sent_this_week,
        sent_this_month,
    })
}

pub async fn list_user_notifications(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let user_id = path.into_inner();
    match fetch_user_notifications(&data.store, &user_id).await {
        Ok(notifications) => HttpResponse::Ok().json(notifications),
        Err(e) => {
            error!("Error fetching notifications for {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error fetching notifications")
        }
    }
}

pub async fn send_notification_to_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NotificationMessage>,
) -> impl Responder {
    let user_id = path.into_inner();
    match send_to_user(&data.store, &user_id, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error sending notification to {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error sending notification")
        }
    }
}

pub async fn send_push_notification(
    data: web::Data<AppState>,
    payload: web::Json<PushNotificationPayload>,
) -> impl Responder {
    match dispatch_push(&data.store, &payload).await {
        Ok((recipients, push)) => HttpResponse::Ok().json(serde_json::json!({
            "recipients": recipients,
            "push": push,
        })),
        Err(e) => {
            error!("Error dispatching push notification: {}", e);
            HttpResponse::InternalServerError().body("Error sending notification")
        }
    }
}

pub async fn send_notification_to_all(
    data: web::Data<AppState>,
    payload: web::Json<NotificationMessage>,
) -> impl Responder {
    match send_to_all(&data.store, &payload).await {
        Ok(()) => HttpResponse::Ok().body("Notifications sent"),
        Err(e) => {
            error!("Error broadcasting notification: {}", e);
            HttpResponse::InternalServerError().body("Error broadcasting notification")
        }
    }
}

pub async fn get_notification_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_notification_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing notification stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing notification stats")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::bson_date;

    fn message(kind: NotificationType) -> NotificationMessage {
        NotificationMessage {
            title: "Service reminder".into(),
            body: "Your Myvi is due for an oil change".into(),
            kind,
            data: None,
        }
    }

    #[test]
    fn transform_defaults_to_unread_system_notice() {
        let n = transform_notification("n1", &doc! { "title": "Hi" });
        assert_eq!(n.kind, NotificationType::System);
        assert!(!n.is_read);
        assert_eq!(n.body, "");
    }

    #[tokio::test]
    async fn user_feed_is_scoped_and_newest_first() {
        let store = Store::memory();
        store
            .create(
                "notifications",
                doc! { "userId": "u1", "title": "old",
                       "createdAt": bson_date(Utc::now() - Duration::hours(2)) },
            )
            .await
            .unwrap();
        store
            .create(
                "notifications",
                doc! { "userId": "u1", "title": "new",
                       "createdAt": bson_date(Utc::now() - Duration::hours(1)) },
            )
            .await
            .unwrap();
        store
            .create(
                "notifications",
                doc! { "userId": "u2", "title": "other",
                       "createdAt": bson_date(Utc::now()) },
            )
            .await
            .unwrap();

        let feed = fetch_user_notifications(&store, "u1").await.unwrap();
        let titles: Vec<&str> = feed.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);

        store.set_fail_ordered(true);
        let fallback = fetch_user_notifications(&store, "u1").await.unwrap();
        let titles: Vec<&str> = fallback.iter().map(|n| n.title.as_str()).collect();
        assert_eq!(titles, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn fan_out_writes_one_unread_row_per_user() {
        let store = Store::memory();
        let ids = vec!["u1".to_string(), "u2".to_string(), "u3".to_string()];
        send_to_users(&store, &ids, &message(NotificationType::Promo))
            .await
            .unwrap();

        let all = store.list_all("notifications").await.unwrap();
        assert_eq!(all.len(), 3);
        for doc in &all {
            assert!(!doc.get_bool("isRead").unwrap());
            assert_eq!(doc.get_str("type").unwrap(), "promo");
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_every_registered_user() {
        let store = Store::memory();
        let u1 = store.create("users", doc! { "name": "a" }).await.unwrap();
        let u2 = store.create("users", doc! { "name": "b" }).await.unwrap();

        send_to_all(&store, &message(NotificationType::System))
            .await
            .unwrap();

        let all = store.list_all("notifications").await.unwrap();
        assert_eq!(all.len(), 2);
        let mut recipients: Vec<String> = all
            .iter()
            .map(|d| d.get_str("userId").unwrap().to_string())
            .collect();
        recipients.sort();
        let mut expected = vec![u1, u2];
        expected.sort();
        assert_eq!(recipients, expected);
    }

    #[test]
    fn push_payload_nests_display_fields_and_folds_type_into_data() {
        let payload = PushNotificationPayload {
            title: "Flash Sale".into(),
            body: "20% off brake pads".into(),
            kind: NotificationType::Promo,
            target_type: PushTarget::All,
            target_user_id: None,
            target_tier: None,
            data: Some(HashMap::from([(
                "campaignId".to_string(),
                "promo-08".to_string(),
            )])),
        };
        let wire = build_push_payload(&payload);
        assert_eq!(wire["notification"]["title"], "Flash Sale");
        assert_eq!(wire["notification"]["body"], "20% off brake pads");
        assert_eq!(wire["data"]["type"], "promo");
        assert_eq!(wire["data"]["campaignId"], "promo-08");
    }

    #[tokio::test]
    async fn push_dispatch_targets_a_single_user() {
        let store = Store::memory();
        let payload = PushNotificationPayload {
            title: "Order update".into(),
            body: "Your order is on the way".into(),
            kind: NotificationType::Order,
            target_type: PushTarget::Single,
            target_user_id: Some("u9".into()),
            target_tier: None,
            data: None,
        };
        let (recipients, wire) = dispatch_push(&store, &payload).await.unwrap();
        assert_eq!(recipients, 1);
        assert_eq!(wire["data"]["type"], "order");

        let rows = store.list_all("notifications").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("userId").unwrap(), "u9");
    }

    #[tokio::test]
    async fn push_dispatch_resolves_tier_segments_through_loyalty() {
        let store = Store::memory();
        let gold = store
            .create("loyalty_accounts", doc! { "tier": "gold" })
            .await
            .unwrap();
        store
            .create("loyalty_accounts", doc! { "tier": "bronze" })
            .await
            .unwrap();

        let payload = PushNotificationPayload {
            title: "Gold perk".into(),
            body: "Free inspection this month".into(),
            kind: NotificationType::Promo,
            target_type: PushTarget::Segment,
            target_user_id: None,
            target_tier: Some("gold".into()),
            data: None,
        };
        let (recipients, _) = dispatch_push(&store, &payload).await.unwrap();
        assert_eq!(recipients, 1);
        let rows = store.list_all("notifications").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get_str("userId").unwrap(), gold);
    }

    #[test]
    fn week_starts_on_sunday() {
        // 2024-01-10 was a Wednesday.
        let wednesday = Utc.with_ymd_and_hms(2024, 1, 10, 15, 30, 0).unwrap();
        assert_eq!(
            start_of_week(wednesday),
            Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()
        );

        // A Sunday is its own week start.
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 23, 59, 0).unwrap();
        assert_eq!(
            start_of_week(sunday),
            Utc.with_ymd_and_hms(2024, 1, 7, 0, 0, 0).unwrap()
        );

        let mid_month = Utc.with_ymd_and_hms(2024, 2, 15, 10, 30, 0).unwrap();
        assert_eq!(
            start_of_month(mid_month),
            Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn stats_count_recent_sends_in_every_window() {
        let store = Store::memory();
        store
            .create("notifications", doc! { "createdAt": bson_date(Utc::now()) })
            .await
            .unwrap();
        store
            .create("notifications", doc! { "createdAt": bson_date(Utc::now()) })
            .await
            .unwrap();
        store
            .create(
                "notifications",
                doc! { "createdAt": bson_date(Utc::now() - Duration::days(60)) },
            )
            .await
            .unwrap();

        let stats = compute_notification_stats(&store).await.unwrap();
        assert_eq!(stats.sent_today, 2);
        assert_eq!(stats.sent_this_week, 2);
        assert_eq!(stats.sent_this_month, 2);
    }
}
