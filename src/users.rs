// src/users.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::{error, warn};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::normalize::{
    bool_field, bson_date, doc_id, int_field, num_field, opt_str_field, opt_timestamp_field,
    str_field, str_list_field, timestamp_field,
};
use crate::notifications::start_of_month;
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

pub const DEFAULT_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserRole {
    User,
    Staff,
    Admin,
    SuperAdmin,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Staff => "staff",
            UserRole::Admin => "admin",
            UserRole::SuperAdmin => "superAdmin",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "staff" => UserRole::Staff,
            "admin" => UserRole::Admin,
            "superAdmin" => UserRole::SuperAdmin,
            _ => UserRole::User,
        }
    }

    /// Roles allowed into the admin dashboard.
    pub fn is_admin_role(self) -> bool {
        matches!(self, UserRole::Staff | UserRole::Admin | UserRole::SuperAdmin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserStatus {
    Active,
    Suspended,
    Banned,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Suspended => "suspended",
            UserStatus::Banned => "banned",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "suspended" => UserStatus::Suspended,
            "banned" => UserStatus::Banned,
            _ => UserStatus::Active,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    pub phone: Option<String>,
    pub profile_image_url: Option<String>,
    pub role: UserRole,
    pub device_tokens: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: Option<UserStatus>,
    pub suspended_at: Option<DateTime<Utc>>,
    pub suspension_reason: Option<String>,
    pub banned_at: Option<DateTime<Utc>>,
    pub ban_reason: Option<String>,
}

/// Accounts imported from the mobile sign-up flow use `displayName`,
/// `phoneNumber` and `photoURL`.
pub fn transform_user(id: &str, data: &Document) -> User {
    User {
        id: id.to_string(),
        email: str_field(data, &["email"], ""),
        name: str_field(data, &["name", "displayName"], ""),
        phone: opt_str_field(data, &["phone", "phoneNumber"]),
        profile_image_url: opt_str_field(data, &["profileImageUrl", "photoURL"]),
        role: UserRole::parse(data.get_str("role").unwrap_or("")),
        device_tokens: str_list_field(data, &["deviceTokens"]),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
        status: opt_str_field(data, &["status"]).map(|s| UserStatus::parse(&s)),
        suspended_at: opt_timestamp_field(data, "suspendedAt"),
        suspension_reason: opt_str_field(data, &["suspensionReason"]),
        banned_at: opt_timestamp_field(data, "bannedAt"),
        ban_reason: opt_str_field(data, &["banReason"]),
    }
}

#[derive(Debug, Clone, Default)]
pub struct UserListOptions {
    pub page_size: Option<usize>,
    pub before: Option<DateTime<Utc>>,
    pub search_term: Option<String>,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPage {
    pub users: Vec<User>,
    pub next_cursor: Option<DateTime<Utc>>,
}

fn matches_search(user: &User, term: &str) -> bool {
    user.name.to_lowercase().contains(term)
        || user.email.to_lowercase().contains(term)
        || user.phone.as_deref().map_or(false, |p| p.contains(term))
}

/// Newest-first page of users. A role filter replaces the cursor, so a
/// role-scoped listing always starts from the top. Search runs over the
/// fetched page only; the cursor is taken before search narrows it.
///
/// When the ordered query is rejected the whole collection is scanned,
/// sorted and truncated instead, and no cursor is handed back.
pub async fn fetch_users(store: &Store, options: &UserListOptions) -> StoreResult<UserPage> {
    let page_size = options.page_size.unwrap_or(DEFAULT_PAGE_SIZE);

    let mut query = StoreQuery::new().order_desc("createdAt").limit(page_size);
    if let Some(role) = &options.role {
        query = StoreQuery::new()
            .filter(Predicate::Eq("role".into(), Bson::from(role.as_str())))
            .order_desc("createdAt")
            .limit(page_size);
    } else if let Some(before) = options.before {
        query = StoreQuery::new()
            .filter(Predicate::Lt("createdAt".into(), bson_date(before)))
            .order_desc("createdAt")
            .limit(page_size);
    }

    match store.list("users", &query).await {
        Ok(docs) => {
            let next_cursor = docs
                .last()
                .and_then(|d| d.get_datetime("createdAt").ok())
                .map(|dt| dt.to_chrono());
            let mut users: Vec<User> =
                docs.iter().map(|d| transform_user(&doc_id(d), d)).collect();
            if let Some(term) = &options.search_term {
                let term = term.to_lowercase();
                users.retain(|u| matches_search(u, &term));
            }
            Ok(UserPage { users, next_cursor })
        }
        Err(e) => {
            warn!("Users query with ordering failed, scanning unordered: {}", e);
            let docs = store.list_all("users").await?;
            let mut users: Vec<User> =
                docs.iter().map(|d| transform_user(&doc_id(d), d)).collect();
            users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            if let Some(role) = &options.role {
                users.retain(|u| u.role.as_str() == role);
            }
            if let Some(term) = &options.search_term {
                let term = term.to_lowercase();
                users.retain(|u| matches_search(u, &term));
            }
            users.truncate(page_size);
            Ok(UserPage { users, next_cursor: None })
        }
    }
}

pub async fn fetch_user(store: &Store, user_id: &str) -> StoreResult<Option<User>> {
    let found = store.get("users", user_id).await?;
    Ok(found.map(|d| transform_user(user_id, &d)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub profile_image_url: Option<String>,
    pub role: Option<UserRole>,
}

pub async fn update_user_fields(
    store: &Store,
    user_id: &str,
    req: &UpdateUserRequest,
) -> StoreResult<bool> {
    let mut update_doc = Document::new();
    if let Some(name) = &req.name {
        update_doc.insert("name", name);
    }
    if let Some(phone) = &req.phone {
        update_doc.insert("phone", phone);
    }
    if let Some(profile_image_url) = &req.profile_image_url {
        update_doc.insert("profileImageUrl", profile_image_url);
    }
    if let Some(role) = req.role {
        update_doc.insert("role", role.as_str());
    }
    update_doc.insert("updatedAt", BsonDateTime::now());
    store.update("users", user_id, update_doc).await
}

/// Moderation writes. Suspending or banning stamps the matching time and
/// reason; reinstating only flips the status, the old stamps stay as an
/// audit trail.
pub async fn set_user_status(
    store: &Store,
    user_id: &str,
    status: UserStatus,
    reason: Option<&str>,
) -> StoreResult<bool> {
    let mut update_doc = doc! {
        "status": status.as_str(),
        "updatedAt": BsonDateTime::now(),
    };
    match status {
        UserStatus::Suspended => {
            update_doc.insert("suspendedAt", BsonDateTime::now());
            if let Some(reason) = reason {
                update_doc.insert("suspensionReason", reason);
            }
        }
        UserStatus::Banned => {
            update_doc.insert("bannedAt", BsonDateTime::now());
            if let Some(reason) = reason {
                update_doc.insert("banReason", reason);
            }
        }
        UserStatus::Active => {}
    }
    store.update("users", user_id, update_doc).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSpecs {
    pub tire_size: Option<String>,
    pub oil_type: Option<String>,
    pub oil_capacity: Option<String>,
    pub battery_model: Option<String>,
    pub wiper_size: Option<String>,
    pub engine_type: Option<String>,
    pub transmission: Option<String>,
    pub fuel_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vehicle {
    pub id: String,
    pub user_id: String,
    pub brand: String,
    pub model: String,
    pub year: i64,
    pub variant: String,
    pub license_plate: Option<String>,
    pub is_primary: bool,
    pub specs: Option<VehicleSpecs>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn transform_vehicle(id: &str, user_id: &str, data: &Document) -> Vehicle {
    let specs = data.get_document("specs").ok().map(|s| VehicleSpecs {
        tire_size: opt_str_field(s, &["tireSize"]),
        oil_type: opt_str_field(s, &["oilType"]),
        oil_capacity: opt_str_field(s, &["oilCapacity"]),
        battery_model: opt_str_field(s, &["batteryModel"]),
        wiper_size: opt_str_field(s, &["wiperSize"]),
        engine_type: opt_str_field(s, &["engineType"]),
        transmission: opt_str_field(s, &["transmission"]),
        fuel_type: opt_str_field(s, &["fuelType"]),
    });
    Vehicle {
        id: id.to_string(),
        user_id: user_id.to_string(),
        brand: str_field(data, &["brand"], ""),
        model: str_field(data, &["model"], ""),
        year: int_field(data, &["year"], 0),
        variant: str_field(data, &["variant"], ""),
        license_plate: opt_str_field(data, &["licensePlate"]),
        is_primary: bool_field(data, &["isPrimary"], false),
        specs,
        created_at: timestamp_field(data, "createdAt"),
        updated_at: timestamp_field(data, "updatedAt"),
    }
}

pub async fn fetch_user_vehicles(store: &Store, user_id: &str) -> StoreResult<Vec<Vehicle>> {
    let collection = Store::subcollection("users", user_id, "vehicles");
    let docs = store.list_all(&collection).await?;
    Ok(docs
        .iter()
        .map(|d| transform_vehicle(&doc_id(d), user_id, d))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub id: String,
    pub user_id: String,
    pub label: String,
    pub full_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub is_default: bool,
}

pub async fn fetch_user_addresses(store: &Store, user_id: &str) -> StoreResult<Vec<Address>> {
    let collection = Store::subcollection("users", user_id, "addresses");
    let docs = store.list_all(&collection).await?;
    Ok(docs
        .iter()
        .map(|d| Address {
            id: doc_id(d),
            user_id: user_id.to_string(),
            label: str_field(d, &["label"], ""),
            full_address: str_field(d, &["fullAddress"], ""),
            latitude: num_field(d, &["latitude"], 0.0),
            longitude: num_field(d, &["longitude"], 0.0),
            is_default: bool_field(d, &["isDefault"], false),
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoyaltyTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub fn parse(value: &str) -> Self {
        match value {
            "silver" => LoyaltyTier::Silver,
            "gold" => LoyaltyTier::Gold,
            "platinum" => LoyaltyTier::Platinum,
            _ => LoyaltyTier::Bronze,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoyaltyAccount {
    pub user_id: String,
    pub total_points: i64,
    pub lifetime_points: i64,
    pub tier: LoyaltyTier,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Loyalty accounts share their id with the owning user.
pub async fn fetch_loyalty_account(
    store: &Store,
    user_id: &str,
) -> StoreResult<Option<LoyaltyAccount>> {
    let found = store.get("loyalty_accounts", user_id).await?;
    Ok(found.map(|d| LoyaltyAccount {
        user_id: user_id.to_string(),
        total_points: int_field(&d, &["totalPoints"], 0),
        lifetime_points: int_field(&d, &["lifetimePoints"], 0),
        tier: LoyaltyTier::parse(d.get_str("tier").unwrap_or("")),
        created_at: timestamp_field(&d, "createdAt"),
        updated_at: timestamp_field(&d, "updatedAt"),
    }))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: i64,
    pub new_this_month: i64,
    pub by_role: HashMap<String, i64>,
}

pub async fn compute_user_stats(store: &Store) -> StoreResult<UserStats> {
    let all = store.list_all("users").await?;
    let month_start = start_of_month(Utc::now());

    let mut by_role: HashMap<String, i64> = HashMap::new();
    let mut new_this_month = 0;
    for user in &all {
        let role = match user.get_str("role") {
            Ok(role) if !role.is_empty() => role.to_string(),
            _ => "user".to_string(),
        };
        *by_role.entry(role).or_insert(0) += 1;
        if timestamp_field(user, "createdAt") >= month_start {
            new_this_month += 1;
        }
    }

    Ok(UserStats {
        total: all.len() as i64,
        new_this_month,
        by_role,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserListQuery {
    pub page_size: Option<usize>,
    pub before: Option<DateTime<Utc>>,
    pub search: Option<String>,
    pub role: Option<String>,
}

pub async fn list_users(
    data: web::Data<AppState>,
    query: web::Query<UserListQuery>,
) -> impl Responder {
    let options = UserListOptions {
        page_size: query.page_size,
        before: query.before,
        search_term: query.search.clone(),
        role: query.role.clone(),
    };
    match fetch_users(&data.store, &options).await {
        Ok(page) => HttpResponse::Ok().json(page),
        Err(e) => {
            error!("Error fetching users: {}", e);
            HttpResponse::InternalServerError().body("Error fetching users")
        }
    }
}

pub async fn get_user(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let user_id = path.into_inner();
    match fetch_user(&data.store, &user_id).await {
        Ok(Some(user)) => HttpResponse::Ok().json(user),
        Ok(None) => HttpResponse::NotFound().body("User not found"),
        Err(e) => {
            error!("Error fetching user {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error fetching user")
        }
    }
}

pub async fn update_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUserRequest>,
) -> impl Responder {
    let user_id = path.into_inner();
    match update_user_fields(&data.store, &user_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("User updated"),
        Ok(false) => HttpResponse::NotFound().body("User not found"),
        Err(e) => {
            error!("Error updating user {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error updating user")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserStatusRequest {
    pub status: UserStatus,
    pub reason: Option<String>,
}

pub async fn update_user_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateUserStatusRequest>,
) -> impl Responder {
    let user_id = path.into_inner();
    match set_user_status(&data.store, &user_id, payload.status, payload.reason.as_deref()).await
    {
        Ok(true) => HttpResponse::Ok().body("User status updated"),
        Ok(false) => HttpResponse::NotFound().body("User not found"),
        Err(e) => {
            error!("Error updating user status {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error updating user status")
        }
    }
}

pub async fn list_user_vehicles(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let user_id = path.into_inner();
    match fetch_user_vehicles(&data.store, &user_id).await {
        Ok(vehicles) => HttpResponse::Ok().json(vehicles),
        Err(e) => {
            error!("Error fetching vehicles for {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error fetching vehicles")
        }
    }
}

pub async fn list_user_addresses(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let user_id = path.into_inner();
    match fetch_user_addresses(&data.store, &user_id).await {
        Ok(addresses) => HttpResponse::Ok().json(addresses),
        Err(e) => {
            error!("Error fetching addresses for {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error fetching addresses")
        }
    }
}

pub async fn get_loyalty_account(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> impl Responder {
    let user_id = path.into_inner();
    match fetch_loyalty_account(&data.store, &user_id).await {
        Ok(Some(account)) => HttpResponse::Ok().json(account),
        Ok(None) => HttpResponse::NotFound().body("Loyalty account not found"),
        Err(e) => {
            error!("Error fetching loyalty account {}: {}", user_id, e);
            HttpResponse::InternalServerError().body("Error fetching loyalty account")
        }
    }
}

pub async fn get_user_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_user_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing user stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing user stats")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn seeded_at(offset_minutes: i64) -> Bson {
        bson_date(Utc::now() - Duration::minutes(offset_minutes))
    }

    #[test]
    fn transform_resolves_mobile_signup_fields() {
        let user = transform_user(
            "u1",
            &doc! {
                "displayName": "Aina",
                "phoneNumber": "+60123456789",
                "photoURL": "https://img/x.jpg",
            },
        );
        assert_eq!(user.name, "Aina");
        assert_eq!(user.phone.as_deref(), Some("+60123456789"));
        assert_eq!(user.profile_image_url.as_deref(), Some("https://img/x.jpg"));
        assert_eq!(user.role, UserRole::User);
        assert!(user.status.is_none());
    }

    #[tokio::test]
    async fn pages_walk_backwards_through_created_at() {
        let store = Store::memory();
        for (name, at) in [("oldest", 30), ("middle", 20), ("newest", 10)] {
            store
                .create("users", doc! { "name": name, "createdAt": seeded_at(at) })
                .await
                .unwrap();
        }

        let first = fetch_users(
            &store,
            &UserListOptions { page_size: Some(2), ..Default::default() },
        )
        .await
        .unwrap();
        let names: Vec<&str> = first.users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["newest", "middle"]);
        let cursor = first.next_cursor.expect("cursor for a full page");

        let second = fetch_users(
            &store,
            &UserListOptions {
                page_size: Some(2),
                before: Some(cursor),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let names: Vec<&str> = second.users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["oldest"]);
    }

    #[tokio::test]
    async fn role_filter_restarts_from_the_top() {
        let store = Store::memory();
        store
            .create(
                "users",
                doc! { "name": "admin-old", "role": "admin", "createdAt": seeded_at(30) },
            )
            .await
            .unwrap();
        store
            .create(
                "users",
                doc! { "name": "admin-new", "role": "admin", "createdAt": seeded_at(10) },
            )
            .await
            .unwrap();

        // A cursor far in the past would exclude both admins, but the
        // role filter takes over and ignores it.
        let page = fetch_users(
            &store,
            &UserListOptions {
                role: Some("admin".into()),
                before: Some(Utc::now() - Duration::days(365)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let names: Vec<&str> = page.users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["admin-new", "admin-old"]);
    }

    #[tokio::test]
    async fn search_matches_name_email_and_phone() {
        let store = Store::memory();
        store
            .create(
                "users",
                doc! { "name": "Farid Hassan", "email": "farid@byki.my", "createdAt": seeded_at(1) },
            )
            .await
            .unwrap();
        store
            .create(
                "users",
                doc! { "name": "Mei Lin", "email": "mei@byki.my",
                       "phone": "+60177779999", "createdAt": seeded_at(2) },
            )
            .await
            .unwrap();

        let by_name = fetch_users(
            &store,
            &UserListOptions { search_term: Some("FARID".into()), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(by_name.users.len(), 1);
        assert_eq!(by_name.users[0].name, "Farid Hassan");

        let by_phone = fetch_users(
            &store,
            &UserListOptions { search_term: Some("7777".into()), ..Default::default() },
        )
        .await
        .unwrap();
        assert_eq!(by_phone.users.len(), 1);
        assert_eq!(by_phone.users[0].name, "Mei Lin");
    }

    #[tokio::test]
    async fn unordered_fallback_returns_first_page_without_cursor() {
        let store = Store::memory();
        for (name, at) in [("a", 30), ("b", 20), ("c", 10)] {
            store
                .create("users", doc! { "name": name, "createdAt": seeded_at(at) })
                .await
                .unwrap();
        }
        store.set_fail_ordered(true);

        let page = fetch_users(
            &store,
            &UserListOptions { page_size: Some(2), ..Default::default() },
        )
        .await
        .unwrap();
        let names: Vec<&str> = page.users.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b"]);
        assert!(page.next_cursor.is_none());
    }

    #[tokio::test]
    async fn moderation_stamps_follow_the_status() {
        let store = Store::memory();
        let id = store.create("users", doc! { "name": "X" }).await.unwrap();

        set_user_status(&store, &id, UserStatus::Suspended, Some("spam bookings"))
            .await
            .unwrap();
        let doc = store.get("users", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "suspended");
        assert!(doc.get_datetime("suspendedAt").is_ok());
        assert_eq!(doc.get_str("suspensionReason").unwrap(), "spam bookings");

        set_user_status(&store, &id, UserStatus::Active, None).await.unwrap();
        let doc = store.get("users", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "active");
        // The suspension record survives reinstatement.
        assert!(doc.get_datetime("suspendedAt").is_ok());
    }

    #[tokio::test]
    async fn stats_bucket_roles_and_count_recent_signups() {
        let store = Store::memory();
        store
            .create("users", doc! { "role": "admin", "createdAt": seeded_at(5) })
            .await
            .unwrap();
        store
            .create(
                "users",
                doc! { "createdAt": bson_date(Utc::now() - Duration::days(90)) },
            )
            .await
            .unwrap();
        store
            .create("users", doc! { "createdAt": seeded_at(10) })
            .await
            .unwrap();

        let stats = compute_user_stats(&store).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(*stats.by_role.get("admin").unwrap(), 1);
        assert_eq!(*stats.by_role.get("user").unwrap(), 2);
        assert_eq!(stats.new_this_month, 2);
    }

    #[tokio::test]
    async fn vehicles_and_addresses_live_under_the_user() {
        let store = Store::memory();
        let vehicles = Store::subcollection("users", "u1", "vehicles");
        store
            .create(
                &vehicles,
                doc! { "brand": "Perodua", "model": "Myvi", "year": 2019_i64,
                       "isPrimary": true,
                       "specs": { "oilType": "5W-30", "tireSize": "185/55R15" } },
            )
            .await
            .unwrap();

        let found = fetch_user_vehicles(&store, "u1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].user_id, "u1");
        assert_eq!(found[0].brand, "Perodua");
        let specs = found[0].specs.as_ref().unwrap();
        assert_eq!(specs.oil_type.as_deref(), Some("5W-30"));

        // Another user's garage stays empty.
        assert!(fetch_user_vehicles(&store, "u2").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn loyalty_account_shares_the_user_id() {
        let store = Store::memory();
        // The account document's id doubles as the user id.
        let user_id = store
            .create(
                "loyalty_accounts",
                doc! { "totalPoints": 320_i64, "lifetimePoints": 1500_i64, "tier": "gold" },
            )
            .await
            .unwrap();

        let account = fetch_loyalty_account(&store, &user_id).await.unwrap().unwrap();
        assert_eq!(account.user_id, user_id);
        assert_eq!(account.total_points, 320);
        assert_eq!(account.lifetime_points, 1500);
        assert_eq!(account.tier, LoyaltyTier::Gold);

        assert!(fetch_loyalty_account(&store, "nobody").await.unwrap().is_none());
    }
}
