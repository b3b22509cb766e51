// src/workshops.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::normalize::{
    bool_field, doc_id, int_field, num_field, opt_str_field, str_field, str_list_field,
    timestamp_field,
};
use crate::store::{Store, StoreQuery, StoreResult};

pub const DEFAULT_SUPPORTED_CATEGORIES: [&str; 5] =
    ["Oil", "Brakes", "Filters", "Battery", "Tires"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkshopPartnerType {
    Hq,
    Partner,
    Affiliate,
}

impl WorkshopPartnerType {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkshopPartnerType::Hq => "hq",
            WorkshopPartnerType::Partner => "partner",
            WorkshopPartnerType::Affiliate => "affiliate",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "hq" => WorkshopPartnerType::Hq,
            "affiliate" => WorkshopPartnerType::Affiliate,
            _ => WorkshopPartnerType::Partner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ServiceRegion {
    KlangValley,
    Northern,
    Southern,
    EastCoast,
    EastMalaysia,
}

impl ServiceRegion {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceRegion::KlangValley => "klangValley",
            ServiceRegion::Northern => "northern",
            ServiceRegion::Southern => "southern",
            ServiceRegion::EastCoast => "eastCoast",
            ServiceRegion::EastMalaysia => "eastMalaysia",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "northern" => ServiceRegion::Northern,
            "southern" => ServiceRegion::Southern,
            "eastCoast" => ServiceRegion::EastCoast,
            "eastMalaysia" => ServiceRegion::EastMalaysia,
            _ => ServiceRegion::KlangValley,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    pub monday: String,
    pub tuesday: String,
    pub wednesday: String,
    pub thursday: String,
    pub friday: String,
    pub saturday: String,
    pub sunday: String,
}

impl Default for WorkingHours {
    fn default() -> Self {
        WorkingHours {
            monday: "9:00 AM - 6:00 PM".to_string(),
            tuesday: "9:00 AM - 6:00 PM".to_string(),
            wednesday: "9:00 AM - 6:00 PM".to_string(),
            thursday: "9:00 AM - 6:00 PM".to_string(),
            friday: "9:00 AM - 6:00 PM".to_string(),
            saturday: "9:00 AM - 2:00 PM".to_string(),
            sunday: "Closed".to_string(),
        }
    }
}

impl WorkingHours {
    fn from_doc(data: &Document) -> Self {
        WorkingHours {
            monday: str_field(data, &["monday"], ""),
            tuesday: str_field(data, &["tuesday"], ""),
            wednesday: str_field(data, &["wednesday"], ""),
            thursday: str_field(data, &["thursday"], ""),
            friday: str_field(data, &["friday"], ""),
            saturday: str_field(data, &["saturday"], ""),
            sunday: str_field(data, &["sunday"], ""),
        }
    }

    fn to_doc(&self) -> Document {
        doc! {
            "monday": &self.monday,
            "tuesday": &self.tuesday,
            "wednesday": &self.wednesday,
            "thursday": &self.thursday,
            "friday": &self.friday,
            "saturday": &self.saturday,
            "sunday": &self.sunday,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Workshop {
    pub id: String,
    pub name: String,
    pub address: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub phone: String,
    pub whatsapp: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub rating: f64,
    pub review_count: i64,
    pub amenities: Vec<String>,
    pub working_hours: WorkingHours,
    pub services: Vec<String>,
    pub specializations: Vec<String>,
    pub image_url: Option<String>,
    pub gallery_images: Option<Vec<String>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub partner_type: WorkshopPartnerType,
    pub region: ServiceRegion,
    #[serde(rename = "isHQ")]
    pub is_hq: bool,
    pub google_maps_url: Option<String>,
    pub google_place_id: Option<String>,
    pub coverage_areas: Vec<String>,
    pub max_daily_bookings: i64,
    pub supported_categories: Vec<String>,
}

/// Workshops written before the partner rollout have no hours, partner
/// type or category list; those fall back to the HQ-era defaults.
pub fn transform_workshop(id: &str, data: &Document) -> Workshop {
    let working_hours = match data.get_document("workingHours") {
        Ok(hours) => WorkingHours::from_doc(hours),
        Err(_) => WorkingHours::default(),
    };
    let supported_categories = match data.get_array("supportedCategories") {
        Ok(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(|s| s.to_string()))
            .collect(),
        Err(_) => DEFAULT_SUPPORTED_CATEGORIES
            .iter()
            .map(|s| s.to_string())
            .collect(),
    };

    Workshop {
        id: id.to_string(),
        name: str_field(data, &["name"], ""),
        address: str_field(data, &["address"], ""),
        city: opt_str_field(data, &["city"]),
        state: opt_str_field(data, &["state"]),
        postcode: opt_str_field(data, &["postcode"]),
        latitude: num_field(data, &["latitude"], 0.0),
        longitude: num_field(data, &["longitude"], 0.0),
        phone: str_field(data, &["phone"], ""),
        whatsapp: opt_str_field(data, &["whatsapp"]),
        email: opt_str_field(data, &["email"]),
        website: opt_str_field(data, &["website"]),
        rating: num_field(data, &["rating"], 0.0),
        review_count: int_field(data, &["reviewCount"], 0),
        amenities: str_list_field(data, &["amenities"]),
        working_hours,
        services: str_list_field(data, &["services"]),
        specializations: str_list_field(data, &["specializations"]),
        image_url: opt_str_field(data, &["imageUrl"]),
        gallery_images: data.get_array("galleryImages").ok().map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(|s| s.to_string()))
                .collect()
        }),
        is_active: bool_field(data, &["isActive"], true),
        created_at: timestamp_field(data, "createdAt"),
        partner_type: WorkshopPartnerType::parse(data.get_str("partnerType").unwrap_or("")),
        region: ServiceRegion::parse(data.get_str("region").unwrap_or("")),
        is_hq: bool_field(data, &["isHQ"], false),
        google_maps_url: opt_str_field(data, &["googleMapsUrl"]),
        google_place_id: opt_str_field(data, &["googlePlaceId"]),
        coverage_areas: str_list_field(data, &["coverageAreas"]),
        max_daily_bookings: int_field(data, &["maxDailyBookings"], 10),
        supported_categories,
    }
}

pub async fn fetch_workshops(store: &Store) -> StoreResult<Vec<Workshop>> {
    let query = StoreQuery::new().order_asc("name");
    let docs = store.fetch_filtered("workshops", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_workshop(&doc_id(d), d))
        .collect())
}

pub async fn fetch_workshop(store: &Store, workshop_id: &str) -> StoreResult<Option<Workshop>> {
    let found = store.get("workshops", workshop_id).await?;
    Ok(found.map(|d| transform_workshop(workshop_id, &d)))
}

fn default_true() -> bool {
    true
}

fn default_max_daily_bookings() -> i64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkshopRequest {
    pub name: String,
    pub address: String,
    pub phone: String,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    pub whatsapp: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    #[serde(default)]
    pub amenities: Vec<String>,
    pub working_hours: Option<WorkingHours>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub specializations: Vec<String>,
    pub image_url: Option<String>,
    pub gallery_images: Option<Vec<String>>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub partner_type: Option<WorkshopPartnerType>,
    pub region: Option<ServiceRegion>,
    #[serde(rename = "isHQ", default)]
    pub is_hq: bool,
    pub google_maps_url: Option<String>,
    pub google_place_id: Option<String>,
    #[serde(default)]
    pub coverage_areas: Vec<String>,
    #[serde(default = "default_max_daily_bookings")]
    pub max_daily_bookings: i64,
    pub supported_categories: Option<Vec<String>>,
}

pub async fn add_workshop(store: &Store, req: &CreateWorkshopRequest) -> StoreResult<String> {
    let working_hours = req.working_hours.clone().unwrap_or_default();
    let supported_categories = req.supported_categories.clone().unwrap_or_else(|| {
        DEFAULT_SUPPORTED_CATEGORIES
            .iter()
            .map(|s| s.to_string())
            .collect()
    });

    let mut workshop = doc! {
        "name": &req.name,
        "address": &req.address,
        "phone": &req.phone,
        "latitude": req.latitude,
        "longitude": req.longitude,
        "rating": 0.0,
        "reviewCount": 0_i64,
        "amenities": req.amenities.clone(),
        "workingHours": working_hours.to_doc(),
        "services": req.services.clone(),
        "specializations": req.specializations.clone(),
        "isActive": req.is_active,
        "partnerType": req.partner_type.unwrap_or(WorkshopPartnerType::Partner).as_str(),
        "region": req.region.unwrap_or(ServiceRegion::KlangValley).as_str(),
        "isHQ": req.is_hq,
        "coverageAreas": req.coverage_areas.clone(),
        "maxDailyBookings": req.max_daily_bookings,
        "supportedCategories": supported_categories,
        "createdAt": BsonDateTime::now(),
        "updatedAt": BsonDateTime::now(),
    };
    if let Some(city) = &req.city {
        workshop.insert("city", city);
    }
    if let Some(state) = &req.state {
        workshop.insert("state", state);
    }
    if let Some(postcode) = &req.postcode {
        workshop.insert("postcode", postcode);
    }
    if let Some(whatsapp) = &req.whatsapp {
        workshop.insert("whatsapp", whatsapp);
    }
    if let Some(email) = &req.email {
        workshop.insert("email", email);
    }
    if let Some(website) = &req.website {
        workshop.insert("website", website);
    }
    if let Some(image_url) = &req.image_url {
        workshop.insert("imageUrl", image_url);
    }
    if let Some(gallery_images) = &req.gallery_images {
        workshop.insert("galleryImages", gallery_images.clone());
    }
    if let Some(google_maps_url) = &req.google_maps_url {
        workshop.insert("googleMapsUrl", google_maps_url);
    }
    if let Some(google_place_id) = &req.google_place_id {
        workshop.insert("googlePlaceId", google_place_id);
    }
    store.create("workshops", workshop).await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkshopRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postcode: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub whatsapp: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub amenities: Option<Vec<String>>,
    pub working_hours: Option<WorkingHours>,
    pub services: Option<Vec<String>>,
    pub specializations: Option<Vec<String>>,
    pub image_url: Option<String>,
    pub gallery_images: Option<Vec<String>>,
    pub is_active: Option<bool>,
    pub partner_type: Option<WorkshopPartnerType>,
    pub region: Option<ServiceRegion>,
    #[serde(rename = "isHQ")]
    pub is_hq: Option<bool>,
    pub google_maps_url: Option<String>,
    pub google_place_id: Option<String>,
    pub coverage_areas: Option<Vec<String>>,
    pub max_daily_bookings: Option<i64>,
    pub supported_categories: Option<Vec<String>>,
}

pub async fn update_workshop_fields(
    store: &Store,
    workshop_id: &str,
    req: &UpdateWorkshopRequest,
) -> StoreResult<bool> {
    let mut update_doc = Document::new();
    if let Some(name) = &req.name {
        update_doc.insert("name", name);
    }
    if let Some(address) = &req.address {
        update_doc.insert("address", address);
    }
    if let Some(phone) = &req.phone {
        update_doc.insert("phone", phone);
    }
    if let Some(city) = &req.city {
        update_doc.insert("city", city);
    }
    if let Some(state) = &req.state {
        update_doc.insert("state", state);
    }
    if let Some(postcode) = &req.postcode {
        update_doc.insert("postcode", postcode);
    }
    if let Some(latitude) = req.latitude {
        update_doc.insert("latitude", latitude);
    }
    if let Some(longitude) = req.longitude {
        update_doc.insert("longitude", longitude);
    }
    if let Some(whatsapp) = &req.whatsapp {
        update_doc.insert("whatsapp", whatsapp);
    }
    if let Some(email) = &req.email {
        update_doc.insert("email", email);
    }
    if let Some(website) = &req.website {
        update_doc.insert("website", website);
    }
    if let Some(amenities) = &req.amenities {
        update_doc.insert("amenities", amenities.clone());
    }
    if let Some(working_hours) = &req.working_hours {
        update_doc.insert("workingHours", working_hours.to_doc());
    }
    if let Some(services) = &req.services {
        update_doc.insert("services", services.clone());
    }
    if let Some(specializations) = &req.specializations {
        update_doc.insert("specializations", specializations.clone());
    }
    if let Some(image_url) = &req.image_url {
        update_doc.insert("imageUrl", image_url);
    }
    if let Some(gallery_images) = &req.gallery_images {
        update_doc.insert("galleryImages", gallery_images.clone());
    }
    if let Some(is_active) = req.is_active {
        update_doc.insert("isActive", is_active);
    }
    if let Some(partner_type) = req.partner_type {
        update_doc.insert("partnerType", partner_type.as_str());
    }
    if let Some(region) = req.region {
        update_doc.insert("region", region.as_str());
    }
    if let Some(is_hq) = req.is_hq {
        update_doc.insert("isHQ", is_hq);
    }
    if let Some(google_maps_url) = &req.google_maps_url {
        update_doc.insert("googleMapsUrl", google_maps_url);
    }
    if let Some(google_place_id) = &req.google_place_id {
        update_doc.insert("googlePlaceId", google_place_id);
    }
    if let Some(coverage_areas) = &req.coverage_areas {
        update_doc.insert("coverageAreas", coverage_areas.clone());
    }
    if let Some(max_daily_bookings) = req.max_daily_bookings {
        update_doc.insert("maxDailyBookings", max_daily_bookings);
    }
    if let Some(supported_categories) = &req.supported_categories {
        update_doc.insert("supportedCategories", supported_categories.clone());
    }
    update_doc.insert("updatedAt", BsonDateTime::now());
    store.update("workshops", workshop_id, update_doc).await
}

pub async fn remove_workshop(store: &Store, workshop_id: &str) -> StoreResult<bool> {
    store.delete("workshops", workshop_id).await
}

pub async fn set_workshop_active(
    store: &Store,
    workshop_id: &str,
    is_active: bool,
) -> StoreResult<bool> {
    store
        .update(
            "workshops",
            workshop_id,
            doc! { "isActive": is_active, "updatedAt": BsonDateTime::now() },
        )
        .await
}

pub async fn list_workshops(data: web::Data<AppState>) -> impl Responder {
    match fetch_workshops(&data.store).await {
        Ok(workshops) => HttpResponse::Ok().json(workshops),
        Err(e) => {
            error!("Error fetching workshops: {}", e);
            HttpResponse::InternalServerError().body("Error fetching workshops")
        }
    }
}

pub async fn get_workshop(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let workshop_id = path.into_inner();
    match fetch_workshop(&data.store, &workshop_id).await {
        Ok(Some(workshop)) => HttpResponse::Ok().json(workshop),
        Ok(None) => HttpResponse::NotFound().body("Workshop not found"),
        Err(e) => {
            error!("Error fetching workshop {}: {}", workshop_id, e);
            HttpResponse::InternalServerError().body("Error fetching workshop")
        }
    }
}

pub async fn create_workshop(
    data: web::Data<AppState>,
    payload: web::Json<CreateWorkshopRequest>,
) -> impl Responder {
    match add_workshop(&data.store, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error creating workshop: {}", e);
            HttpResponse::InternalServerError().body("Error creating workshop")
        }
    }
}

pub async fn update_workshop(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateWorkshopRequest>,
) -> impl Responder {
    let workshop_id = path.into_inner();
    match update_workshop_fields(&data.store, &workshop_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("Workshop updated"),
        Ok(false) => HttpResponse::NotFound().body("Workshop not found"),
        Err(e) => {
            error!("Error updating workshop {}: {}", workshop_id, e);
            HttpResponse::InternalServerError().body("Error updating workshop")
        }
    }
}

pub async fn delete_workshop(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let workshop_id = path.into_inner();
    match remove_workshop(&data.store, &workshop_id).await {
        Ok(true) => HttpResponse::Ok().body("Workshop deleted"),
        Ok(false) => HttpResponse::NotFound().body("Workshop not found"),
        Err(e) => {
            error!("Error deleting workshop {}: {}", workshop_id, e);
            HttpResponse::InternalServerError().body("Error deleting workshop")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleWorkshopRequest {
    pub is_active: bool,
}

pub async fn toggle_workshop(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<ToggleWorkshopRequest>,
) -> impl Responder {
    let workshop_id = path.into_inner();
    match set_workshop_active(&data.store, &workshop_id, payload.is_active).await {
        Ok(true) => HttpResponse::Ok().body("Workshop status updated"),
        Ok(false) => HttpResponse::NotFound().body("Workshop not found"),
        Err(e) => {
            error!("Error toggling workshop {}: {}", workshop_id, e);
            HttpResponse::InternalServerError().body("Error toggling workshop")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_applies_partner_era_defaults() {
        let workshop = transform_workshop("w1", &doc! { "name": "BYKI HQ Service Centre" });
        assert_eq!(workshop.working_hours.monday, "9:00 AM - 6:00 PM");
        assert_eq!(workshop.working_hours.saturday, "9:00 AM - 2:00 PM");
        assert_eq!(workshop.working_hours.sunday, "Closed");
        assert_eq!(workshop.partner_type, WorkshopPartnerType::Partner);
        assert_eq!(workshop.region, ServiceRegion::KlangValley);
        assert!(!workshop.is_hq);
        assert_eq!(workshop.max_daily_bookings, 10);
        assert_eq!(
            workshop.supported_categories,
            vec!["Oil", "Brakes", "Filters", "Battery", "Tires"]
        );
        assert!(workshop.is_active);
    }

    #[test]
    fn stored_hours_replace_the_defaults_wholesale() {
        let workshop = transform_workshop(
            "w1",
            &doc! { "workingHours": { "monday": "10:00 AM - 4:00 PM" } },
        );
        assert_eq!(workshop.working_hours.monday, "10:00 AM - 4:00 PM");
        // A stored block never mixes with defaults, even when incomplete.
        assert_eq!(workshop.working_hours.sunday, "");
    }

    #[test]
    fn transform_reads_partner_fields() {
        let workshop = transform_workshop(
            "w1",
            &doc! {
                "partnerType": "hq",
                "region": "eastMalaysia",
                "isHQ": true,
                "supportedCategories": ["Oil"],
                "maxDailyBookings": 25_i64,
            },
        );
        assert_eq!(workshop.partner_type, WorkshopPartnerType::Hq);
        assert_eq!(workshop.region, ServiceRegion::EastMalaysia);
        assert!(workshop.is_hq);
        assert_eq!(workshop.supported_categories, vec!["Oil"]);
        assert_eq!(workshop.max_daily_bookings, 25);
    }

    #[tokio::test]
    async fn listing_sorts_by_name_on_both_paths() {
        let store = Store::memory();
        for name in ["Cheras Auto", "Ampang Motors", "Bangsar Garage"] {
            store
                .create("workshops", doc! { "name": name })
                .await
                .unwrap();
        }

        let ordered: Vec<String> = fetch_workshops(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(ordered, vec!["Ampang Motors", "Bangsar Garage", "Cheras Auto"]);

        store.set_fail_ordered(true);
        let fallback: Vec<String> = fetch_workshops(&store)
            .await
            .unwrap()
            .into_iter()
            .map(|w| w.name)
            .collect();
        assert_eq!(fallback, ordered);
    }

    #[tokio::test]
    async fn toggle_stamps_updated_at() {
        let store = Store::memory();
        let id = store
            .create("workshops", doc! { "name": "Toggle Test", "isActive": true })
            .await
            .unwrap();
        set_workshop_active(&store, &id, false).await.unwrap();
        let doc = store.get("workshops", &id).await.unwrap().unwrap();
        assert!(!doc.get_bool("isActive").unwrap());
        assert!(doc.get_datetime("updatedAt").is_ok());
    }

    #[tokio::test]
    async fn create_writes_defaults_for_omitted_sections() {
        let store = Store::memory();
        let req: CreateWorkshopRequest = serde_json::from_value(serde_json::json!({
            "name": "Puchong Service",
            "address": "12 Jalan Puchong",
            "phone": "+60312345678",
        }))
        .unwrap();
        let id = add_workshop(&store, &req).await.unwrap();
        let workshop = fetch_workshop(&store, &id).await.unwrap().unwrap();
        assert_eq!(workshop.partner_type, WorkshopPartnerType::Partner);
        assert_eq!(workshop.working_hours, WorkingHours::default());
        assert_eq!(workshop.max_daily_bookings, 10);
        assert!(workshop.is_active);
    }
}
