// src/products.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::normalize::{
    bool_field, doc_id, int_field, num_field, opt_bool_field, opt_num_field, opt_str_field,
    opt_timestamp_field, str_field, str_list_field, string_map_field, timestamp_field,
};
use crate::store::{BatchWrite, Predicate, Store, StoreQuery, StoreResult};

pub const LOW_STOCK_THRESHOLD: i64 = 10;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub brand: String,
    pub price: f64,
    pub original_price: Option<f64>,
    pub image_urls: Vec<String>,
    pub specifications: HashMap<String, String>,
    pub compatible_with: Vec<String>,
    pub in_stock: bool,
    pub stock_quantity: i64,
    pub rating: f64,
    pub review_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Older catalog documents use `stock`, `images`, `specs` and
/// `compatibility`. When `inStock` was never written it is derived
/// from the stock count.
pub fn transform_product(id: &str, data: &Document) -> Product {
    let stock_quantity = int_field(data, &["stockQuantity", "stock"], 0);
    Product {
        id: id.to_string(),
        name: str_field(data, &["name"], ""),
        description: str_field(data, &["description"], ""),
        category: str_field(data, &["category"], ""),
        brand: str_field(data, &["brand"], ""),
        price: num_field(data, &["price"], 0.0),
        original_price: opt_num_field(data, &["originalPrice"]),
        image_urls: str_list_field(data, &["imageUrls", "images"]),
        specifications: string_map_field(data, &["specifications", "specs"]),
        compatible_with: str_list_field(data, &["compatibleWith", "compatibility"]),
        in_stock: opt_bool_field(data, &["inStock"]).unwrap_or(stock_quantity > 0),
        stock_quantity,
        rating: num_field(data, &["rating"], 0.0),
        review_count: int_field(data, &["reviewCount"], 0),
        created_at: timestamp_field(data, "createdAt"),
        updated_at: opt_timestamp_field(data, "updatedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProductFilters {
    pub category: Option<String>,
    pub brand: Option<String>,
    pub in_stock: Option<bool>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

/// Category is the only filter the catalog is indexed for; the rest
/// are applied after transformation.
pub async fn fetch_products(
    store: &Store,
    filters: &ProductFilters,
) -> StoreResult<Vec<Product>> {
    let mut query = StoreQuery::new().order_desc("createdAt");
    if let Some(category) = &filters.category {
        query = query.filter(Predicate::Eq(
            "category".into(),
            Bson::from(category.as_str()),
        ));
    }
    let docs = store.fetch_filtered("products", &query).await?;
    let mut products: Vec<Product> = docs
        .iter()
        .map(|d| transform_product(&doc_id(d), d))
        .collect();

    if let Some(brand) = &filters.brand {
        products.retain(|p| &p.brand == brand);
    }
    if let Some(in_stock) = filters.in_stock {
        products.retain(|p| p.in_stock == in_stock);
    }
    if let Some(min_price) = filters.min_price {
        products.retain(|p| p.price >= min_price);
    }
    if let Some(max_price) = filters.max_price {
        products.retain(|p| p.price <= max_price);
    }
    Ok(products)
}

pub async fn fetch_product(store: &Store, product_id: &str) -> StoreResult<Option<Product>> {
    let found = store.get("products", product_id).await?;
    Ok(found.map(|d| transform_product(product_id, &d)))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProductRequest {
    pub name: String,
    pub description: String,
    pub category: String,
    pub brand: String,
    pub price: f64,
    pub original_price: Option<f64>,
    #[serde(default)]
    pub image_urls: Vec<String>,
    #[serde(default)]
    pub specifications: HashMap<String, String>,
    #[serde(default)]
    pub compatible_with: Vec<String>,
    pub in_stock: Option<bool>,
    #[serde(default)]
    pub stock_quantity: i64,
}

pub async fn add_product(store: &Store, req: &CreateProductRequest) -> StoreResult<String> {
    let mut product = doc! {
        "name": &req.name,
        "description": &req.description,
        "category": &req.category,
        "brand": &req.brand,
        "price": req.price,
        "imageUrls": req.image_urls.clone(),
        "specifications": string_map_to_doc(&req.specifications),
        "compatibleWith": req.compatible_with.clone(),
        "inStock": req.in_stock.unwrap_or(req.stock_quantity > 0),
        "stockQuantity": req.stock_quantity,
        "rating": 0.0,
        "reviewCount": 0_i64,
        "createdAt": BsonDateTime::now(),
        "updatedAt": BsonDateTime::now(),
    };
    if let Some(original_price) = req.original_price {
        product.insert("originalPrice", original_price);
    }
    store.create("products", product).await
}

fn string_map_to_doc(map: &HashMap<String, String>) -> Document {
    let mut out = Document::new();
    for (key, value) in map {
        out.insert(key.clone(), value.clone());
    }
    out
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProductRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub original_price: Option<f64>,
    pub image_urls: Option<Vec<String>>,
    pub specifications: Option<HashMap<String, String>>,
    pub compatible_with: Option<Vec<String>>,
    pub in_stock: Option<bool>,
    pub stock_quantity: Option<i64>,
}

pub async fn update_product_fields(
    store: &Store,
    product_id: &str,
    req: &UpdateProductRequest,
) -> StoreResult<bool> {
    let mut update_doc = Document::new();
    if let Some(name) = &req.name {
        update_doc.insert("name", name);
    }
    if let Some(description) = &req.description {
        update_doc.insert("description", description);
    }
    if let Some(category) = &req.category {
        update_doc.insert("category", category);
    }
    if let Some(brand) = &req.brand {
        update_doc.insert("brand", brand);
    }
    if let Some(price) = req.price {
        update_doc.insert("price", price);
    }
    if let Some(original_price) = req.original_price {
        update_doc.insert("originalPrice", original_price);
    }
    if let Some(image_urls) = &req.image_urls {
        update_doc.insert("imageUrls", image_urls.clone());
    }
    if let Some(specifications) = &req.specifications {
        update_doc.insert("specifications", string_map_to_doc(specifications));
    }
    if let Some(compatible_with) = &req.compatible_with {
        update_doc.insert("compatibleWith", compatible_with.clone());
    }
    if let Some(in_stock) = req.in_stock {
        update_doc.insert("inStock", in_stock);
    }
    if let Some(stock_quantity) = req.stock_quantity {
        update_doc.insert("stockQuantity", stock_quantity);
    }
    update_doc.insert("updatedAt", BsonDateTime::now());
    store.update("products", product_id, update_doc).await
}

pub async fn remove_product(store: &Store, product_id: &str) -> StoreResult<bool> {
    store.delete("products", product_id).await
}

/// Stock writes keep the availability flag consistent with the count.
pub async fn set_stock(store: &Store, product_id: &str, quantity: i64) -> StoreResult<bool> {
    store
        .update(
            "products",
            product_id,
            doc! {
                "stockQuantity": quantity,
                "inStock": quantity > 0,
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceChangeKind {
    Percentage,
    Fixed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PriceChange {
    #[serde(rename = "type")]
    pub kind: PriceChangeKind,
    pub value: f64,
}

/// Reprices the given products in one batch. Unknown ids are skipped
/// rather than failing the whole run; prices land rounded to cents.
pub async fn bulk_update_prices(
    store: &Store,
    product_ids: &[String],
    change: &PriceChange,
) -> StoreResult<()> {
    let mut writes = Vec::new();
    for product_id in product_ids {
        let product = match fetch_product(store, product_id).await? {
            Some(p) => p,
            None => continue,
        };
        let new_price = match change.kind {
            PriceChangeKind::Percentage => product.price * (1.0 + change.value / 100.0),
            PriceChangeKind::Fixed => product.price + change.value,
        };
        writes.push(BatchWrite {
            collection: "products".to_string(),
            id: product_id.clone(),
            fields: doc! {
                "price": (new_price * 100.0).round() / 100.0,
                "updatedAt": BsonDateTime::now(),
            },
        });
    }
    store.batch_update(writes).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecFieldKind {
    Text,
    Select,
    Number,
}

impl SpecFieldKind {
    fn parse(value: &str) -> Self {
        match value {
            "select" => SpecFieldKind::Select,
            "number" => SpecFieldKind::Number,
            _ => SpecFieldKind::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecificationField {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub kind: SpecFieldKind,
    pub options: Option<Vec<String>>,
    pub required: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductCategory {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub sort_order: i64,
    pub is_active: bool,
    pub specification_fields: Option<Vec<SpecificationField>>,
}

pub fn transform_category(id: &str, data: &Document) -> ProductCategory {
    let specification_fields = data.get_array("specificationFields").ok().map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_document())
            .map(|f| SpecificationField {
                key: str_field(f, &["key"], ""),
                label: str_field(f, &["label"], ""),
                kind: SpecFieldKind::parse(f.get_str("type").unwrap_or("")),
                options: f.get_array("options").ok().map(|opts| {
                    opts.iter()
                        .filter_map(|o| o.as_str().map(|s| s.to_string()))
                        .collect()
                }),
                required: opt_bool_field(f, &["required"]),
            })
            .collect()
    });

    ProductCategory {
        id: id.to_string(),
        name: str_field(data, &["name"], ""),
        description: opt_str_field(data, &["description"]),
        icon: opt_str_field(data, &["icon"]),
        sort_order: int_field(data, &["sortOrder"], 0),
        is_active: bool_field(data, &["isActive"], true),
        specification_fields,
    }
}

pub async fn fetch_categories(store: &Store) -> StoreResult<Vec<ProductCategory>> {
    let query = StoreQuery::new().order_asc("sortOrder");
    let docs = store.list("product_categories", &query).await?;
    Ok(docs
        .iter()
        .map(|d| transform_category(&doc_id(d), d))
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub sort_order: Option<i64>,
    pub is_active: Option<bool>,
}

fn category_doc(req: &CategoryRequest) -> Document {
    let mut out = Document::new();
    if let Some(name) = &req.name {
        out.insert("name", name);
    }
    if let Some(description) = &req.description {
        out.insert("description", description);
    }
    if let Some(icon) = &req.icon {
        out.insert("icon", icon);
    }
    if let Some(sort_order) = req.sort_order {
        out.insert("sortOrder", sort_order);
    }
    if let Some(is_active) = req.is_active {
        out.insert("isActive", is_active);
    }
    out
}

pub async fn add_category(store: &Store, req: &CategoryRequest) -> StoreResult<String> {
    store.create("product_categories", category_doc(req)).await
}

pub async fn update_category_fields(
    store: &Store,
    category_id: &str,
    req: &CategoryRequest,
) -> StoreResult<bool> {
    store
        .update("product_categories", category_id, category_doc(req))
        .await
}

pub async fn remove_category(store: &Store, category_id: &str) -> StoreResult<bool> {
    store.delete("product_categories", category_id).await
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryStats {
    pub total_products: i64,
    pub in_stock: i64,
    pub out_of_stock: i64,
    pub low_stock: i64,
    pub total_value: f64,
    pub by_category: HashMap<String, i64>,
}

pub async fn compute_inventory_stats(store: &Store) -> StoreResult<InventoryStats> {
    let products = fetch_products(store, &ProductFilters::default()).await?;

    let mut by_category: HashMap<String, i64> = HashMap::new();
    for product in &products {
        *by_category.entry(product.category.clone()).or_insert(0) += 1;
    }

    Ok(InventoryStats {
        total_products: products.len() as i64,
        in_stock: products.iter().filter(|p| p.in_stock).count() as i64,
        out_of_stock: products.iter().filter(|p| !p.in_stock).count() as i64,
        low_stock: products
            .iter()
            .filter(|p| p.stock_quantity > 0 && p.stock_quantity <= LOW_STOCK_THRESHOLD)
            .count() as i64,
        total_value: products
            .iter()
            .map(|p| p.price * p.stock_quantity as f64)
            .sum(),
        by_category,
    })
}

/// Products running low but not yet out. Zero-stock items belong to
/// `outOfStock`, not here.
pub async fn fetch_low_stock_products(
    store: &Store,
    threshold: i64,
) -> StoreResult<Vec<Product>> {
    let mut products = fetch_products(store, &ProductFilters::default()).await?;
    products.retain(|p| p.stock_quantity <= threshold && p.stock_quantity > 0);
    Ok(products)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductListQuery {
    pub category: Option<String>,
    pub brand: Option<String>,
    pub in_stock: Option<bool>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

pub async fn list_products(
    data: web::Data<AppState>,
    query: web::Query<ProductListQuery>,
) -> impl Responder {
    let filters = ProductFilters {
        category: query.category.clone(),
        brand: query.brand.clone(),
        in_stock: query.in_stock,
        min_price: query.min_price,
        max_price: query.max_price,
    };
    match fetch_products(&data.store, &filters).await {
        Ok(products) => HttpResponse::Ok().json(products),
        Err(e) => {
            error!("Error fetching products: {}", e);
            HttpResponse::InternalServerError().body("Error fetching products")
        }
    }
}

pub async fn get_product(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let product_id = path.into_inner();
    match fetch_product(&data.store, &product_id).await {
        Ok(Some(product)) => HttpResponse::Ok().json(product),
        Ok(None) => HttpResponse::NotFound().body("Product not found"),
        Err(e) => {
            error!("Error fetching product {}: {}", product_id, e);
            HttpResponse::InternalServerError().body("Error fetching product")
        }
    }
}

pub async fn create_product(
    data: web::Data<AppState>,
    payload: web::Json<CreateProductRequest>,
) -> impl Responder {
    match add_product(&data.store, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error creating product: {}", e);
            HttpResponse::InternalServerError().body("Error creating product")
        }
    }
}

pub async fn update_product(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateProductRequest>,
) -> impl Responder {
    let product_id = path.into_inner();
    match update_product_fields(&data.store, &product_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("Product updated"),
        Ok(false) => HttpResponse::NotFound().body("Product not found"),
        Err(e) => {
            error!("Error updating product {}: {}", product_id, e);
            HttpResponse::InternalServerError().body("Error updating product")
        }
    }
}

pub async fn delete_product(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let product_id = path.into_inner();
    match remove_product(&data.store, &product_id).await {
        Ok(true) => HttpResponse::Ok().body("Product deleted"),
        Ok(false) => HttpResponse::NotFound().body("Product not found"),
        Err(e) => {
            error!("Error deleting product {}: {}", product_id, e);
            HttpResponse::InternalServerError().body("Error deleting product")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateStockRequest {
    pub quantity: i64,
}

pub async fn update_product_stock(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateStockRequest>,
) -> impl Responder {
    let product_id = path.into_inner();
    match set_stock(&data.store, &product_id, payload.quantity).await {
        Ok(true) => HttpResponse::Ok().body("Stock updated"),
        Ok(false) => HttpResponse::NotFound().body("Product not found"),
        Err(e) => {
            error!("Error updating stock for {}: {}", product_id, e);
            HttpResponse::InternalServerError().body("Error updating stock")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkPriceRequest {
    pub product_ids: Vec<String>,
    pub price_change: PriceChange,
}

pub async fn bulk_update_product_prices(
    data: web::Data<AppState>,
    payload: web::Json<BulkPriceRequest>,
) -> impl Responder {
    match bulk_update_prices(&data.store, &payload.product_ids, &payload.price_change).await {
        Ok(()) => HttpResponse::Ok().body("Prices updated"),
        Err(e) => {
            error!("Error updating prices: {}", e);
            HttpResponse::InternalServerError().body("Error updating prices")
        }
    }
}

pub async fn list_categories(data: web::Data<AppState>) -> impl Responder {
    match fetch_categories(&data.store).await {
        Ok(categories) => HttpResponse::Ok().json(categories),
        Err(e) => {
            error!("Error fetching categories: {}", e);
            HttpResponse::InternalServerError().body("Error fetching categories")
        }
    }
}

pub async fn create_category(
    data: web::Data<AppState>,
    payload: web::Json<CategoryRequest>,
) -> impl Responder {
    match add_category(&data.store, &payload).await {
        Ok(id) => HttpResponse::Ok().json(serde_json::json!({ "id": id })),
        Err(e) => {
            error!("Error creating category: {}", e);
            HttpResponse::InternalServerError().body("Error creating category")
        }
    }
}

pub async fn update_category(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<CategoryRequest>,
) -> impl Responder {
    let category_id = path.into_inner();
    match update_category_fields(&data.store, &category_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("Category updated"),
        Ok(false) => HttpResponse::NotFound().body("Category not found"),
        Err(e) => {
            error!("Error updating category {}: {}", category_id, e);
            HttpResponse::InternalServerError().body("Error updating category")
        }
    }
}

pub async fn delete_category(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let category_id = path.into_inner();
    match remove_category(&data.store, &category_id).await {
        Ok(true) => HttpResponse::Ok().body("Category deleted"),
        Ok(false) => HttpResponse::NotFound().body("Category not found"),
        Err(e) => {
            error!("Error deleting category {}: {}", category_id, e);
            HttpResponse::InternalServerError().body("Error deleting category")
        }
    }
}

pub async fn get_inventory_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_inventory_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing inventory stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing inventory stats")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LowStockQuery {
    pub threshold: Option<i64>,
}

pub async fn list_low_stock_products(
    data: web::Data<AppState>,
    query: web::Query<LowStockQuery>,
) -> impl Responder {
    let threshold = query.threshold.unwrap_or(LOW_STOCK_THRESHOLD);
    match fetch_low_stock_products(&data.store, threshold).await {
        Ok(products) => HttpResponse::Ok().json(products),
        Err(e) => {
            error!("Error fetching low stock products: {}", e);
            HttpResponse::InternalServerError().body("Error fetching low stock products")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn transform_resolves_legacy_catalog_fields() {
        let product = transform_product(
            "p1",
            &doc! {
                "name": "Brake Pads",
                "stock": 4_i64,
                "images": ["a.jpg", "b.jpg"],
                "specs": { "material": "ceramic" },
                "compatibility": ["Myvi", "Axia"],
            },
        );
        assert_eq!(product.stock_quantity, 4);
        assert_eq!(product.image_urls, vec!["a.jpg", "b.jpg"]);
        assert_eq!(product.specifications.get("material").unwrap(), "ceramic");
        assert_eq!(product.compatible_with, vec!["Myvi", "Axia"]);
        // No explicit flag, so availability follows the count.
        assert!(product.in_stock);

        let empty_wins = transform_product(
            "p2",
            &doc! { "imageUrls": [], "images": ["legacy.jpg"] },
        );
        assert!(empty_wins.image_urls.is_empty());
    }

    #[test]
    fn explicit_in_stock_flag_overrides_count() {
        let product = transform_product(
            "p1",
            &doc! { "inStock": false, "stockQuantity": 12_i64 },
        );
        assert!(!product.in_stock);
        assert_eq!(product.stock_quantity, 12);
    }

    #[tokio::test]
    async fn filters_combine_category_brand_and_price() {
        let store = Store::memory();
        store
            .create(
                "products",
                doc! { "name": "Oil Filter", "category": "Filters", "brand": "Bosch",
                       "price": 25.0, "stockQuantity": 3_i64 },
            )
            .await
            .unwrap();
        store
            .create(
                "products",
                doc! { "name": "Air Filter", "category": "Filters", "brand": "Denso",
                       "price": 80.0, "stockQuantity": 5_i64 },
            )
            .await
            .unwrap();
        store
            .create(
                "products",
                doc! { "name": "Battery", "category": "Battery", "brand": "Bosch",
                       "price": 300.0, "stockQuantity": 2_i64 },
            )
            .await
            .unwrap();

        let filters = ProductFilters {
            category: Some("Filters".into()),
            brand: Some("Bosch".into()),
            max_price: Some(50.0),
            ..Default::default()
        };
        let products = fetch_products(&store, &filters).await.unwrap();
        assert_eq!(products.len(), 1);
        assert_eq!(products[0].name, "Oil Filter");
    }

    #[tokio::test]
    async fn stock_updates_keep_the_flag_in_sync() {
        let store = Store::memory();
        let id = store
            .create("products", doc! { "stockQuantity": 5_i64, "inStock": true })
            .await
            .unwrap();

        set_stock(&store, &id, 0).await.unwrap();
        let doc = store.get("products", &id).await.unwrap().unwrap();
        assert!(!doc.get_bool("inStock").unwrap());

        set_stock(&store, &id, 7).await.unwrap();
        let doc = store.get("products", &id).await.unwrap().unwrap();
        assert!(doc.get_bool("inStock").unwrap());
        assert_eq!(doc.get_i64("stockQuantity").unwrap(), 7);
    }

    #[tokio::test]
    async fn bulk_reprice_rounds_and_skips_missing() {
        let store = Store::memory();
        let a = store
            .create("products", doc! { "price": 9.99 })
            .await
            .unwrap();
        let b = store
            .create("products", doc! { "price": 100.0 })
            .await
            .unwrap();

        let ids = vec![a.clone(), "missing".to_string(), b.clone()];
        bulk_update_prices(
            &store,
            &ids,
            &PriceChange { kind: PriceChangeKind::Percentage, value: 10.0 },
        )
        .await
        .unwrap();

        let doc_a = store.get("products", &a).await.unwrap().unwrap();
        assert_eq!(doc_a.get_f64("price").unwrap(), 10.99);
        let doc_b = store.get("products", &b).await.unwrap().unwrap();
        assert_eq!(doc_b.get_f64("price").unwrap(), 110.0);

        bulk_update_prices(
            &store,
            &[b.clone()],
            &PriceChange { kind: PriceChangeKind::Fixed, value: -10.0 },
        )
        .await
        .unwrap();
        let doc_b = store.get("products", &b).await.unwrap().unwrap();
        assert_eq!(doc_b.get_f64("price").unwrap(), 100.0);
    }

    #[tokio::test]
    async fn inventory_stats_cover_value_and_low_stock() {
        let store = Store::memory();
        store
            .create(
                "products",
                doc! { "category": "Filters", "price": 10.0, "stockQuantity": 5_i64 },
            )
            .await
            .unwrap();
        store
            .create(
                "products",
                doc! { "category": "Filters", "price": 20.0, "stockQuantity": 0_i64 },
            )
            .await
            .unwrap();
        store
            .create(
                "products",
                doc! { "category": "Battery", "price": 200.0, "stockQuantity": 15_i64 },
            )
            .await
            .unwrap();

        let stats = compute_inventory_stats(&store).await.unwrap();
        assert_eq!(stats.total_products, 3);
        assert_eq!(stats.in_stock, 2);
        assert_eq!(stats.out_of_stock, 1);
        assert_eq!(stats.low_stock, 1);
        assert_eq!(stats.total_value, 10.0 * 5.0 + 200.0 * 15.0);
        assert_eq!(*stats.by_category.get("Filters").unwrap(), 2);
    }

    #[tokio::test]
    async fn low_stock_excludes_zero_and_includes_threshold() {
        let store = Store::memory();
        store
            .create("products", doc! { "name": "empty", "stockQuantity": 0_i64 })
            .await
            .unwrap();
        store
            .create("products", doc! { "name": "edge", "stockQuantity": 10_i64 })
            .await
            .unwrap();
        store
            .create("products", doc! { "name": "plenty", "stockQuantity": 11_i64 })
            .await
            .unwrap();

        let low = fetch_low_stock_products(&store, LOW_STOCK_THRESHOLD).await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].name, "edge");
    }

    #[tokio::test]
    async fn categories_come_back_in_sort_order() {
        let store = Store::memory();
        store
            .create(
                "product_categories",
                doc! { "name": "Tires", "sortOrder": 3_i64 },
            )
            .await
            .unwrap();
        store
            .create(
                "product_categories",
                doc! { "name": "Oil", "sortOrder": 1_i64 },
            )
            .await
            .unwrap();
        store
            .create(
                "product_categories",
                doc! { "name": "Brakes", "sortOrder": 2_i64 },
            )
            .await
            .unwrap();

        let categories = fetch_categories(&store).await.unwrap();
        let names: Vec<&str> = categories.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Oil", "Brakes", "Tires"]);
        assert!(categories[0].is_active);
    }
}
