// src/store.rs

use futures_util::{StreamExt, TryStreamExt};
use log::{error, warn};
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection, Database};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub type StoreResult<T> = Result<T, mongodb::error::Error>;

/// One filter condition. Predicates are kept as data so the same query can
/// run server-side (as a Mongo filter) or client-side against raw documents,
/// which keeps the fallback path equivalent to the indexed path.
#[derive(Debug, Clone)]
pub enum Predicate {
    Eq(String, Bson),
    In(String, Vec<Bson>),
    Gte(String, Bson),
    Lte(String, Bson),
    Lt(String, Bson),
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    pub predicates: Vec<Predicate>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_asc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending: false,
        });
        self
    }

    pub fn order_desc(mut self, field: &str) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            descending: true,
        });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Mongo filter document. Range operators on the same field are merged
    /// into one operator document.
    pub fn to_filter(&self) -> Document {
        let mut filter = Document::new();
        for predicate in &self.predicates {
            match predicate {
                Predicate::Eq(field, value) => {
                    filter.insert(field.clone(), value.clone());
                }
                Predicate::In(field, values) => {
                    filter.insert(field.clone(), doc! { "$in": values.clone() });
                }
                Predicate::Gte(field, value) => merge_op(&mut filter, field, "$gte", value.clone()),
                Predicate::Lte(field, value) => merge_op(&mut filter, field, "$lte", value.clone()),
                Predicate::Lt(field, value) => merge_op(&mut filter, field, "$lt", value.clone()),
            }
        }
        filter
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.predicates.iter().all(|predicate| match predicate {
            Predicate::Eq(field, value) => doc.get(field) == Some(value),
            Predicate::In(field, values) => {
                doc.get(field).map_or(false, |v| values.contains(v))
            }
            Predicate::Gte(field, value) => doc
                .get(field)
                .map_or(false, |v| compare_bson(v, value) != Ordering::Less),
            Predicate::Lte(field, value) => doc
                .get(field)
                .map_or(false, |v| compare_bson(v, value) != Ordering::Greater),
            Predicate::Lt(field, value) => doc
                .get(field)
                .map_or(false, |v| compare_bson(v, value) == Ordering::Less),
        })
    }

    /// Client-side rendition of the query: filter, then sort, then limit.
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
        if let Some(order) = &self.order_by {
            out.sort_by(|a, b| {
                let ord = compare_optional_bson(a.get(&order.field), b.get(&order.field));
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }
        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }
}

fn merge_op(filter: &mut Document, field: &str, op: &str, value: Bson) {
    match filter.get_mut(field) {
        Some(Bson::Document(ops)) => {
            ops.insert(op, value);
        }
        _ => {
            let mut ops = Document::new();
            ops.insert(op, value);
            filter.insert(field, ops);
        }
    }
}

/// Total order over the BSON values this store actually sorts on. Mixed
/// types fall back to a fixed type rank, close to Mongo's comparison order.
pub fn compare_bson(a: &Bson, b: &Bson) -> Ordering {
    if let (Bson::DateTime(x), Bson::DateTime(y)) = (a, b) {
        return x.cmp(y);
    }
    if let (Some(x), Some(y)) = (numeric_value(a), numeric_value(b)) {
        return x.partial_cmp(&y).unwrap_or(Ordering::Equal);
    }
    if let (Bson::String(x), Bson::String(y)) = (a, b) {
        return x.cmp(y);
    }
    if let (Bson::Boolean(x), Bson::Boolean(y)) = (a, b) {
        return x.cmp(y);
    }
    type_rank(a).cmp(&type_rank(b))
}

fn compare_optional_bson(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => compare_bson(x, y),
    }
}

fn numeric_value(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(n) => Some(*n),
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        _ => None,
    }
}

fn type_rank(value: &Bson) -> u8 {
    match value {
        Bson::Null => 0,
        Bson::Double(_) | Bson::Int32(_) | Bson::Int64(_) => 1,
        Bson::String(_) => 2,
        Bson::Document(_) => 3,
        Bson::Array(_) => 4,
        Bson::Boolean(_) => 5,
        Bson::DateTime(_) => 6,
        Bson::Timestamp(_) => 7,
        _ => 8,
    }
}

/// One `$set` write inside a batch.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub collection: String,
    pub id: String,
    pub fields: Document,
}

/// A live query. Yields the full matching set on every change; the backing
/// task is cancelled when the subscription is dropped.
pub struct Subscription {
    receiver: mpsc::Receiver<Vec<Document>>,
    task: JoinHandle<()>,
}

impl Subscription {
    pub async fn next(&mut self) -> Option<Vec<Document>> {
        self.receiver.recv().await
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub enum Store {
    Mongo(MongoStore),
    Memory(MemoryStore),
}

impl Store {
    /// The literal uri `memory` selects the in-process backend, for local
    /// runs without a database.
    pub async fn connect(uri: &str, db_name: &str) -> Self {
        if uri == "memory" {
            return Store::memory();
        }
        Store::Mongo(MongoStore::init(uri, db_name).await)
    }

    pub fn memory() -> Self {
        Store::Memory(MemoryStore::new())
    }

    /// Test hook: ordered queries on the memory backend start failing, as
    /// they would on a backend without a matching index. No-op on Mongo.
    #[cfg(test)]
    pub fn set_fail_ordered(&self, fail: bool) {
        if let Store::Memory(s) = self {
            s.set_fail_ordered(fail);
        }
    }

    /// Wire name of a nested collection, `parent/{id}/child`.
    pub fn subcollection(parent: &str, id: &str, child: &str) -> String {
        format!("{}/{}/{}", parent, id, child)
    }

    pub async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        match self {
            Store::Mongo(s) => s.get(collection, id).await,
            Store::Memory(s) => s.get(collection, id),
        }
    }

    /// Backend-evaluated query. The ordered form can fail where no matching
    /// index exists; callers that need the lenient behavior go through
    /// `fetch_filtered` instead.
    pub async fn list(&self, collection: &str, query: &StoreQuery) -> StoreResult<Vec<Document>> {
        match self {
            Store::Mongo(s) => s.list(collection, query).await,
            Store::Memory(s) => s.list(collection, query),
        }
    }

    /// Unordered full scan. Never fails for index reasons.
    pub async fn list_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        match self {
            Store::Mongo(s) => s.list_all(collection).await,
            Store::Memory(s) => Ok(s.snapshot(collection)),
        }
    }

    /// Ordered query with a client-side fallback: when the backend rejects
    /// the ordered query, fetch the collection unordered and re-apply the
    /// whole query in memory. Both paths return the same documents in the
    /// same order.
    pub async fn fetch_filtered(
        &self,
        collection: &str,
        query: &StoreQuery,
    ) -> StoreResult<Vec<Document>> {
        match self.list(collection, query).await {
            Ok(docs) => Ok(docs),
            Err(e) => {
                warn!(
                    "Ordered query on {} failed, using client-side fallback: {}",
                    collection, e
                );
                let all = self.list_all(collection).await?;
                Ok(query.apply(all))
            }
        }
    }

    /// Inserts a new document and returns its generated id.
    pub async fn create(&self, collection: &str, fields: Document) -> StoreResult<String> {
        match self {
            Store::Mongo(s) => s.create(collection, fields).await,
            Store::Memory(s) => s.create(collection, fields),
        }
    }

    /// `$set` of exactly the given fields. Returns false when no document
    /// matched the id.
    pub async fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<bool> {
        match self {
            Store::Mongo(s) => s.update(collection, id, fields).await,
            Store::Memory(s) => s.update(collection, id, fields),
        }
    }

    /// Appends a value to an array field, creating the array when absent.
    pub async fn push(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<bool> {
        match self {
            Store::Mongo(s) => s.push(collection, id, field, value).await,
            Store::Memory(s) => s.push(collection, id, field, value),
        }
    }

    pub async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        match self {
            Store::Mongo(s) => s.delete(collection, id).await,
            Store::Memory(s) => s.delete(collection, id),
        }
    }

    /// Applies every write or none where the backend supports transactions;
    /// sequential best-effort otherwise.
    pub async fn batch_update(&self, writes: Vec<BatchWrite>) -> StoreResult<()> {
        match self {
            Store::Mongo(s) => s.batch_update(writes).await,
            Store::Memory(s) => s.batch_update(writes),
        }
    }

    /// Live query: pushes the initial matching set, then a fresh set each
    /// time the result actually changes.
    pub fn subscribe(&self, collection: &str, query: StoreQuery) -> Subscription {
        match self {
            Store::Mongo(s) => s.subscribe(collection, query),
            Store::Memory(s) => s.subscribe(collection, query),
        }
    }
}

pub struct MongoStore {
    pub client: Client,
    pub db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> Self {
        let client_options = ClientOptions::parse(uri)
            .await
            .expect("Failed to parse MongoDB connection string");
        let client = Client::with_options(client_options).expect("Failed to initialize client");
        let db = client.database(db_name);
        MongoStore { client, db }
    }

    fn coll(&self, name: &str) -> Collection<Document> {
        self.db.collection::<Document>(name)
    }

    async fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        self.coll(collection).find_one(doc! { "_id": id }).await
    }

    async fn list(&self, collection: &str, query: &StoreQuery) -> StoreResult<Vec<Document>> {
        run_mongo_query(&self.coll(collection), query).await
    }

    async fn list_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.coll(collection).find(doc! {}).await?.try_collect().await
    }

    async fn create(&self, collection: &str, mut fields: Document) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        fields.insert("_id", id.clone());
        self.coll(collection).insert_one(fields).await?;
        Ok(id)
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<bool> {
        let result = self
            .coll(collection)
            .update_one(doc! { "_id": id }, doc! { "$set": fields })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn push(
        &self,
        collection: &str,
        id: &str,
        field: &str,
        value: Bson,
    ) -> StoreResult<bool> {
        let mut push_doc = Document::new();
        push_doc.insert(field, value);
        let result = self
            .coll(collection)
            .update_one(doc! { "_id": id }, doc! { "$push": push_doc })
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let result = self.coll(collection).delete_one(doc! { "_id": id }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn batch_update(&self, writes: Vec<BatchWrite>) -> StoreResult<()> {
        let mut session = self.client.start_session().await?;
        if session.start_transaction().await.is_ok() {
            for write in &writes {
                self.coll(&write.collection)
                    .update_one(
                        doc! { "_id": &write.id },
                        doc! { "$set": write.fields.clone() },
                    )
                    .session(&mut session)
                    .await?;
            }
            session.commit_transaction().await?;
            return Ok(());
        }
        // Standalone deployments have no transactions; apply one by one.
        for write in writes {
            self.coll(&write.collection)
                .update_one(doc! { "_id": &write.id }, doc! { "$set": write.fields })
                .await?;
        }
        Ok(())
    }

    fn subscribe(&self, collection: &str, query: StoreQuery) -> Subscription {
        let (tx, rx) = mpsc::channel(16);
        let coll = self.coll(collection);
        let task = tokio::spawn(async move {
            let mut last = match run_mongo_query(&coll, &query).await {
                Ok(docs) => docs,
                Err(e) => {
                    error!("Initial query for {} subscription failed: {}", coll.name(), e);
                    return;
                }
            };
            if tx.send(last.clone()).await.is_err() {
                return;
            }
            let mut events = match coll.watch().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Change stream on {} unavailable: {}", coll.name(), e);
                    return;
                }
            };
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    error!("Change stream on {} ended: {}", coll.name(), e);
                    return;
                }
                match run_mongo_query(&coll, &query).await {
                    Ok(docs) => {
                        if docs != last {
                            if tx.send(docs.clone()).await.is_err() {
                                return;
                            }
                            last = docs;
                        }
                    }
                    Err(e) => {
                        error!("Re-query for {} subscription failed: {}", coll.name(), e);
                        return;
                    }
                }
            }
        });
        Subscription { receiver: rx, task }
    }
}

async fn run_mongo_query(
    coll: &Collection<Document>,
    query: &StoreQuery,
) -> StoreResult<Vec<Document>> {
    let mut find = coll.find(query.to_filter());
    if let Some(order) = &query.order_by {
        let mut sort = Document::new();
        sort.insert(order.field.clone(), if order.descending { -1 } else { 1 });
        find = find.sort(sort);
    }
    if let Some(limit) = query.limit {
        find = find.limit(limit as i64);
    }
    find.await?.try_collect().await
}

/// In-process backend with the same contract as the Mongo one. Backs the
/// test suite and can simulate the missing-index failure of ordered queries.
#[derive(Clone)]
pub struct MemoryStore {
    data: Arc<Mutex<HashMap<String, BTreeMap<String, Document>>>>,
    changes: broadcast::Sender<String>,
    fail_ordered: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        MemoryStore {
            data: Arc::new(Mutex::new(HashMap::new())),
            changes,
            fail_ordered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Makes every ordered query fail, the way a backend without a matching
    /// index would, so callers exercise the client-side fallback.
    #[cfg(test)]
    pub fn set_fail_ordered(&self, fail: bool) {
        self.fail_ordered
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    fn snapshot(&self, collection: &str) -> Vec<Document> {
        let data = self.data.lock().unwrap();
        data.get(collection)
            .map(|coll| coll.values().cloned().collect())
            .unwrap_or_default()
    }

    fn get(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(collection).and_then(|coll| coll.get(id)).cloned())
    }

    fn list(&self, collection: &str, query: &StoreQuery) -> StoreResult<Vec<Document>> {
        if query.order_by.is_some()
            && self.fail_ordered.load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(mongodb::error::Error::custom(
                "no index supports the requested order",
            ));
        }
        Ok(query.apply(self.snapshot(collection)))
    }

    fn create(&self, collection: &str, mut fields: Document) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        fields.insert("_id", id.clone());
        {
            let mut data = self.data.lock().unwrap();
            data.entry(collection.to_string())
                .or_default()
                .insert(id.clone(), fields);
        }
        let _ = self.changes.send(collection.to_string());
        Ok(id)
    }

    fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<bool> {
        let matched = {
            let mut data = self.data.lock().unwrap();
            match data.get_mut(collection).and_then(|coll| coll.get_mut(id)) {
                Some(doc) => {
                    for (key, value) in fields {
                        doc.insert(key, value);
                    }
                    true
                }
                None => false,
            }
        };
        if matched {
            let _ = self.changes.send(collection.to_string());
        }
        Ok(matched)
    }

    fn push(&self, collection: &str, id: &str, field: &str, value: Bson) -> StoreResult<bool> {
        let matched = {
            let mut data = self.data.lock().unwrap();
            match data.get_mut(collection).and_then(|coll| coll.get_mut(id)) {
                Some(doc) => {
                    match doc.get_mut(field) {
                        Some(Bson::Array(items)) => items.push(value),
                        _ => {
                            doc.insert(field, Bson::Array(vec![value]));
                        }
                    }
                    true
                }
                None => false,
            }
        };
        if matched {
            let _ = self.changes.send(collection.to_string());
        }
        Ok(matched)
    }

    fn delete(&self, collection: &str, id: &str) -> StoreResult<bool> {
        let removed = {
            let mut data = self.data.lock().unwrap();
            data.get_mut(collection)
                .and_then(|coll| coll.remove(id))
                .is_some()
        };
        if removed {
            let _ = self.changes.send(collection.to_string());
        }
        Ok(removed)
    }

    fn batch_update(&self, writes: Vec<BatchWrite>) -> StoreResult<()> {
        for write in writes {
            self.update(&write.collection, &write.id, write.fields)?;
        }
        Ok(())
    }

    fn subscribe(&self, collection: &str, query: StoreQuery) -> Subscription {
        let (tx, rx) = mpsc::channel(16);
        let mut changes = self.changes.subscribe();
        let store = self.clone();
        let collection = collection.to_string();
        let task = tokio::spawn(async move {
            let mut last = query.apply(store.snapshot(&collection));
            if tx.send(last.clone()).await.is_err() {
                return;
            }
            loop {
                let refresh = match changes.recv().await {
                    Ok(changed) => changed == collection,
                    // Dropped events still warrant a re-check.
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if !refresh {
                    continue;
                }
                let docs = query.apply(store.snapshot(&collection));
                if docs != last {
                    if tx.send(docs.clone()).await.is_err() {
                        return;
                    }
                    last = docs;
                }
            }
        });
        Subscription { receiver: rx, task }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}
