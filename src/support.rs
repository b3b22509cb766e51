// src/support.rs

use actix_web::{web, HttpResponse, Responder};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::error;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::app_state::AppState;
use crate::normalize::{
    doc_id, opt_str_field, opt_timestamp_field, str_field, str_list_field, timestamp_field,
};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketStatus {
    Open,
    InProgress,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Open => "open",
            TicketStatus::InProgress => "inProgress",
            TicketStatus::Resolved => "resolved",
            TicketStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "inProgress" => TicketStatus::InProgress,
            "resolved" => TicketStatus::Resolved,
            "closed" => TicketStatus::Closed,
            _ => TicketStatus::Open,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn parse(value: &str) -> Self {
        match value {
            "low" => TicketPriority::Low,
            "high" => TicketPriority::High,
            "urgent" => TicketPriority::Urgent,
            _ => TicketPriority::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SenderType {
    User,
    Admin,
}

impl SenderType {
    pub fn as_str(self) -> &'static str {
        match self {
            SenderType::User => "user",
            SenderType::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "admin" => SenderType::Admin,
            _ => SenderType::User,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketMessage {
    pub id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_type: SenderType,
    pub message: String,
    pub attachments: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportTicket {
    pub id: String,
    pub user_id: String,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
    pub subject: String,
    pub message: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub category: Option<String>,
    pub assigned_to: Option<String>,
    pub messages: Option<Vec<TicketMessage>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

pub fn transform_ticket(id: &str, data: &Document) -> SupportTicket {
    let messages = data.get_array("messages").ok().map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_document())
            .map(|m| TicketMessage {
                id: str_field(m, &["id"], ""),
                sender_id: str_field(m, &["senderId"], ""),
                sender_name: str_field(m, &["senderName"], ""),
                sender_type: SenderType::parse(m.get_str("senderType").unwrap_or("")),
                message: str_field(m, &["message"], ""),
                attachments: str_list_field(m, &["attachments"]),
                created_at: timestamp_field(m, "createdAt"),
            })
            .collect()
    });

    SupportTicket {
        id: id.to_string(),
        user_id: str_field(data, &["userId"], ""),
        user_name: opt_str_field(data, &["userName"]),
        user_email: opt_str_field(data, &["userEmail"]),
        subject: str_field(data, &["subject"], ""),
        message: str_field(data, &["message"], ""),
        status: TicketStatus::parse(data.get_str("status").unwrap_or("")),
        priority: TicketPriority::parse(data.get_str("priority").unwrap_or("")),
        category: opt_str_field(data, &["category"]),
        assigned_to: opt_str_field(data, &["assignedTo"]),
        messages,
        created_at: timestamp_field(data, "createdAt"),
        updated_at: opt_timestamp_field(data, "updatedAt"),
        resolved_at: opt_timestamp_field(data, "resolvedAt"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TicketFilters {
    pub status: Option<TicketStatus>,
    pub user_id: Option<String>,
    pub assigned_to: Option<String>,
}

pub async fn fetch_tickets(
    store: &Store,
    filters: &TicketFilters,
) -> StoreResult<Vec<SupportTicket>> {
    let mut query = StoreQuery::new().order_desc("createdAt");
    if let Some(status) = filters.status {
        query = query.filter(Predicate::Eq("status".into(), Bson::from(status.as_str())));
    }
    if let Some(user_id) = &filters.user_id {
        query = query.filter(Predicate::Eq("userId".into(), Bson::from(user_id.as_str())));
    }
    if let Some(assigned_to) = &filters.assigned_to {
        query = query.filter(Predicate::Eq(
            "assignedTo".into(),
            Bson::from(assigned_to.as_str()),
        ));
    }
    let docs = store.fetch_filtered("support_tickets", &query).await?;
    let tickets = docs
        .iter()
        .map(|d| transform_ticket(&doc_id(d), d))
        .collect();
    Ok(enrich_with_user_data(store, tickets).await)
}

pub async fn fetch_ticket(store: &Store, ticket_id: &str) -> StoreResult<Option<SupportTicket>> {
    let found = store.get("support_tickets", ticket_id).await?;
    Ok(found.map(|d| transform_ticket(ticket_id, &d)))
}

/// Entering `resolved` stamps the resolution time. Closing without
/// resolving stamps nothing.
pub async fn set_ticket_status(
    store: &Store,
    ticket_id: &str,
    status: TicketStatus,
) -> StoreResult<bool> {
    let mut update_doc = doc! {
        "status": status.as_str(),
        "updatedAt": BsonDateTime::now(),
    };
    if status == TicketStatus::Resolved {
        update_doc.insert("resolvedAt", BsonDateTime::now());
    }
    store.update("support_tickets", ticket_id, update_doc).await
}

/// Assignment always moves the ticket to in-progress.
pub async fn set_ticket_assignee(
    store: &Store,
    ticket_id: &str,
    staff_id: &str,
) -> StoreResult<bool> {
    store
        .update(
            "support_tickets",
            ticket_id,
            doc! {
                "assignedTo": staff_id,
                "status": "inProgress",
                "updatedAt": BsonDateTime::now(),
            },
        )
        .await
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReply {
    pub sender_id: String,
    pub sender_name: String,
    pub sender_type: SenderType,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Appends a reply to the ticket's message thread. The thread is
/// append-only; replies are never edited or removed.
pub async fn add_reply(store: &Store, ticket_id: &str, reply: &NewReply) -> StoreResult<bool> {
    let message = doc! {
        "id": format!("msg_{}", Utc::now().timestamp_millis()),
        "senderId": &reply.sender_id,
        "senderName": &reply.sender_name,
        "senderType": reply.sender_type.as_str(),
        "message": &reply.message,
        "attachments": reply.attachments.clone(),
        "createdAt": BsonDateTime::now(),
    };
    let matched = store
        .push("support_tickets", ticket_id, "messages", Bson::from(message))
        .await?;
    if matched {
        store
            .update(
                "support_tickets",
                ticket_id,
                doc! { "updatedAt": BsonDateTime::now() },
            )
            .await?;
    }
    Ok(matched)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketStats {
    pub total: i64,
    pub open: i64,
    pub in_progress: i64,
    pub resolved: i64,
    pub average_resolution_time: i64,
}

/// Counts over raw documents; resolved includes closed tickets, and the
/// average runs from creation to the resolution stamp, in whole hours.
pub async fn compute_ticket_stats(store: &Store) -> StoreResult<TicketStats> {
    let all = store.list_all("support_tickets").await?;

    let mut open = 0;
    let mut in_progress = 0;
    let mut resolved = 0;
    let mut resolution_hours = 0.0;
    let mut resolution_count = 0;

    for ticket in &all {
        match ticket.get_str("status").unwrap_or("") {
            "open" => open += 1,
            "inProgress" => in_progress += 1,
            "resolved" | "closed" => resolved += 1,
            _ => {}
        }
        if let (Ok(created), Ok(resolved_at)) = (
            ticket.get_datetime("createdAt"),
            ticket.get_datetime("resolvedAt"),
        ) {
            let millis = resolved_at.timestamp_millis() - created.timestamp_millis();
            resolution_hours += millis as f64 / 3_600_000.0;
            resolution_count += 1;
        }
    }

    let average_resolution_time = if resolution_count > 0 {
        (resolution_hours / resolution_count as f64).round() as i64
    } else {
        0
    };

    Ok(TicketStats {
        total: all.len() as i64,
        open,
        in_progress,
        resolved,
        average_resolution_time,
    })
}

/// Backfills contact details for tickets submitted with neither a name nor
/// an email. Tickets that carry either field are left untouched.
pub async fn enrich_with_user_data(
    store: &Store,
    mut tickets: Vec<SupportTicket>,
) -> Vec<SupportTicket> {
    let mut ids: Vec<String> = Vec::new();
    for ticket in &tickets {
        if ticket.user_name.is_none()
            && ticket.user_email.is_none()
            && !ticket.user_id.is_empty()
            && !ids.contains(&ticket.user_id)
        {
            ids.push(ticket.user_id.clone());
        }
    }
    if ids.is_empty() {
        return tickets;
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
                        opt_str_field(&user, &["email"]),
                    ),
                );
            }
            Ok(None) => {}
            Err(e) => error!("Failed to fetch user {}: {}", user_id, e),
        }
    }

    for ticket in &mut tickets {
        if ticket.user_name.is_some() || ticket.user_email.is_some() {
            continue;
        }
        if let Some((name, email)) = users.get(&ticket.user_id) {
            ticket.user_name = Some(name.clone());
            ticket.user_email = email.clone();
        }
    }
    tickets
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketListQuery {
    pub status: Option<TicketStatus>,
    pub user_id: Option<String>,
    pub assigned_to: Option<String>,
}

pub async fn list_tickets(
    data: web::Data<AppState>,
    query: web::Query<TicketListQuery>,
) -> impl Responder {
    let filters = TicketFilters {
        status: query.status,
        user_id: query.user_id.clone(),
        assigned_to: query.assigned_to.clone(),
    };
    match fetch_tickets(&data.store, &filters).await {
        Ok(tickets) => HttpResponse::Ok().json(tickets),
        Err(e) => {
            error!("Error fetching tickets: {}", e);
            HttpResponse::InternalServerError().body("Error fetching tickets")
        }
    }
}

pub async fn get_ticket(data: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let ticket_id = path.into_inner();
    match fetch_ticket(&data.store, &ticket_id).await {
        Ok(Some(ticket)) => HttpResponse::Ok().json(ticket),
        Ok(None) => HttpResponse::NotFound().body("Ticket not found"),
        Err(e) => {
            error!("Error fetching ticket {}: {}", ticket_id, e);
            HttpResponse::InternalServerError().body("Error fetching ticket")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTicketStatusRequest {
    pub status: TicketStatus,
}

pub async fn update_ticket_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<UpdateTicketStatusRequest>,
) -> impl Responder {
    let ticket_id = path.into_inner();
    match set_ticket_status(&data.store, &ticket_id, payload.status).await {
        Ok(true) => HttpResponse::Ok().body("Ticket status updated"),
        Ok(false) => HttpResponse::NotFound().body("Ticket not found"),
        Err(e) => {
            error!("Error updating ticket {}: {}", ticket_id, e);
            HttpResponse::InternalServerError().body("Error updating ticket")
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignTicketRequest {
    pub staff_id: String,
}

pub async fn assign_ticket(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<AssignTicketRequest>,
) -> impl Responder {
    let ticket_id = path.into_inner();
    match set_ticket_assignee(&data.store, &ticket_id, &payload.staff_id).await {
        Ok(true) => HttpResponse::Ok().body("Ticket assigned"),
        Ok(false) => HttpResponse::NotFound().body("Ticket not found"),
        Err(e) => {
            error!("Error assigning ticket {}: {}", ticket_id, e);
            HttpResponse::InternalServerError().body("Error assigning ticket")
        }
    }
}

pub async fn add_ticket_reply(
    data: web::Data<AppState>,
    path: web::Path<String>,
    payload: web::Json<NewReply>,
) -> impl Responder {
    let ticket_id = path.into_inner();
    match add_reply(&data.store, &ticket_id, &payload).await {
        Ok(true) => HttpResponse::Ok().body("Reply added"),
        Ok(false) => HttpResponse::NotFound().body("Ticket not found"),
        Err(e) => {
            error!("Error adding reply to ticket {}: {}", ticket_id, e);
            HttpResponse::InternalServerError().body("Error adding reply")
        }
    }
}

pub async fn get_ticket_stats(data: web::Data<AppState>) -> impl Responder {
    match compute_ticket_stats(&data.store).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            error!("Error computing ticket stats: {}", e);
            HttpResponse::InternalServerError().body("Error computing ticket stats")
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
    fn transform_defaults_and_message_parsing() {
        let bare = transform_ticket("t1", &doc! { "userId": "u1" });
        assert_eq!(bare.status, TicketStatus::Open);
        assert_eq!(bare.priority, TicketPriority::Medium);
        assert!(bare.messages.is_none());
        assert!(bare.updated_at.is_none());

        let with_thread = transform_ticket(
            "t2",
            &doc! {
                "messages": [
                    { "id": "msg_1", "senderId": "u1", "senderName": "Aina",
                      "senderType": "user", "message": "My car broke down",
                      "createdAt": bson_date(Utc::now()) },
                ],
            },
        );
        let messages = with_thread.messages.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].sender_type, SenderType::User);
    }

    #[tokio::test]
    async fn resolving_stamps_resolved_at_but_closing_does_not() {
        let store = Store::memory();
        let id = store
            .create("support_tickets", doc! { "status": "open" })
            .await
            .unwrap();

        set_ticket_status(&store, &id, TicketStatus::Closed).await.unwrap();
        let doc = store.get("support_tickets", &id).await.unwrap().unwrap();
        assert!(doc.get_datetime("resolvedAt").is_err());

        set_ticket_status(&store, &id, TicketStatus::Resolved).await.unwrap();
        let doc = store.get("support_tickets", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("status").unwrap(), "resolved");
        assert!(doc.get_datetime("resolvedAt").is_ok());
    }

    #[tokio::test]
    async fn assignment_forces_in_progress() {
        let store = Store::memory();
        let id = store
            .create("support_tickets", doc! { "status": "open" })
            .await
            .unwrap();
        set_ticket_assignee(&store, &id, "staff-7").await.unwrap();
        let doc = store.get("support_tickets", &id).await.unwrap().unwrap();
        assert_eq!(doc.get_str("assignedTo").unwrap(), "staff-7");
        assert_eq!(doc.get_str("status").unwrap(), "inProgress");
    }

    #[tokio::test]
    async fn replies_append_to_the_thread() {
        let store = Store::memory();
        let id = store
            .create("support_tickets", doc! { "status": "open" })
            .await
            .unwrap();

        let reply = NewReply {
            sender_id: "staff-1".into(),
            sender_name: "Support".into(),
            sender_type: SenderType::Admin,
            message: "We are on it".into(),
            attachments: vec![],
        };
        assert!(add_reply(&store, &id, &reply).await.unwrap());
        assert!(add_reply(&store, &id, &reply).await.unwrap());

        let doc = store.get("support_tickets", &id).await.unwrap().unwrap();
        let messages = doc.get_array("messages").unwrap();
        assert_eq!(messages.len(), 2);
        let first = messages[0].as_document().unwrap();
        assert!(first.get_str("id").unwrap().starts_with("msg_"));
        assert!(doc.get_datetime("updatedAt").is_ok());

        assert!(!add_reply(&store, "missing", &reply).await.unwrap());
    }

    #[tokio::test]
    async fn enrichment_requires_both_contact_fields_missing() {
        let store = Store::memory();
        let user_id = store
            .create(
                "users",
                doc! { "name": "Farid", "email": "farid@example.com" },
            )
            .await
            .unwrap();

        let tickets = vec![
            transform_ticket("t1", &doc! { "userId": user_id.as_str() }),
            transform_ticket(
                "t2",
                &doc! { "userId": user_id.as_str(), "userName": "Known" },
            ),
        ];
        let enriched = enrich_with_user_data(&store, tickets).await;
        assert_eq!(enriched[0].user_name.as_deref(), Some("Farid"));
        assert_eq!(enriched[0].user_email.as_deref(), Some("farid@example.com"));
        // A ticket with a name keeps its missing email.
        assert!(enriched[1].user_email.is_none());
    }

    #[tokio::test]
    async fn stats_average_resolution_in_hours() {
        let store = Store::memory();
        let now = Utc::now();
        store
            .create(
                "support_tickets",
                doc! { "status": "resolved",
                       "createdAt": bson_date(now - Duration::hours(10)),
                       "resolvedAt": bson_date(now - Duration::hours(6)) },
            )
            .await
            .unwrap();
        store
            .create(
                "support_tickets",
                doc! { "status": "closed",
                       "createdAt": bson_date(now - Duration::hours(8)),
                       "resolvedAt": bson_date(now - Duration::hours(6)) },
            )
            .await
            .unwrap();
        store
            .create("support_tickets", doc! { "status": "open" })
            .await
            .unwrap();

        let stats = compute_ticket_stats(&store).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.open, 1);
        assert_eq!(stats.resolved, 2);
        // (4 + 2) / 2
        assert_eq!(stats.average_resolution_time, 3);
    }
}
