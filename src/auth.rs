// src/auth.rs

use actix_web::{web, HttpResponse, Responder};
use bcrypt::verify;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::error;
use mongodb::bson::Bson;
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::normalize::{doc_id, str_field};
use crate::store::{Predicate, Store, StoreQuery, StoreResult};
use crate::users::UserRole;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: String,
    pub exp: usize,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUser {
    pub uid: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug)]
pub enum LoginOutcome {
    Success(Box<LoginResponse>),
    InvalidCredentials,
    NotAdmin,
}

// JWT creation
pub fn create_jwt(user_id: &str, role: UserRole, secret: &str) -> String {
    let expiration = Utc::now() + Duration::hours(24);
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.as_str().to_string(),
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref())).unwrap()
}

// JWT validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

/// Email + password check against the users collection. Only dashboard
/// roles get a token; everyone else is turned away before a session
/// exists at all.
pub async fn authenticate(
    store: &Store,
    email: &str,
    password: &str,
    secret: &str,
) -> StoreResult<LoginOutcome> {
    let query = StoreQuery::new()
        .filter(Predicate::Eq(
            "email".to_string(),
            Bson::String(email.to_string()),
        ))
        .limit(1);
    let docs = store.list("users", &query).await?;
    let Some(user_doc) = docs.into_iter().next() else {
        return Ok(LoginOutcome::InvalidCredentials);
    };

    let password_hash = str_field(&user_doc, &["passwordHash"], "");
    if password_hash.is_empty() || !verify(password, &password_hash).unwrap_or(false) {
        return Ok(LoginOutcome::InvalidCredentials);
    }

    let role = UserRole::parse(&str_field(&user_doc, &["role"], "user"));
    if !role.is_admin_role() {
        return Ok(LoginOutcome::NotAdmin);
    }

    let uid = doc_id(&user_doc);
    let token = create_jwt(&uid, role, secret);
    Ok(LoginOutcome::Success(Box::new(LoginResponse {
        token,
        user: LoginUser {
            uid,
            email: str_field(&user_doc, &["email"], ""),
            name: str_field(&user_doc, &["name", "displayName"], "User"),
            role,
        },
    })))
}

// Login endpoint
pub async fn login(data: web::Data<AppState>, payload: web::Json<LoginRequest>) -> impl Responder {
    match authenticate(
        &data.store,
        &payload.email,
        &payload.password,
        &data.config.jwt_secret,
    )
    .await
    {
        Ok(LoginOutcome::Success(response)) => HttpResponse::Ok().json(response),
        Ok(LoginOutcome::InvalidCredentials) => {
            HttpResponse::Unauthorized().body("Invalid credentials")
        }
        Ok(LoginOutcome::NotAdmin) => {
            HttpResponse::Unauthorized().body("Unauthorized: Admin access required")
        }
        Err(e) => {
            error!("Error logging in: {}", e);
            HttpResponse::InternalServerError().body("Error logging in")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    const SECRET: &str = "test-secret";

    fn hashed(password: &str) -> String {
        // Minimum cost keeps the suite fast.
        bcrypt::hash(password, 4).unwrap()
    }

    #[test]
    fn jwt_round_trip_carries_uid_and_role() {
        let token = create_jwt("admin-1", UserRole::Admin, SECRET);
        let claims = validate_jwt(&token, SECRET).unwrap();
        assert_eq!(claims.sub, "admin-1");
        assert_eq!(claims.role, "admin");
        assert!(claims.exp > Utc::now().timestamp() as usize);
    }

    #[test]
    fn jwt_rejects_wrong_secret_and_expired_tokens() {
        let token = create_jwt("admin-1", UserRole::Admin, SECRET);
        assert!(validate_jwt(&token, "other-secret").is_err());

        let stale = Claims {
            sub: "admin-1".to_string(),
            role: "admin".to_string(),
            exp: (Utc::now() - Duration::hours(1)).timestamp() as usize,
        };
        let expired = encode(
            &Header::default(),
            &stale,
            &EncodingKey::from_secret(SECRET.as_ref()),
        )
        .unwrap();
        assert!(validate_jwt(&expired, SECRET).is_err());
    }

    #[tokio::test]
    async fn authenticate_issues_a_token_for_admin_roles() {
        let store = Store::memory();
        store
            .create(
                "users",
                doc! {
                    "email": "nadia@byki.my",
                    "name": "Nadia",
                    "role": "admin",
                    "passwordHash": hashed("s3cret"),
                },
            )
            .await
            .unwrap();

        let outcome = authenticate(&store, "nadia@byki.my", "s3cret", SECRET)
            .await
            .unwrap();
        let LoginOutcome::Success(response) = outcome else {
            panic!("expected a successful login");
        };
        assert_eq!(response.user.email, "nadia@byki.my");
        assert_eq!(response.user.name, "Nadia");
        assert_eq!(response.user.role, UserRole::Admin);

        let claims = validate_jwt(&response.token, SECRET).unwrap();
        assert_eq!(claims.sub, response.user.uid);
        assert_eq!(claims.role, "admin");
    }

    #[tokio::test]
    async fn authenticate_rejects_wrong_passwords_and_unknown_emails() {
        let store = Store::memory();
        store
            .create(
                "users",
                doc! {
                    "email": "nadia@byki.my",
                    "role": "admin",
                    "passwordHash": hashed("s3cret"),
                },
            )
            .await
            .unwrap();

        let wrong = authenticate(&store, "nadia@byki.my", "nope", SECRET)
            .await
            .unwrap();
        assert!(matches!(wrong, LoginOutcome::InvalidCredentials));

        let unknown = authenticate(&store, "ghost@byki.my", "s3cret", SECRET)
            .await
            .unwrap();
        assert!(matches!(unknown, LoginOutcome::InvalidCredentials));
    }

    #[tokio::test]
    async fn authenticate_turns_away_non_dashboard_roles() {
        let store = Store::memory();
        store
            .create(
                "users",
                doc! {
                    "email": "driver@byki.my",
                    "role": "user",
                    "passwordHash": hashed("s3cret"),
                },
            )
            .await
            .unwrap();

        let outcome = authenticate(&store, "driver@byki.my", "s3cret", SECRET)
            .await
            .unwrap();
        assert!(matches!(outcome, LoginOutcome::NotAdmin));
    }
}
