use actix_web::{web, HttpRequest, HttpResponse};
use bcrypt::{hash, verify};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{error, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{AppError, AppResult};
use crate::models::user::{CredentialRecord, UserProfile, UserProfileRecord};
use crate::models::{bson_now, decode as decode_doc, encode as encode_doc};
use crate::session::{current_identity, Identity, SessionEvent};
use crate::store::{DocumentStore, Query, CREDENTIALS, USERS};

const MIN_PASSWORD_LEN: usize = 6;
const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    pub email: String,
    pub exp: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupInfo {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    #[serde(default)]
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginInfo {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SignedIn {
    pub token: String,
    pub user: Identity,
}

// Token signing failures are server errors.
fn token_error(e: jsonwebtoken::errors::Error) -> AppError {
    error!("Error encoding token: {}", e);
    AppError::Internal(format!("Could not issue token: {}", e))
}

// JWT Creation
pub fn create_jwt(identity: &Identity, secret: &str, ttl_hours: i64) -> AppResult<String> {
    let expiration = Utc::now() + Duration::hours(ttl_hours);
    let claims = Claims {
        sub: identity.uid.clone(),
        name: identity.display_name.clone(),
        email: identity.email.clone(),
        exp: expiration.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref()))
        .map_err(token_error)
}

// JWT Validation
pub fn validate_jwt(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::default(),
    )?;
    Ok(token_data.claims)
}

fn is_valid_email(email: &str) -> bool {
    Regex::new(EMAIL_PATTERN)
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

/// Creates the credential and the profile document; returns the new uid.
/// The two writes are independent: a failed profile write leaves a
/// credential that cannot sign in.
pub async fn register(store: &dyn DocumentStore, bcrypt_cost: u32, info: &SignupInfo) -> AppResult<String> {
    let email = info.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation("Please enter a valid email address".to_string()));
    }
    if info.password != info.confirm_password {
        return Err(AppError::Validation("Passwords do not match".to_string()));
    }
    if info.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::Validation(format!(
            "Password should be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let existing = store.query(CREDENTIALS, Query::new().eq("email", email.as_str())).await?;
    if !existing.is_empty() {
        return Err(AppError::Conflict("Email already in use".to_string()));
    }

    let password_hash = hash(&info.password, bcrypt_cost).map_err(|e| {
        error!("Error hashing password: {}", e);
        AppError::Internal("Error hashing password".to_string())
    })?;

    let uid = Uuid::new_v4().to_string();
    let credential = CredentialRecord {
        uid: uid.clone(),
        email: email.clone(),
        password_hash,
        created_at: bson_now(),
    };
    store.insert(CREDENTIALS, encode_doc(&credential)?).await?;

    let profile = UserProfileRecord {
        uid: uid.clone(),
        email,
        full_name: info.full_name.trim().to_string(),
        joined_groups: Vec::new(),
        created_at: bson_now(),
    };
    store.put(USERS, &uid, encode_doc(&profile)?).await?;

    info!("Registered user {}", uid);
    Ok(uid)
}

/// Checks the password and loads the profile behind the credential.
pub async fn sign_in(store: &dyn DocumentStore, info: &LoginInfo) -> AppResult<Identity> {
    let email = info.email.trim().to_lowercase();
    let invalid = || AppError::Unauthorized("Invalid email or password".to_string());

    let credential: CredentialRecord = match store
        .query(CREDENTIALS, Query::new().eq("email", email.as_str()))
        .await?
        .into_iter()
        .next()
    {
        Some(doc) => decode_doc(doc)?,
        None => return Err(invalid()),
    };
    if !verify(&info.password, &credential.password_hash).unwrap_or(false) {
        return Err(invalid());
    }

    let profile: UserProfileRecord = match store.get(USERS, &credential.uid).await? {
        Some(doc) => decode_doc(doc)?,
        None => {
            warn!("Credential {} has no profile document", credential.uid);
            return Err(AppError::NotFound("User data not found".to_string()));
        }
    };

    let display_name = if profile.full_name.trim().is_empty() {
        "Anonymous".to_string()
    } else {
        profile.full_name
    };
    Ok(Identity {
        uid: credential.uid,
        display_name,
        email: credential.email,
    })
}

/// Deletes the profile, then the credential. Groups and messages the user
/// authored are left in place.
pub async fn delete_account(store: &dyn DocumentStore, uid: &str) -> AppResult<()> {
    store.delete(USERS, uid).await?;
    store.delete(CREDENTIALS, uid).await?;
    info!("Deleted account {}", uid);
    Ok(())
}

pub async fn load_profile(store: &dyn DocumentStore, uid: &str) -> AppResult<Option<UserProfile>> {
    match store.get(USERS, uid).await? {
        Some(doc) => Ok(Some(decode_doc::<UserProfileRecord>(doc)?.into())),
        None => Ok(None),
    }
}

// ─── HANDLERS ──────────────────────────────────────────────────────────────────

// POST /auth/signup
pub async fn signup(
    data: web::Data<AppState>,
    signup_info: web::Json<SignupInfo>,
) -> AppResult<HttpResponse> {
    let uid = register(data.store.as_ref(), data.config.bcrypt_cost, &signup_info).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "status": "User created", "uid": uid })))
}

// POST /auth/login
pub async fn login(
    data: web::Data<AppState>,
    login_info: web::Json<LoginInfo>,
) -> AppResult<HttpResponse> {
    let identity = sign_in(data.store.as_ref(), &login_info).await?;
    let token = create_jwt(&identity, &data.config.jwt_secret, data.config.jwt_ttl_hours)?;
    data.sessions.publish(SessionEvent::SignedIn(identity.clone()));
    Ok(HttpResponse::Ok().json(SignedIn { token, user: identity }))
}

// POST /auth/logout
// Tokens are stateless; signing out only notifies session listeners.
pub async fn logout(req: HttpRequest, data: web::Data<AppState>) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    data.sessions.publish(SessionEvent::SignedOut(identity));
    Ok(HttpResponse::Ok().body("Signed out"))
}

// DELETE /auth/account
pub async fn remove_account(req: HttpRequest, data: web::Data<AppState>) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    delete_account(data.store.as_ref(), &identity.uid).await?;
    data.sessions.publish(SessionEvent::SignedOut(identity));
    Ok(HttpResponse::Ok().body("Account deleted"))
}

// GET /auth/me
pub async fn me(req: HttpRequest, data: web::Data<AppState>) -> AppResult<HttpResponse> {
    let identity = current_identity(&req)?;
    let profile = load_profile(data.store.as_ref(), &identity.uid).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "user": identity, "profile": profile })))
}
