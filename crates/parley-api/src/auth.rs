use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::SaltString};
use axum::{Json, extract::State, extract::rejection::JsonRejection, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use rand_core::OsRng;

use parley_types::api::{AuthResponse, Claims, LoginRequest, RegisterRequest};
use parley_types::models::{User, UserId};

use crate::error::ApiError;
use crate::state::AppState;

const TOKEN_LIFETIME_DAYS: i64 = 30;

pub async fn register(
    State(state): State<AppState>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    validate_registration(&req)?;

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Unavailable(format!("password hashing failed: {e}")))?
        .to_string();

    let RegisterRequest { username, email, .. } = req;
    let user = state
        .run_write(move |db| db.create_user(username.trim(), email.trim(), &password_hash))
        .await?;

    let token = create_token(&state.jwt_secret, user.id, &user.username)?;

    state.notifier.user_registered(&user).await;

    Ok((StatusCode::CREATED, Json(auth_response(user, token))))
}

pub async fn login(
    State(state): State<AppState>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<AuthResponse>, ApiError> {
    let Json(req) = payload?;
    let invalid = || ApiError::Unauthorized("invalid email or password".into());

    let email = req.email.trim().to_string();
    let credentials = state
        .run_db(move |db| db.get_credentials_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    // Verify password
    let parsed_hash = PasswordHash::new(&credentials.password_hash)
        .map_err(|e| ApiError::Unavailable(format!("stored password hash unreadable: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| invalid())?;

    let user = credentials.user;
    let token = create_token(&state.jwt_secret, user.id, &user.username)?;
    Ok(Json(auth_response(user, token)))
}

fn validate_registration(req: &RegisterRequest) -> Result<(), ApiError> {
    let username_len = req.username.trim().chars().count();
    if !(3..=32).contains(&username_len) {
        return Err(ApiError::Validation("username must be 3 to 32 characters".into()));
    }
    if req.password.chars().count() < 8 {
        return Err(ApiError::Validation("password must be at least 8 characters".into()));
    }
    let email = req.email.trim();
    if email.len() > 254 || !email.contains('@') {
        return Err(ApiError::Validation("email is not valid".into()));
    }
    Ok(())
}

fn auth_response(user: User, token: String) -> AuthResponse {
    AuthResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        token,
    }
}

pub fn create_token(secret: &str, user_id: UserId, username: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(TOKEN_LIFETIME_DAYS)).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Unavailable(format!("token signing failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(username: &str, email: &str, password: &str) -> RegisterRequest {
        RegisterRequest {
            username: username.into(),
            email: email.into(),
            password: password.into(),
        }
    }

    #[test]
    fn registration_rules() {
        assert!(validate_registration(&request("alice", "a@example.com", "password1")).is_ok());
        assert!(validate_registration(&request("al", "a@example.com", "password1")).is_err());
        assert!(validate_registration(&request(&"x".repeat(33), "a@example.com", "password1")).is_err());
        assert!(validate_registration(&request("alice", "a@example.com", "short")).is_err());
        assert!(validate_registration(&request("alice", "not-an-email", "password1")).is_err());
    }

    #[test]
    fn salted_hash_verifies_only_the_right_password() {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default()
            .hash_password(b"correct horse", &salt)
            .unwrap()
            .to_string();
        let parsed = PasswordHash::new(&hash).unwrap();

        assert!(Argon2::default().verify_password(b"correct horse", &parsed).is_ok());
        assert!(Argon2::default().verify_password(b"wrong horse", &parsed).is_err());
    }

    #[test]
    fn issued_token_decodes_to_claims() {
        use jsonwebtoken::{DecodingKey, Validation, decode};

        let token = create_token("s3cret", 42, "alice").unwrap();
        let data = decode::<Claims>(
            &token,
            &DecodingKey::from_secret(b"s3cret"),
            &Validation::default(),
        )
        .unwrap();
        assert_eq!(data.claims.sub, 42);
        assert_eq!(data.claims.username, "alice");
    }
}
