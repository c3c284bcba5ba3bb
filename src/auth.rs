use actix_web::{dev::Payload, web, Error, FromRequest, HttpRequest};
use actix_web_httpauth::extractors::bearer::BearerAuth;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::env;
use std::future::{ready, Ready};

use crate::models::Id;

/// Audience Supabase Auth stamps on signed-in users' access tokens.
pub const AUDIENCE: &str = "authenticated";
pub const JWT_SECRET_VAR: &str = "SUPABASE_JWT_SECRET";

/// The signed-in person the feed, interactions and comments act for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewer {
    pub id: Id,
    pub email: Option<String>,
}

impl Viewer {
    pub fn new(id: Id) -> Self {
        Self { id, email: None }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub aud: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl Claims {
    pub fn viewer(&self) -> Option<Viewer> {
        let id = self.sub.parse().ok()?;
        Some(Viewer { id, email: self.email.clone() })
    }
}

/// Validate a Supabase access token and return its claims.
pub fn decode_access_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_audience(&[AUDIENCE]);
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)?;
    Ok(data.claims)
}

/// Mint a token shaped like Supabase's (local development and tests).
pub fn issue_access_token(
    viewer: &Viewer,
    secret: &str,
    ttl: chrono::Duration,
) -> Result<String, jsonwebtoken::errors::Error> {
    let exp = (chrono::Utc::now() + ttl).timestamp().max(0) as usize;
    let claims = Claims {
        sub: viewer.id.to_string(),
        exp,
        aud: AUDIENCE.into(),
        email: viewer.email.clone(),
        role: Some(AUDIENCE.into()),
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

/// Verified project secret registered as app data; the extractor falls back
/// to `SUPABASE_JWT_SECRET` when it is absent.
#[derive(Clone)]
pub struct JwtSecret(pub String);

/// Extractor yielding the authenticated `Viewer`.
pub struct Auth(pub Viewer);

impl FromRequest for Auth {
    type Error = Error;
    type Future = Ready<Result<Self, Error>>;

    fn from_request(req: &HttpRequest, pl: &mut Payload) -> Self::Future {
        let configured = req.app_data::<web::Data<JwtSecret>>().map(|s| s.0.clone());
        let Some(secret) = configured.or_else(|| env::var(JWT_SECRET_VAR).ok()) else {
            return ready(Err(actix_web::error::ErrorUnauthorized("Authentication not configured")));
        };
        if let Ok(bearer) = BearerAuth::from_request(req, pl).into_inner() {
            return match decode_access_token(bearer.token(), &secret).ok().and_then(|c| c.viewer()) {
                Some(viewer) => ready(Ok(Auth(viewer))),
                None => ready(Err(actix_web::error::ErrorUnauthorized("Invalid access token"))),
            };
        }
        ready(Err(actix_web::error::ErrorUnauthorized("Authorization required")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret-at-least-32-bytes-long";

    #[test]
    fn issued_token_round_trips_to_viewer() {
        let viewer = Viewer { id: uuid::Uuid::new_v4(), email: Some("ruth@example.org".into()) };
        let token = issue_access_token(&viewer, SECRET, chrono::Duration::minutes(5)).unwrap();
        let claims = decode_access_token(&token, SECRET).unwrap();
        assert_eq!(claims.viewer(), Some(viewer));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let viewer = Viewer::new(uuid::Uuid::new_v4());
        let token = issue_access_token(&viewer, SECRET, chrono::Duration::minutes(5)).unwrap();
        assert!(decode_access_token(&token, "another-secret-that-is-long-enough!!").is_err());
    }
}
