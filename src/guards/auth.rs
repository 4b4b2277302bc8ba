use rocket::request::{self, FromRequest, Request, Outcome};
use rocket::http::Status;
use rocket::State;

// === OpenAPI (compatible with rocket_okapi 0.8.0 / 0.8.1) ===
use rocket_okapi::request::{OpenApiFromRequest, RequestHeaderInput};
use rocket_okapi::r#gen::OpenApiGenerator;

use crate::config::AppConfig;
use crate::services::JwtService;

/// Bearer-token guard for identity tokens issued by the auth provider.
pub struct AuthGuard {
    pub user_id: String,
    pub email: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthGuard {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let Some(token) = req.headers().get_one("Authorization") else {
            return Outcome::Error((Status::Unauthorized, ()));
        };
        let token = token.trim_start_matches("Bearer ");

        let config = match req.guard::<&State<AppConfig>>().await {
            Outcome::Success(config) => config,
            _ => return Outcome::Error((Status::InternalServerError, ())),
        };

        match JwtService::verify_token(token, &config.auth_secret) {
            Ok(claims) if !claims.sub.is_empty() => Outcome::Success(AuthGuard {
                user_id: claims.sub,
                email: claims.email,
            }),
            Ok(_) => Outcome::Error((Status::Unauthorized, ())),
            Err(e) => {
                log::debug!("rejected bearer token: {}", e);
                Outcome::Error((Status::Unauthorized, ()))
            }
        }
    }
}

impl<'a> OpenApiFromRequest<'a> for AuthGuard {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}

/// Identifies the caller when a valid token is present, without requiring one.
pub struct OptionalAuth {
    pub user_id: Option<String>,
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for OptionalAuth {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let user_id = match AuthGuard::from_request(req).await {
            Outcome::Success(auth) => Some(auth.user_id),
            _ => None,
        };
        Outcome::Success(OptionalAuth { user_id })
    }
}

impl<'a> OpenApiFromRequest<'a> for OptionalAuth {
    fn from_request_input(
        _gen: &mut OpenApiGenerator,
        _name: String,
        _required: bool,
    ) -> rocket_okapi::Result<RequestHeaderInput> {
        Ok(RequestHeaderInput::None)
    }
}
