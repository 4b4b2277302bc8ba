use rocket::fairing::{Fairing, Info, Kind};
use rocket::fs::FileServer;
use rocket::http::Header;
use rocket::{Build, Request, Response, Rocket};
use rocket_okapi::openapi_get_routes;
use rocket_okapi::swagger_ui::{SwaggerUIConfig, make_swagger_ui};

use crate::config::Config;
use crate::{db, routes};

/* ----------------------------- CORS ----------------------------- */

pub struct CORS;

#[rocket::async_trait]
impl Fairing for CORS {
    fn info(&self) -> Info {
        Info {
            name: "CORS",
            kind: Kind::Response,
        }
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        if let Some(origin) = request.headers().get_one("Origin") {
            response.set_header(Header::new("Access-Control-Allow-Origin", origin));
        }

        response.set_header(Header::new(
            "Access-Control-Allow-Methods",
            "GET, POST, PUT, DELETE, OPTIONS",
        ));

        response.set_header(Header::new(
            "Access-Control-Allow-Headers",
            "Content-Type, Authorization",
        ));

        response.set_header(Header::new("Access-Control-Allow-Credentials", "true"));
    }
}

/* ----------------------------- OPTIONS ----------------------------- */

#[options("/<_..>")]
fn options_handler() {}

/* ----------------------------- ERRORS ----------------------------- */

#[catch(401)]
fn unauthorized() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Missing or invalid identity token"
    })
}

#[catch(404)]
fn not_found() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Resource not found (check /api/v1 prefix)"
    })
}

#[catch(422)]
fn unprocessable() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Malformed request body"
    })
}

#[catch(500)]
fn internal_error() -> rocket::serde::json::Value {
    rocket::serde::json::json!({
        "success": false,
        "message": "Internal server error"
    })
}

/* ----------------------------- SWAGGER ----------------------------- */

fn swagger_config() -> SwaggerUIConfig {
    SwaggerUIConfig {
        url: "/api/v1/openapi.json".to_string(),
        ..Default::default()
    }
}

/* ----------------------------- BUILD ----------------------------- */

/// Builds the HTTP server from `Rocket.toml` and `ROCKET_*` variables.
pub fn build() -> Rocket<Build> {
    let figment = Config::figment();
    let app_config = Config::load(&figment);
    let (upload_dir, upload_prefix) = app_config
        .as_ref()
        .map(|config| (config.upload_dir.clone(), config.upload_url_prefix.clone()))
        .unwrap_or_else(|_| ("uploads".to_string(), "/uploads".to_string()));
    if let Err(e) = std::fs::create_dir_all(&upload_dir) {
        warn!("Could not create upload directory {}: {}", upload_dir, e);
    }

    info!("🚀 DoIt marketplace API");
    info!("📚 Swagger UI → /api/docs");

    let mut rocket = rocket::custom(figment);
    match app_config {
        Ok(config) => rocket = rocket.manage(config),
        // The backend fairing refuses to ignite without a managed config.
        Err(e) => error!("✗ Invalid configuration: {}", e),
    }

    rocket
        .attach(db::init())
        .attach(db::reconcile())
        .attach(CORS)
        .mount("/", routes![options_handler])
        .mount(
            "/api/v1",
            openapi_get_routes![
                // User
                routes::user::get_profile,
                routes::user::get_public_profile,
                routes::user::create_profile,
                routes::user::update_profile,
                routes::user::username_exists,
                routes::user::upload_avatar,
                routes::user::get_user_reviews,
                routes::user::get_bookmarks,
                routes::user::is_bookmarked,
                routes::user::add_bookmark,
                routes::user::remove_bookmark,
                // Tasks
                routes::task::create_task,
                routes::task::list_tasks,
                routes::task::get_task,
                routes::task::update_task,
                routes::task::add_task_image,
                routes::task::complete_task,
                // Applications
                routes::application::apply_for_task,
                routes::application::list_applications,
                routes::application::accept_application,
                // Reviews
                routes::review::create_review,
                // Chat
                routes::chat::list_chats,
                routes::chat::get_chat,
                routes::chat::get_messages,
                routes::chat::send_message,
                routes::chat::send_image,
                // Search
                routes::search::record_search,
                routes::search::recent_searches,
                // Uploads
                routes::file_upload::upload_task_images,
            ],
        )
        .mount("/api/v1", routes![routes::chat::chat_events])
        .mount(upload_prefix, FileServer::from(upload_dir))
        .mount("/api/docs", make_swagger_ui(&swagger_config()))
        .register(
            "/",
            catchers![unauthorized, not_found, unprocessable, internal_error],
        )
}
