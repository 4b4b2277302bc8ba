use rocket::response::stream::{Event, EventStream};
use rocket::serde::json::Json;
use rocket::{Shutdown, State};
use rocket_okapi::openapi;
use tokio::sync::mpsc;
use validator::Validate;

use crate::error::ServiceError;
use crate::guards::AuthGuard;
use crate::models::SendMessageDto;
use crate::routes::file_upload::Base64UploadRequest;
use crate::services::Marketplace;
use crate::utils::{to_json, ApiError, ApiResponse};

#[openapi(tag = "Chat")]
#[get("/chats")]
pub async fn list_chats(
    market: &State<Marketplace>,
    auth: AuthGuard,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let chats = market.chats.chats_for_user(&auth.user_id).await?;
    Ok(Json(ApiResponse::success(to_json(&chats)?)))
}

#[openapi(tag = "Chat")]
#[get("/chats/<chat_id>")]
pub async fn get_chat(
    market: &State<Marketplace>,
    auth: AuthGuard,
    chat_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let chat = market.chats.participant_chat(&chat_id, &auth.user_id).await?;
    Ok(Json(ApiResponse::success(to_json(&chat)?)))
}

#[openapi(tag = "Chat")]
#[get("/chats/<chat_id>/messages")]
pub async fn get_messages(
    market: &State<Marketplace>,
    auth: AuthGuard,
    chat_id: String,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    market.chats.participant_chat(&chat_id, &auth.user_id).await?;
    let messages = market.chats.messages(&chat_id).await?;
    Ok(Json(ApiResponse::success(to_json(&messages)?)))
}

#[openapi(tag = "Chat")]
#[post("/chats/<chat_id>/messages", data = "<dto>")]
pub async fn send_message(
    market: &State<Marketplace>,
    auth: AuthGuard,
    chat_id: String,
    dto: Json<SendMessageDto>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    dto.validate().map_err(ServiceError::from)?;
    let message = market
        .chats
        .send_message(&chat_id, &auth.user_id, &dto.content)
        .await?;
    Ok(Json(ApiResponse::success(to_json(&message)?)))
}

#[openapi(tag = "Chat")]
#[post("/chats/<chat_id>/images", data = "<request>")]
pub async fn send_image(
    market: &State<Marketplace>,
    auth: AuthGuard,
    chat_id: String,
    request: Json<Base64UploadRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    let upload = request.to_upload()?;
    let message = market
        .chats
        .send_image(&chat_id, &auth.user_id, upload)
        .await?;
    Ok(Json(ApiResponse::success(to_json(&message)?)))
}

/// Server-sent events carrying the full message list of a chat, once on
/// connect and again after every new message. Not part of the OpenAPI docs.
#[get("/chats/<chat_id>/events")]
pub async fn chat_events(
    market: &State<Marketplace>,
    auth: AuthGuard,
    chat_id: String,
    mut shutdown: Shutdown,
) -> Result<EventStream![], ApiError> {
    market.chats.participant_chat(&chat_id, &auth.user_id).await?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = market.chats.subscribe(&chat_id, move |messages| {
        let _ = tx.send(messages);
    });

    Ok(EventStream! {
        // Dropping the stream on disconnect drops the subscription with it.
        let _subscription = subscription;
        loop {
            let messages = tokio::select! {
                next = rx.recv() => match next {
                    Some(messages) => messages,
                    None => break,
                },
                _ = &mut shutdown => break,
            };
            yield Event::json(&messages).event("messages");
        }
    })
}
