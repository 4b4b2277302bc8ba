use std::sync::Arc;
use std::time::Duration;

use mongodb::bson::{doc, DateTime};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::MissedTickBehavior;

use crate::backend::{CollectionPath, Query, SharedStore, SortOrder, CHATS, MESSAGES};
use crate::error::{ServiceError, ServiceResult};
use crate::images::{ImagePipeline, ImageTarget, ImageUpload};
use crate::models::{decode_record, Chat, ChatMessage, MessageType};
use crate::services::events::{EventBus, MarketEvent, Subscription};
use crate::utils::validation::require_id;

pub const PHOTO_SUMMARY: &str = "📷 Photo";

/// How often a subscription re-reads the store to pick up messages that
/// another server instance wrote.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct ChatBridge {
    store: SharedStore,
    images: Arc<ImagePipeline>,
    events: EventBus,
    poll_interval: Duration,
}

fn chats() -> CollectionPath {
    CollectionPath::root(CHATS)
}

fn messages_of(chat_id: &str) -> CollectionPath {
    CollectionPath::nested(CHATS, chat_id, MESSAGES)
}

async fn load_messages(store: &SharedStore, chat_id: &str) -> ServiceResult<Vec<ChatMessage>> {
    let query = Query::all().order_by("timestamp", SortOrder::Ascending);
    let records = store.query(&messages_of(chat_id), &query).await?;
    let mut messages = Vec::with_capacity(records.len());
    for record in records {
        messages.push(decode_record(record, |m: &mut ChatMessage, id| m.id = id)?);
    }
    Ok(messages)
}

impl ChatBridge {
    pub fn new(store: SharedStore, images: Arc<ImagePipeline>, events: EventBus) -> Self {
        ChatBridge {
            store,
            images,
            events,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Returns the chat for this task between exactly these participants,
    /// creating it when none exists yet.
    pub async fn ensure_task_chat(
        &self,
        task_id: &str,
        participants: [&str; 2],
    ) -> ServiceResult<String> {
        if let Some(chat_id) = self.find_task_chat(task_id, participants).await? {
            return Ok(chat_id);
        }

        let document = doc! {
            "taskId": task_id,
            "participants": participants.to_vec(),
            "createdAt": DateTime::now(),
            "lastMessage": null,
            "lastMessageAt": null,
        };
        let chat_id = self.store.insert(&chats(), document).await?;
        log::info!("chat {} opened for task {}", chat_id, task_id);
        Ok(chat_id)
    }

    pub async fn find_task_chat(
        &self,
        task_id: &str,
        participants: [&str; 2],
    ) -> ServiceResult<Option<String>> {
        require_id(task_id, "Task id")?;
        let query = Query::all().where_eq("taskId", task_id);
        for record in self.store.query(&chats(), &query).await? {
            let chat: Chat = decode_record(record, |c: &mut Chat, id| c.id = id)?;
            if participants.iter().all(|p| chat.has_participant(p)) {
                return Ok(Some(chat.id));
            }
        }
        Ok(None)
    }

    pub async fn get_chat(&self, chat_id: &str) -> ServiceResult<Chat> {
        require_id(chat_id, "Chat id")?;
        let document = self
            .store
            .get(&chats(), chat_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Chat", chat_id))?;
        let mut chat: Chat = crate::models::decode(document)?;
        chat.id = chat_id.to_string();
        Ok(chat)
    }

    /// Fails with `Forbidden` unless `user_id` takes part in the chat.
    pub async fn participant_chat(&self, chat_id: &str, user_id: &str) -> ServiceResult<Chat> {
        let chat = self.get_chat(chat_id).await?;
        if !chat.has_participant(user_id) {
            return Err(ServiceError::Forbidden(
                "You are not part of this conversation".to_string(),
            ));
        }
        Ok(chat)
    }

    /// Chats the user takes part in, most recently active first.
    pub async fn chats_for_user(&self, user_id: &str) -> ServiceResult<Vec<Chat>> {
        require_id(user_id, "User id")?;
        let query = Query::all().where_eq("participants", user_id);
        let mut result = Vec::new();
        for record in self.store.query(&chats(), &query).await? {
            result.push(decode_record(record, |c: &mut Chat, id| c.id = id)?);
        }
        result.sort_by_key(|chat: &Chat| {
            std::cmp::Reverse(chat.last_message_at.or(chat.created_at))
        });
        Ok(result)
    }

    pub async fn send_message(
        &self,
        chat_id: &str,
        sender_id: &str,
        content: &str,
    ) -> ServiceResult<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ServiceError::Validation("Message cannot be empty".to_string()));
        }
        self.participant_chat(chat_id, sender_id).await?;
        self.append(chat_id, sender_id, MessageType::Text, content, content)
            .await
    }

    pub async fn send_image(
        &self,
        chat_id: &str,
        sender_id: &str,
        upload: ImageUpload,
    ) -> ServiceResult<ChatMessage> {
        self.participant_chat(chat_id, sender_id).await?;
        let stored = self.images.store(ImageTarget::Chat { chat_id }, upload).await?;
        self.append(
            chat_id,
            sender_id,
            MessageType::Image,
            stored.reference(),
            PHOTO_SUMMARY,
        )
        .await
    }

    async fn append(
        &self,
        chat_id: &str,
        sender_id: &str,
        message_type: MessageType,
        content: &str,
        summary: &str,
    ) -> ServiceResult<ChatMessage> {
        let timestamp = DateTime::now();
        let kind = match message_type {
            MessageType::Text => "text",
            MessageType::Image => "image",
        };
        let document = doc! {
            "senderId": sender_id,
            "messageType": kind,
            "content": content,
            "timestamp": timestamp,
        };
        let message_id = self.store.insert(&messages_of(chat_id), document).await?;

        self.store
            .update(
                &chats(),
                chat_id,
                doc! { "lastMessage": summary, "lastMessageAt": timestamp },
            )
            .await?;

        self.events.publish(MarketEvent::MessagePosted {
            chat_id: chat_id.to_string(),
            message_id: message_id.clone(),
        });

        Ok(ChatMessage {
            id: message_id,
            sender_id: sender_id.to_string(),
            message_type,
            content: content.to_string(),
            timestamp: Some(timestamp),
        })
    }

    /// Messages in send order.
    pub async fn messages(&self, chat_id: &str) -> ServiceResult<Vec<ChatMessage>> {
        require_id(chat_id, "Chat id")?;
        load_messages(&self.store, chat_id).await
    }

    /// Calls `callback` with the full ordered message list now and after
    /// every new message in the chat, until the handle is cancelled.
    ///
    /// Messages sent through this process arrive right away over the event
    /// bus. Messages written by other instances are found by re-reading the
    /// chat every poll interval; unchanged lists are not delivered again.
    pub fn subscribe<F>(&self, chat_id: &str, callback: F) -> Subscription
    where
        F: Fn(Vec<ChatMessage>) + Send + Sync + 'static,
    {
        let store = self.store.clone();
        let chat_id = chat_id.to_string();
        let mut receiver = self.events.subscribe();
        let poll_interval = self.poll_interval;

        let task = tokio::spawn(async move {
            let mut poll = tokio::time::interval(poll_interval);
            poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            poll.tick().await;
            let mut delivered: Option<(usize, String)> = None;

            loop {
                match load_messages(&store, &chat_id).await {
                    Ok(messages) => {
                        let seen = snapshot_key(&messages);
                        if delivered.as_ref() != Some(&seen) {
                            delivered = Some(seen);
                            callback(messages);
                        }
                    }
                    Err(e) => log::warn!("could not load messages for chat {}: {}", chat_id, e),
                }

                loop {
                    let refresh = tokio::select! {
                        event = receiver.recv() => match event {
                            Ok(MarketEvent::MessagePosted { chat_id: changed, .. }) => changed == chat_id,
                            Ok(_) => false,
                            Err(RecvError::Lagged(_)) => true,
                            Err(RecvError::Closed) => return,
                        },
                        _ = poll.tick() => true,
                    };
                    if refresh {
                        break;
                    }
                }
            }
        });
        Subscription::new(task)
    }
}

// Message count and newest id identify an append-only message list.
fn snapshot_key(messages: &[ChatMessage]) -> (usize, String) {
    let last = messages.last().map(|m| m.id.clone()).unwrap_or_default();
    (messages.len(), last)
}
