use std::sync::Arc;

use doit_marketplace::backend::MemoryStore;
use doit_marketplace::images::{ImagePipeline, ImageStrategy};
use doit_marketplace::models::{CreateProfileDto, NewApplication, NewTask, TaskFilters};
use doit_marketplace::services::MarketEvent;
use doit_marketplace::{Marketplace, ServiceError};

fn marketplace() -> Marketplace {
    Marketplace::new(
        Arc::new(MemoryStore::new()),
        ImagePipeline::new(ImageStrategy::Inline, None),
    )
}

async fn profile(market: &Marketplace, uid: &str, name: &str) {
    market
        .profiles
        .create_profile(
            uid,
            &CreateProfileDto {
                display_name: Some(name.to_string()),
                email: None,
                photo_url: None,
            },
        )
        .await
        .unwrap();
}

fn lawn_task() -> NewTask {
    NewTask {
        title: "Mow the lawn".to_string(),
        description: "Front and back yard".to_string(),
        category: "garden".to_string(),
        price: 40.0,
        location: Some("Elm Street".to_string()),
        image_urls: vec![],
    }
}

#[tokio::test]
async fn task_goes_from_posting_to_review() {
    let market = marketplace();
    profile(&market, "alice", "Alice").await;
    profile(&market, "bob", "Bob").await;
    let mut events = market.events.subscribe();

    let task = market.tasks.create_task("alice", &lawn_task()).await.unwrap();
    assert_eq!(task.status.as_str(), "open");

    let application = market
        .applications
        .apply_for_task(
            &task.id,
            "bob",
            &NewApplication {
                message: "I have a mower".to_string(),
                price: 35.0,
            },
        )
        .await
        .unwrap();
    let task = market.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.applications, vec![application.id.clone()]);

    let accepted = market
        .applications
        .accept_application(&application.id, &task.id)
        .await
        .unwrap();
    let task = market.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.status.as_str(), "matched");
    assert_eq!(task.matched_application_id.as_deref(), Some(application.id.as_str()));

    let chat = market
        .chats
        .participant_chat(&accepted.chat_id, "bob")
        .await
        .unwrap();
    assert_eq!(chat.task_id, task.id);
    assert!(chat.has_participant("alice"));
    match events.recv().await.unwrap() {
        MarketEvent::ApplicationAccepted { chat_id, .. } => assert_eq!(chat_id, accepted.chat_id),
        other => panic!("unexpected event {:?}", other),
    }

    let (review, summary) = market
        .ratings
        .complete_task(&task.id, 5, "Great job")
        .await
        .unwrap();
    assert_eq!(review.rating, 5);
    assert_eq!(summary.rating_count, 1);
    assert!((summary.rating - 5.0).abs() < f64::EPSILON);

    let task = market.tasks.get_task(&task.id).await.unwrap();
    assert_eq!(task.status.as_str(), "completed");
    assert!(task.completed_at.is_some());

    let bob = market.profiles.get_profile("bob").await.unwrap().unwrap();
    assert_eq!(bob.completed_tasks, 1);
    assert_eq!(bob.rating_count, 1);

    let alice = market.profiles.get_profile("alice").await.unwrap().unwrap();
    assert_eq!(alice.posted_tasks, 1);

    let reviews = market.ratings.reviews_for_user("bob").await.unwrap();
    assert_eq!(reviews.len(), 1);
}

#[tokio::test]
async fn second_acceptance_is_rejected() {
    let market = marketplace();
    profile(&market, "alice", "Alice").await;
    let task = market.tasks.create_task("alice", &lawn_task()).await.unwrap();

    let offer = NewApplication {
        message: String::new(),
        price: 30.0,
    };
    let first = market
        .applications
        .apply_for_task(&task.id, "bob", &offer)
        .await
        .unwrap();
    let second = market
        .applications
        .apply_for_task(&task.id, "carol", &offer)
        .await
        .unwrap();

    market
        .applications
        .accept_application(&first.id, &task.id)
        .await
        .unwrap();
    let err = market
        .applications
        .accept_application(&second.id, &task.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    // Accepting the same application again is a no-op that returns the same chat.
    let again = market
        .applications
        .accept_application(&first.id, &task.id)
        .await
        .unwrap();
    let chats = market.chats.chats_for_user("bob").await.unwrap();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, again.chat_id);
}

#[tokio::test]
async fn listings_carry_creator_details() {
    let market = marketplace();
    profile(&market, "alice", "Alice").await;
    market.tasks.create_task("alice", &lawn_task()).await.unwrap();

    let listings = market
        .tasks
        .list_tasks(&TaskFilters {
            creator_id: Some("alice".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(listings.len(), 1);
    assert_eq!(listings[0].creator_name, "Alice");

    let none = market
        .tasks
        .list_tasks(&TaskFilters {
            creator_id: Some("nobody".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(none.is_empty());
}
