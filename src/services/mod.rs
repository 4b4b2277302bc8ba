pub mod applications;
pub mod chat;
pub mod events;
pub mod jwt;
pub mod profiles;
pub mod reviews;
pub mod search;
pub mod tasks;

use std::sync::Arc;

pub use applications::{AcceptedApplication, ApplicationWorkflow};
pub use chat::ChatBridge;
pub use events::{EventBus, MarketEvent, ReviewSubmitted, Subscription};
pub use jwt::JwtService;
pub use profiles::ProfileService;
pub use reviews::{NewReview, RatingAggregator};
pub use search::SearchHistory;
pub use tasks::TaskRepository;

use crate::backend::SharedStore;
use crate::images::ImagePipeline;

/// Every marketplace service wired to one store, one image pipeline and
/// one event bus.
#[derive(Clone)]
pub struct Marketplace {
    pub events: EventBus,
    pub images: Arc<ImagePipeline>,
    pub profiles: Arc<ProfileService>,
    pub tasks: Arc<TaskRepository>,
    pub applications: Arc<ApplicationWorkflow>,
    pub ratings: Arc<RatingAggregator>,
    pub chats: Arc<ChatBridge>,
    pub search: Arc<SearchHistory>,
}

impl Marketplace {
    pub fn new(store: SharedStore, images: ImagePipeline) -> Self {
        let events = EventBus::new();
        let images = Arc::new(images);
        let profiles = Arc::new(ProfileService::new(store.clone(), images.clone()));
        let tasks = Arc::new(TaskRepository::new(
            store.clone(),
            images.clone(),
            profiles.clone(),
        ));
        let chats = Arc::new(ChatBridge::new(
            store.clone(),
            images.clone(),
            events.clone(),
        ));
        let applications = Arc::new(ApplicationWorkflow::new(
            store.clone(),
            tasks.clone(),
            chats.clone(),
            events.clone(),
        ));
        let ratings = Arc::new(RatingAggregator::new(
            store.clone(),
            tasks.clone(),
            profiles.clone(),
            events.clone(),
        ));
        let search = Arc::new(SearchHistory::new(store));

        Marketplace {
            events,
            images,
            profiles,
            tasks,
            applications,
            ratings,
            chats,
            search,
        }
    }
}
