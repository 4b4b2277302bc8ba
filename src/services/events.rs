use tokio::sync::broadcast;
use tokio::task::JoinHandle;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewSubmitted {
    pub task_id: String,
    pub reviewer_id: String,
    pub subject_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarketEvent {
    MessagePosted { chat_id: String, message_id: String },
    ReviewSubmitted(ReviewSubmitted),
    ApplicationAccepted {
        task_id: String,
        application_id: String,
        chat_id: String,
    },
}

/// In-process fan-out of marketplace events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MarketEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        EventBus { sender }
    }

    pub fn publish(&self, event: MarketEvent) {
        // No receivers is not an error, nobody is listening yet.
        if self.sender.send(event).is_err() {
            log::trace!("event published without listeners");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MarketEvent> {
        self.sender.subscribe()
    }

    /// Runs `handler` for every event until the returned handle is
    /// cancelled or dropped. Must be called from within a tokio runtime.
    pub fn listen<F>(&self, mut handler: F) -> Subscription
    where
        F: FnMut(MarketEvent) + Send + 'static,
    {
        let mut receiver = self.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(event) => handler(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        log::warn!("event listener lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Subscription::new(task)
    }

    pub fn on_review_submitted<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ReviewSubmitted) + Send + 'static,
    {
        self.listen(move |event| {
            if let MarketEvent::ReviewSubmitted(review) = &event {
                callback(review);
            }
        })
    }
}

/// Handle to a running listener. Cancelling is immediate and idempotent;
/// dropping the handle cancels as well.
#[derive(Debug)]
pub struct Subscription {
    task: JoinHandle<()>,
}

impl Subscription {
    pub(crate) fn new(task: JoinHandle<()>) -> Self {
        Subscription { task }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
