use std::sync::Arc;

use mongodb::bson::{doc, Bson, DateTime};

use crate::backend::{number_field, CollectionPath, Query, SharedStore, APPLICATIONS, REVIEWS, TASKS, USERS};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{decode, decode_record, Application, RatingSummary, Review, ReviewWithAuthor, TaskStatus};
use crate::services::events::{EventBus, MarketEvent, ReviewSubmitted};
use crate::services::profiles::ProfileService;
use crate::services::tasks::TaskRepository;
use crate::utils::validation::require_id;

/// Appends reviews and keeps each user's running rating.
///
/// `ratingSum` and `ratingCount` are only ever changed by atomic
/// increments; `rating` is derived from them after every review.
pub struct RatingAggregator {
    store: SharedStore,
    tasks: Arc<TaskRepository>,
    profiles: Arc<ProfileService>,
    events: EventBus,
}

pub struct NewReview<'a> {
    pub subject_id: &'a str,
    pub author_id: &'a str,
    pub task_id: &'a str,
    pub task_title: Option<&'a str>,
    pub rating: i32,
    pub text: &'a str,
}

impl RatingAggregator {
    pub fn new(
        store: SharedStore,
        tasks: Arc<TaskRepository>,
        profiles: Arc<ProfileService>,
        events: EventBus,
    ) -> Self {
        RatingAggregator {
            store,
            tasks,
            profiles,
            events,
        }
    }

    /// Records a review and folds its rating into the subject's mean.
    /// `rating` is expected to be validated by the caller.
    pub async fn create_review(&self, review: NewReview<'_>) -> ServiceResult<(Review, RatingSummary)> {
        require_id(review.subject_id, "User id")?;
        require_id(review.author_id, "Author id")?;
        require_id(review.task_id, "Task id")?;

        let users = CollectionPath::root(USERS);
        if self.store.get(&users, review.subject_id).await?.is_none() {
            return Err(ServiceError::not_found("User", review.subject_id));
        }

        let document = doc! {
            "userId": review.subject_id,
            "authorId": review.author_id,
            "taskId": review.task_id,
            "taskTitle": review.task_title,
            "rating": review.rating,
            "text": review.text.trim(),
            "createdAt": DateTime::now(),
        };
        let id = self
            .store
            .insert(&CollectionPath::root(REVIEWS), document.clone())
            .await?;
        let summary = self.apply_rating(review.subject_id, review.rating).await?;

        log::info!(
            "review {} for {}: rating now {:.2} over {}",
            id,
            review.subject_id,
            summary.rating,
            summary.rating_count
        );
        self.events.publish(MarketEvent::ReviewSubmitted(ReviewSubmitted {
            task_id: review.task_id.to_string(),
            reviewer_id: review.author_id.to_string(),
            subject_id: review.subject_id.to_string(),
        }));

        let mut stored: Review = decode(document)?;
        stored.id = id;
        Ok((stored, summary))
    }

    async fn apply_rating(&self, uid: &str, rating: i32) -> ServiceResult<RatingSummary> {
        let users = CollectionPath::root(USERS);
        let profile = self
            .store
            .get(&users, uid)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", uid))?;

        // Profiles rated before the accumulator existed only carry the mean.
        // Only the first seed lands; later ones may hold stale counts.
        if number_field(&profile, "ratingSum").is_none() {
            let count = number_field(&profile, "ratingCount").unwrap_or(0.0);
            let mean = number_field(&profile, "rating").unwrap_or(0.0);
            self.store
                .set_if_missing(&users, uid, "ratingSum", Bson::Double(mean * count))
                .await?;
        }

        let updated = self
            .store
            .increment(
                &users,
                uid,
                doc! { "ratingSum": f64::from(rating), "ratingCount": 1_i64 },
            )
            .await?;
        let sum = number_field(&updated, "ratingSum").unwrap_or(0.0);
        let count = number_field(&updated, "ratingCount").unwrap_or(0.0);
        let mean = if count > 0.0 { sum / count } else { 0.0 };

        self.store
            .update(&users, uid, doc! { "rating": mean, "updatedAt": DateTime::now() })
            .await?;
        Ok(RatingSummary {
            rating: mean,
            rating_count: count as i64,
        })
    }

    /// Closes a matched task: marks it completed, records the creator's
    /// review of the helper and credits the helper.
    ///
    /// Every check runs before the first write. A task left completed
    /// without its review can be completed again, which records the review
    /// and the credit that are still missing.
    pub async fn complete_task(
        &self,
        task_id: &str,
        rating: i32,
        text: &str,
    ) -> ServiceResult<(Review, RatingSummary)> {
        let task = self.tasks.get_task(task_id).await?;
        let application_id = match (task.status, task.matched_application_id.as_deref()) {
            (TaskStatus::Matched | TaskStatus::Completed, Some(id)) => id.to_string(),
            (TaskStatus::Completed, None) => {
                return Err(ServiceError::Conflict("Task is already completed".to_string()));
            }
            _ => {
                return Err(ServiceError::Conflict(
                    "Task has no accepted application yet".to_string(),
                ));
            }
        };
        let document = self
            .store
            .get(&CollectionPath::root(APPLICATIONS), &application_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Application", &application_id))?;
        let application: Application = decode(document)?;
        let helper = application.applicant_id.as_str();
        if self.store.get(&CollectionPath::root(USERS), helper).await?.is_none() {
            return Err(ServiceError::not_found("User", helper));
        }

        if task.status == TaskStatus::Completed {
            if self.has_task_review(task_id, &task.creator_id).await? {
                return Err(ServiceError::Conflict("Task is already completed".to_string()));
            }
            log::warn!("task {} was completed without a review, recording it now", task_id);
        } else {
            let now = DateTime::now();
            self.store
                .update(
                    &CollectionPath::root(TASKS),
                    task_id,
                    doc! {
                        "status": TaskStatus::Completed.as_str(),
                        "completedAt": now,
                        "updatedAt": now,
                    },
                )
                .await?;
        }

        let reviewed = self
            .create_review(NewReview {
                subject_id: helper,
                author_id: &task.creator_id,
                task_id,
                task_title: Some(&task.title),
                rating,
                text,
            })
            .await?;

        // Credited after the review, so a missing review means a missing credit.
        if let Err(e) = self
            .store
            .increment(
                &CollectionPath::root(USERS),
                helper,
                doc! { "completedTasks": 1_i64 },
            )
            .await
        {
            log::warn!("could not credit completed task to {}: {}", helper, e);
        }
        Ok(reviewed)
    }

    async fn has_task_review(&self, task_id: &str, author_id: &str) -> ServiceResult<bool> {
        let query = Query::all()
            .where_eq("taskId", task_id)
            .where_eq("authorId", author_id)
            .limit(1);
        let found = self
            .store
            .query(&CollectionPath::root(REVIEWS), &query)
            .await?;
        Ok(!found.is_empty())
    }

    /// Reviews about `uid`, newest first, with author names merged in.
    pub async fn reviews_for_user(&self, uid: &str) -> ServiceResult<Vec<ReviewWithAuthor>> {
        require_id(uid, "User id")?;
        let query = Query::all().where_eq("userId", uid);
        let mut reviews = Vec::new();
        for record in self.store.query(&CollectionPath::root(REVIEWS), &query).await? {
            reviews.push(decode_record(record, |r: &mut Review, id| r.id = id)?);
        }
        reviews.sort_by_key(|r: &Review| std::cmp::Reverse(r.created_at));

        let author_ids: Vec<String> = reviews.iter().map(|r| r.author_id.clone()).collect();
        let authors = self.profiles.fetch_profiles(&author_ids).await;

        Ok(reviews
            .into_iter()
            .map(|review| {
                let author = authors.get(&review.author_id);
                ReviewWithAuthor {
                    author_name: author
                        .map(|p| p.display_name_or_default())
                        .unwrap_or_else(|| "Unknown user".to_string()),
                    author_photo_url: author.and_then(|p| p.photo_url.clone()),
                    review,
                }
            })
            .collect())
    }
}
