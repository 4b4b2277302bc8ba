use std::sync::Arc;

use mongodb::bson::{doc, Bson, DateTime, Document};

use crate::backend::{CollectionPath, Query, Record, SharedStore, TASKS, USERS};
use crate::error::{ServiceError, ServiceResult};
use crate::images::{ImagePipeline, ImageTarget, ImageUpload};
use crate::models::{NewTask, Task, TaskFilters, TaskListing, TaskStatus};
use crate::services::profiles::ProfileService;
use crate::utils::validation::require_id;

const UNKNOWN_CREATOR: &str = "Unknown user";

/// Fields a task update may never touch.
const PROTECTED_FIELDS: [&str; 5] = ["id", "creatorId", "createdAt", "applications", "status"];

pub struct TaskRepository {
    store: SharedStore,
    images: Arc<ImagePipeline>,
    profiles: Arc<ProfileService>,
}

impl TaskRepository {
    pub fn new(
        store: SharedStore,
        images: Arc<ImagePipeline>,
        profiles: Arc<ProfileService>,
    ) -> Self {
        TaskRepository {
            store,
            images,
            profiles,
        }
    }

    fn tasks() -> CollectionPath {
        CollectionPath::root(TASKS)
    }

    pub async fn create_task(&self, owner_id: &str, data: &NewTask) -> ServiceResult<Task> {
        require_id(owner_id, "Creator id")?;
        let now = DateTime::now();
        let first_image = data.image_urls.first().cloned();
        let document = doc! {
            "title": data.title.trim(),
            "description": data.description.clone(),
            "category": data.category.clone(),
            "creatorId": owner_id,
            "price": data.price,
            "status": TaskStatus::Open.as_str(),
            "createdAt": now,
            "imageUrls": data.image_urls.clone(),
            "imageUrl": first_image,
            "applications": [],
            "location": data.location.clone(),
        };
        let id = self.store.insert(&Self::tasks(), document.clone()).await?;
        self.store
            .increment(&CollectionPath::root(USERS), owner_id, doc! { "postedTasks": 1_i64 })
            .await?;

        log::info!("task {} created by {}", id, owner_id);
        Ok(Task::from_record(Record { id, data: document })?)
    }

    pub async fn get_task(&self, task_id: &str) -> ServiceResult<Task> {
        require_id(task_id, "Task id")?;
        let document = self
            .store
            .get(&Self::tasks(), task_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Task", task_id))?;
        Ok(Task::from_record(Record {
            id: task_id.to_string(),
            data: document,
        })?)
    }

    /// Open tasks (or every task of one creator), newest first, with the
    /// creator's public profile merged in.
    pub async fn list_tasks(&self, filters: &TaskFilters) -> ServiceResult<Vec<TaskListing>> {
        let creator = filters.creator_id.as_deref().filter(|id| !id.is_empty());
        let query = match creator {
            Some(creator_id) => Query::all().where_eq("creatorId", creator_id),
            None => Query::all().where_eq("status", TaskStatus::Open.as_str()),
        };

        let records = match self.store.query(&Self::tasks(), &query).await {
            Ok(records) => records,
            Err(e) => {
                log::warn!("filtered task query failed ({}), scanning all tasks", e);
                self.store.query(&Self::tasks(), &Query::all()).await?
            }
        };

        let mut tasks = Vec::with_capacity(records.len());
        for record in records {
            let id = record.id.clone();
            match Task::from_record(record) {
                Ok(task) => tasks.push(task),
                Err(e) => log::warn!("skipping unreadable task {}: {}", id, e),
            }
        }

        // The full-scan path needs the same predicate the query carried.
        tasks.retain(|task| match creator {
            Some(creator_id) => task.creator_id == creator_id,
            None => task.status == TaskStatus::Open,
        });
        let tasks = shape_tasks(tasks, filters);
        Ok(self.with_creators(tasks).await)
    }

    async fn with_creators(&self, tasks: Vec<Task>) -> Vec<TaskListing> {
        let creator_ids: Vec<String> = tasks.iter().map(|task| task.creator_id.clone()).collect();
        let profiles = self.profiles.fetch_profiles(&creator_ids).await;

        tasks
            .into_iter()
            .map(|task| {
                let creator = profiles.get(&task.creator_id);
                TaskListing {
                    creator_name: creator
                        .map(|profile| profile.display_name_or_default())
                        .unwrap_or_else(|| UNKNOWN_CREATOR.to_string()),
                    creator_photo_url: creator
                        .and_then(|profile| profile.photo_url.clone())
                        .unwrap_or_default(),
                    creator_rating: creator.map(|profile| profile.rating).unwrap_or(0.0),
                    task,
                }
            })
            .collect()
    }

    /// Fails with `Forbidden` unless `user_id` created the task.
    pub async fn ensure_creator(&self, task_id: &str, user_id: &str) -> ServiceResult<Task> {
        let task = self.get_task(task_id).await?;
        if task.creator_id != user_id {
            return Err(ServiceError::Forbidden(
                "Only the task creator can do that".to_string(),
            ));
        }
        Ok(task)
    }

    /// Applies a partial update. The patched document must still read back
    /// as a task, otherwise nothing is written.
    pub async fn update_task(&self, task_id: &str, patch: Document) -> ServiceResult<Task> {
        require_id(task_id, "Task id")?;
        let mut changes = sanitize_patch(patch);
        changes.insert("updatedAt", DateTime::now());

        let mut merged = self
            .store
            .get(&Self::tasks(), task_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Task", task_id))?;
        for (key, value) in changes.iter() {
            merged.insert(key.clone(), value.clone());
        }
        let patched = Task::from_record(Record {
            id: task_id.to_string(),
            data: merged,
        })
        .map_err(|e| ServiceError::Validation(format!("Invalid task update: {}", e)))?;
        if changes.contains_key("title") && patched.title.trim().is_empty() {
            return Err(ServiceError::Validation("Title cannot be empty".to_string()));
        }
        if changes.contains_key("price") && patched.price < 0.0 {
            return Err(ServiceError::Validation("Price cannot be negative".to_string()));
        }

        self.store.update(&Self::tasks(), task_id, changes).await?;
        self.get_task(task_id).await
    }

    pub async fn bookmark_task(&self, user_id: &str, task_id: &str) -> ServiceResult<()> {
        require_id(user_id, "User id")?;
        require_id(task_id, "Task id")?;
        self.store
            .add_to_set(
                &CollectionPath::root(USERS),
                user_id,
                "bookmarkedTasks",
                Bson::from(task_id),
            )
            .await?;
        Ok(())
    }

    pub async fn remove_bookmark(&self, user_id: &str, task_id: &str) -> ServiceResult<()> {
        require_id(user_id, "User id")?;
        require_id(task_id, "Task id")?;
        self.store
            .remove_from_set(
                &CollectionPath::root(USERS),
                user_id,
                "bookmarkedTasks",
                Bson::from(task_id),
            )
            .await?;
        Ok(())
    }

    /// Bookmarked tasks that still exist, in bookmark order.
    pub async fn bookmarked_tasks(&self, user_id: &str) -> ServiceResult<Vec<Task>> {
        let Some(profile) = self.profiles.get_profile(user_id).await? else {
            return Ok(Vec::new());
        };

        let mut tasks = Vec::new();
        for task_id in &profile.bookmarked_tasks {
            match self.get_task(task_id).await {
                Ok(task) => tasks.push(task),
                Err(ServiceError::NotFound(_)) => {
                    log::debug!("bookmarked task {} no longer exists", task_id)
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tasks)
    }

    pub async fn is_task_bookmarked(&self, user_id: &str, task_id: &str) -> bool {
        match self.profiles.get_profile(user_id).await {
            Ok(Some(profile)) => profile.bookmarked_tasks.iter().any(|id| id == task_id),
            Ok(None) => false,
            Err(e) => {
                log::warn!("bookmark check for {} failed: {}", user_id, e);
                false
            }
        }
    }

    /// Stores each file; files that fail are logged and skipped.
    pub async fn upload_task_images(
        &self,
        task_id: Option<&str>,
        files: Vec<ImageUpload>,
    ) -> Vec<String> {
        let total = files.len();
        let mut references = Vec::with_capacity(total);
        for file in files {
            let name = file.file_name.clone();
            match self.images.store(ImageTarget::Task { task_id }, file).await {
                Ok(stored) => references.push(stored.into_reference()),
                Err(e) => log::warn!("skipping task image '{}': {}", name, e),
            }
        }
        log::info!("stored {} of {} task images", references.len(), total);
        references
    }

    pub async fn add_task_image(&self, task_id: &str, file: ImageUpload) -> ServiceResult<String> {
        let task = self.get_task(task_id).await?;
        let stored = self
            .images
            .store(ImageTarget::Task { task_id: Some(task_id) }, file)
            .await?;
        let reference = stored.into_reference();

        let mut image_urls = task.image_urls;
        image_urls.push(reference.clone());
        let mut changes = doc! {
            "imageUrls": image_urls,
            "updatedAt": DateTime::now(),
        };
        if task.image_url.is_none() {
            changes.insert("imageUrl", reference.as_str());
        }
        self.store.update(&Self::tasks(), task_id, changes).await?;
        Ok(reference)
    }
}

/// Category and free-text filtering plus newest-first ordering, applied the
/// same way whichever query produced the tasks.
pub fn shape_tasks(mut tasks: Vec<Task>, filters: &TaskFilters) -> Vec<Task> {
    if let Some(category) = filters.category.as_deref().filter(|c| !c.is_empty() && *c != "all") {
        tasks.retain(|task| task.category == category);
    }
    if let Some(needle) = filters
        .search
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
    {
        tasks.retain(|task| {
            task.title.to_lowercase().contains(&needle)
                || task.description.to_lowercase().contains(&needle)
        });
    }
    tasks.sort_by_key(|task| std::cmp::Reverse(task.created_millis()));
    tasks
}

fn sanitize_patch(mut patch: Document) -> Document {
    for field in PROTECTED_FIELDS {
        patch.remove(field);
    }
    if let Some(urls) = patch.get("imageUrls") {
        if !matches!(urls, Bson::Array(_)) {
            patch.insert("imageUrls", Bson::Array(Vec::new()));
        }
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DocumentStore, MemoryStore};
    use crate::images::ImageStrategy;
    use crate::models::CreateProfileDto;

    struct Fixture {
        store: Arc<MemoryStore>,
        repo: TaskRepository,
        profiles: Arc<ProfileService>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let shared: SharedStore = store.clone();
        let images = Arc::new(ImagePipeline::new(ImageStrategy::Inline, None));
        let profiles = Arc::new(ProfileService::new(shared.clone(), images.clone()));
        let repo = TaskRepository::new(shared, images, profiles.clone());
        Fixture {
            store,
            repo,
            profiles,
        }
    }

    fn new_task(title: &str, category: &str) -> NewTask {
        NewTask {
            title: title.to_string(),
            description: format!("{} please", title),
            category: category.to_string(),
            price: 20.0,
            location: None,
            image_urls: Vec::new(),
        }
    }

    async fn with_profile(f: &Fixture, uid: &str, name: &str) {
        let dto = CreateProfileDto {
            display_name: Some(name.to_string()),
            email: None,
            photo_url: Some(format!("https://img/{}", uid)),
        };
        f.profiles.create_profile(uid, &dto).await.unwrap();
    }

    #[tokio::test]
    async fn create_task_sets_defaults_and_counts() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        let task = f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();

        assert_eq!(task.status, TaskStatus::Open);
        assert!(task.applications.is_empty());
        assert!(task.created_at.is_some());
        let owner = f.profiles.get_profile("owner").await.unwrap().unwrap();
        assert_eq!(owner.posted_tasks, 1);
    }

    #[tokio::test]
    async fn list_enriches_and_filters() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();
        f.repo.create_task("owner", &new_task("Fix tap", "repair")).await.unwrap();
        // Posted by a user whose profile no longer exists.
        f.store
            .insert(
                &TaskRepository::tasks(),
                doc! {
                    "title": "Walk dog",
                    "category": "pets",
                    "creatorId": "stranger",
                    "price": 15.0,
                    "status": "open",
                    "createdAt": DateTime::now(),
                },
            )
            .await
            .unwrap();

        let garden = TaskFilters {
            category: Some("garden".to_string()),
            ..TaskFilters::default()
        };
        let listed = f.repo.list_tasks(&garden).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].creator_name, "Olga");
        assert_eq!(listed[0].creator_photo_url, "https://img/owner");

        let all = f.repo.list_tasks(&TaskFilters::default()).await.unwrap();
        let dog = all.iter().find(|t| t.task.title == "Walk dog").unwrap();
        assert_eq!(dog.creator_name, "Unknown user");
        assert_eq!(dog.creator_rating, 0.0);
    }

    #[tokio::test]
    async fn fallback_scan_matches_the_indexed_path() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();
        let done = f.repo.create_task("owner", &new_task("Old job", "garden")).await.unwrap();
        f.store
            .update(&TaskRepository::tasks(), &done.id, doc! { "status": "completed" })
            .await
            .unwrap();
        f.store
            .insert(&TaskRepository::tasks(), doc! { "title": "legacy", "status": "open", "imageUrls": "bad" })
            .await
            .unwrap();

        let indexed = f.repo.list_tasks(&TaskFilters::default()).await.unwrap();
        f.store.reject_filtered_queries(true);
        let scanned = f.repo.list_tasks(&TaskFilters::default()).await.unwrap();

        let titles = |listings: &[TaskListing]| {
            listings.iter().map(|l| l.task.title.clone()).collect::<Vec<_>>()
        };
        assert_eq!(titles(&indexed), titles(&scanned));
        assert_eq!(scanned.len(), 2);
        let legacy = scanned.iter().find(|l| l.task.title == "legacy").unwrap();
        assert!(legacy.task.image_urls.is_empty());
        assert_eq!(legacy.task.image_url, None);
    }

    #[tokio::test]
    async fn creator_filter_includes_every_status() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        let task = f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();
        f.store
            .update(&TaskRepository::tasks(), &task.id, doc! { "status": "matched" })
            .await
            .unwrap();

        let mine = TaskFilters {
            creator_id: Some("owner".to_string()),
            ..TaskFilters::default()
        };
        assert_eq!(f.repo.list_tasks(&mine).await.unwrap().len(), 1);
        assert!(f.repo.list_tasks(&TaskFilters::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_ignores_protected_fields() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        let task = f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();
        let patch = doc! {
            "title": "Mow big lawn",
            "status": "completed",
            "creatorId": "mallory",
            "imageUrls": "not-an-array",
        };
        let updated = f.repo.update_task(&task.id, patch).await.unwrap();
        assert_eq!(updated.title, "Mow big lawn");
        assert_eq!(updated.status, TaskStatus::Open);
        assert_eq!(updated.creator_id, "owner");
        assert!(updated.image_urls.is_empty());
        assert!(updated.updated_at.is_some());
    }

    #[tokio::test]
    async fn create_task_fails_when_owner_count_cannot_be_updated() {
        let f = fixture();
        let err = f
            .repo
            .create_task("ghost", &new_task("Mow lawn", "garden"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(_)));
    }

    #[tokio::test]
    async fn wrongly_typed_update_is_rejected_without_writing() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        let task = f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();

        let err = f
            .repo
            .update_task(&task.id, doc! { "price": "free", "title": "Free lawn" })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let err = f
            .repo
            .update_task(&task.id, doc! { "price": -5.0 })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));

        let stored = f.repo.get_task(&task.id).await.unwrap();
        assert_eq!(stored.title, "Mow lawn");
        assert_eq!(stored.price, 20.0);
        assert!(stored.updated_at.is_none());
        assert_eq!(f.repo.list_tasks(&TaskFilters::default()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bookmarks_behave_like_a_set() {
        let f = fixture();
        with_profile(&f, "owner", "Olga").await;
        with_profile(&f, "u1", "Mia").await;
        let task = f.repo.create_task("owner", &new_task("Mow lawn", "garden")).await.unwrap();

        f.repo.bookmark_task("u1", &task.id).await.unwrap();
        f.repo.bookmark_task("u1", &task.id).await.unwrap();
        f.repo.bookmark_task("u1", "deleted-task").await.unwrap();
        assert!(f.repo.is_task_bookmarked("u1", &task.id).await);

        let bookmarked = f.repo.bookmarked_tasks("u1").await.unwrap();
        assert_eq!(bookmarked.len(), 1);

        f.repo.remove_bookmark("u1", &task.id).await.unwrap();
        f.repo.remove_bookmark("u1", &task.id).await.unwrap();
        assert!(!f.repo.is_task_bookmarked("u1", &task.id).await);
        assert!(!f.repo.is_task_bookmarked("nobody", &task.id).await);
    }

    #[tokio::test]
    async fn failed_uploads_are_skipped() {
        let f = fixture();
        let files = vec![
            ImageUpload::new("notes.txt", "text/plain", b"hello".to_vec()),
            ImageUpload::new("broken.png", "image/png", b"not a png".to_vec()),
        ];
        assert!(f.repo.upload_task_images(None, files).await.is_empty());
    }

    #[test]
    fn shaping_sorts_newest_first() {
        let task = |title: &str, millis: i64| Task {
            title: title.to_string(),
            created_at: Some(DateTime::from_millis(millis)),
            ..Task::default()
        };
        let shaped = shape_tasks(
            vec![task("old", 1), task("new", 3), task("mid", 2)],
            &TaskFilters {
                search: Some("  E ".to_string()),
                ..TaskFilters::default()
            },
        );
        let titles: Vec<_> = shaped.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["new"]);
    }
}
