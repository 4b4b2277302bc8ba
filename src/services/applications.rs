use std::sync::Arc;

use mongodb::bson::{doc, Bson, DateTime};
use serde::Serialize;

use crate::backend::{CollectionPath, Query, SharedStore, APPLICATIONS, TASKS};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{
    decode, decode_record, Application, ApplicationStatus, NewApplication, Task, TaskStatus,
};
use crate::services::chat::ChatBridge;
use crate::services::events::{EventBus, MarketEvent};
use crate::services::tasks::TaskRepository;
use crate::utils::validation::require_id;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedApplication {
    pub application_id: String,
    pub task_id: String,
    pub chat_id: String,
}

/// Applying for tasks and matching a task with one applicant.
///
/// Acceptance touches three documents without a transaction. Every step
/// checks the current state before writing, so running it again after a
/// partial failure only performs the steps that are still missing.
pub struct ApplicationWorkflow {
    store: SharedStore,
    tasks: Arc<TaskRepository>,
    chats: Arc<ChatBridge>,
    events: EventBus,
}

impl ApplicationWorkflow {
    pub fn new(
        store: SharedStore,
        tasks: Arc<TaskRepository>,
        chats: Arc<ChatBridge>,
        events: EventBus,
    ) -> Self {
        ApplicationWorkflow {
            store,
            tasks,
            chats,
            events,
        }
    }

    fn applications() -> CollectionPath {
        CollectionPath::root(APPLICATIONS)
    }

    pub async fn apply_for_task(
        &self,
        task_id: &str,
        applicant_id: &str,
        data: &NewApplication,
    ) -> ServiceResult<Application> {
        require_id(applicant_id, "Applicant id")?;
        let task = self.tasks.get_task(task_id).await?;
        if task.status != TaskStatus::Open {
            return Err(ServiceError::Conflict(
                "This task is no longer accepting applications".to_string(),
            ));
        }
        if task.creator_id == applicant_id {
            return Err(ServiceError::Validation(
                "You cannot apply for your own task".to_string(),
            ));
        }

        let now = DateTime::now();
        let document = doc! {
            "taskId": task_id,
            "applicantId": applicant_id,
            "message": data.message.trim(),
            "price": data.price,
            "status": "pending",
            "createdAt": now,
        };
        let id = self
            .store
            .insert(&Self::applications(), document.clone())
            .await?;
        self.store
            .add_to_set(&CollectionPath::root(TASKS), task_id, "applications", Bson::from(id.as_str()))
            .await?;

        log::info!("{} applied for task {} ({})", applicant_id, task_id, id);
        let mut application: Application = decode(document)?;
        application.id = id;
        Ok(application)
    }

    pub async fn get_application(&self, application_id: &str) -> ServiceResult<Application> {
        require_id(application_id, "Application id")?;
        let document = self
            .store
            .get(&Self::applications(), application_id)
            .await?
            .ok_or_else(|| ServiceError::not_found("Application", application_id))?;
        let mut application: Application = decode(document)?;
        application.id = application_id.to_string();
        Ok(application)
    }

    /// Applications for one task, newest first.
    pub async fn applications_for_task(&self, task_id: &str) -> ServiceResult<Vec<Application>> {
        require_id(task_id, "Task id")?;
        let query = Query::all().where_eq("taskId", task_id);
        let mut applications = Vec::new();
        for record in self.store.query(&Self::applications(), &query).await? {
            applications.push(decode_record(record, |a: &mut Application, id| a.id = id)?);
        }
        applications.sort_by_key(|a: &Application| std::cmp::Reverse(a.created_at));
        Ok(applications)
    }

    pub async fn accept_application(
        &self,
        application_id: &str,
        task_id: &str,
    ) -> ServiceResult<AcceptedApplication> {
        let application = self.get_application(application_id).await?;
        if application.task_id != task_id {
            return Err(ServiceError::Validation(
                "Application does not belong to this task".to_string(),
            ));
        }
        let task = self.tasks.get_task(task_id).await?;
        if let Some(matched) = &task.matched_application_id {
            if matched != application_id {
                return Err(ServiceError::Conflict(
                    "Another application was already accepted for this task".to_string(),
                ));
            }
        } else if task.status != TaskStatus::Open {
            return Err(ServiceError::Conflict(format!(
                "Task is {} and cannot be matched",
                task.status.as_str()
            )));
        }

        let chat_id = self.complete_match(&task, &application).await?;
        log::info!(
            "application {} accepted for task {}, chat {}",
            application_id,
            task_id,
            chat_id
        );
        self.events.publish(MarketEvent::ApplicationAccepted {
            task_id: task_id.to_string(),
            application_id: application_id.to_string(),
            chat_id: chat_id.clone(),
        });

        Ok(AcceptedApplication {
            application_id: application_id.to_string(),
            task_id: task_id.to_string(),
            chat_id,
        })
    }

    async fn complete_match(&self, task: &Task, application: &Application) -> ServiceResult<String> {
        if application.status != ApplicationStatus::Accepted {
            self.store
                .update(
                    &Self::applications(),
                    &application.id,
                    doc! { "status": "accepted", "updatedAt": DateTime::now() },
                )
                .await?;
        }

        if task.status == TaskStatus::Open {
            self.store
                .update(
                    &CollectionPath::root(TASKS),
                    &task.id,
                    doc! {
                        "status": TaskStatus::Matched.as_str(),
                        "matchedApplicationId": application.id.as_str(),
                        "updatedAt": DateTime::now(),
                    },
                )
                .await?;
        }

        self.chats
            .ensure_task_chat(
                &task.id,
                [task.creator_id.as_str(), application.applicant_id.as_str()],
            )
            .await
    }

    /// Finishes acceptances that stopped half way: matched tasks whose
    /// application is still pending or whose chat is missing. Returns the
    /// number of tasks that needed repair.
    pub async fn reconcile_matched_tasks(&self) -> ServiceResult<usize> {
        let query = Query::all().where_eq("status", TaskStatus::Matched.as_str());
        let records = self
            .store
            .query(&CollectionPath::root(TASKS), &query)
            .await?;

        let mut repaired = 0;
        for record in records {
            let task = Task::from_record(record)?;
            let Some(application_id) = task.matched_application_id.as_deref() else {
                log::warn!("matched task {} has no matched application", task.id);
                continue;
            };
            let application = match self.get_application(application_id).await {
                Ok(application) => application,
                Err(e) => {
                    log::warn!("cannot reconcile task {}: {}", task.id, e);
                    continue;
                }
            };

            let participants = [task.creator_id.as_str(), application.applicant_id.as_str()];
            let chat_missing = self.chats.find_task_chat(&task.id, participants).await?.is_none();
            if chat_missing || application.status != ApplicationStatus::Accepted {
                self.complete_match(&task, &application).await?;
                log::info!("reconciled matched task {}", task.id);
                repaired += 1;
            }
        }
        Ok(repaired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DocumentStore, MemoryStore};
    use crate::images::{ImagePipeline, ImageStrategy};
    use crate::backend::USERS;
    use crate::models::NewTask;
    use crate::services::profiles::ProfileService;

    struct Fixture {
        store: Arc<MemoryStore>,
        tasks: Arc<TaskRepository>,
        chats: Arc<ChatBridge>,
        workflow: ApplicationWorkflow,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let shared: SharedStore = store.clone();
        let images = Arc::new(ImagePipeline::new(ImageStrategy::Inline, None));
        let events = EventBus::new();
        let profiles = Arc::new(ProfileService::new(shared.clone(), images.clone()));
        let tasks = Arc::new(TaskRepository::new(shared.clone(), images.clone(), profiles));
        let chats = Arc::new(ChatBridge::new(shared.clone(), images, events.clone()));
        let workflow = ApplicationWorkflow::new(shared, tasks.clone(), chats.clone(), events);
        Fixture {
            store,
            tasks,
            chats,
            workflow,
        }
    }

    async fn open_task(f: &Fixture) -> Task {
        let data = NewTask {
            title: "Paint fence".to_string(),
            description: String::new(),
            category: "garden".to_string(),
            price: 40.0,
            location: None,
            image_urls: Vec::new(),
        };
        f.store
            .set(&CollectionPath::root(USERS), "creator", doc! {})
            .await
            .unwrap();
        f.tasks.create_task("creator", &data).await.unwrap()
    }

    fn offer() -> NewApplication {
        NewApplication {
            message: "I can do it".to_string(),
            price: 35.0,
        }
    }

    #[tokio::test]
    async fn apply_records_pending_application() {
        let f = fixture();
        let task = open_task(&f).await;
        let application = f.workflow.apply_for_task(&task.id, "helper", &offer()).await.unwrap();
        assert_eq!(application.status, ApplicationStatus::Pending);

        // Same applicant twice is allowed.
        f.workflow.apply_for_task(&task.id, "helper", &offer()).await.unwrap();
        let listed = f.workflow.applications_for_task(&task.id).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(f.tasks.get_task(&task.id).await.unwrap().applications.len(), 2);

        let own = f.workflow.apply_for_task(&task.id, "creator", &offer()).await;
        assert!(matches!(own, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn accept_matches_task_and_opens_chat() {
        let f = fixture();
        let task = open_task(&f).await;
        let application = f.workflow.apply_for_task(&task.id, "helper", &offer()).await.unwrap();

        let accepted = f
            .workflow
            .accept_application(&application.id, &task.id)
            .await
            .unwrap();

        let task = f.tasks.get_task(&task.id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Matched);
        assert_eq!(task.matched_application_id.as_deref(), Some(application.id.as_str()));
        let application = f.workflow.get_application(&application.id).await.unwrap();
        assert_eq!(application.status, ApplicationStatus::Accepted);
        let chat = f.chats.get_chat(&accepted.chat_id).await.unwrap();
        assert!(chat.has_participant("creator") && chat.has_participant("helper"));

        // Accepting again is a no-op that returns the same chat.
        let again = f
            .workflow
            .accept_application(&application.id, &task.id)
            .await
            .unwrap();
        assert_eq!(again.chat_id, accepted.chat_id);
    }

    #[tokio::test]
    async fn second_acceptance_conflicts() {
        let f = fixture();
        let task = open_task(&f).await;
        let first = f.workflow.apply_for_task(&task.id, "helper", &offer()).await.unwrap();
        let second = f.workflow.apply_for_task(&task.id, "other", &offer()).await.unwrap();
        f.workflow.accept_application(&first.id, &task.id).await.unwrap();

        let err = f
            .workflow
            .accept_application(&second.id, &task.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn reconcile_finishes_interrupted_acceptance() {
        let f = fixture();
        let task = open_task(&f).await;
        let application = f.workflow.apply_for_task(&task.id, "helper", &offer()).await.unwrap();

        // Task flipped to matched, but nothing else happened.
        f.store
            .update(
                &CollectionPath::root(TASKS),
                &task.id,
                doc! { "status": "matched", "matchedApplicationId": application.id.as_str() },
            )
            .await
            .unwrap();

        assert_eq!(f.workflow.reconcile_matched_tasks().await.unwrap(), 1);
        assert_eq!(f.workflow.reconcile_matched_tasks().await.unwrap(), 0);

        let application = f.workflow.get_application(&application.id).await.unwrap();
        assert_eq!(application.status, ApplicationStatus::Accepted);
        assert_eq!(f.chats.chats_for_user("helper").await.unwrap().len(), 1);
    }
}
