use std::collections::HashMap;
use std::sync::Arc;

use mongodb::bson::{doc, Bson, DateTime, Document};
use rocket::futures::future::join_all;

use crate::backend::{CollectionPath, Query, SharedStore, USERS};
use crate::error::{ServiceError, ServiceResult};
use crate::images::{ImagePipeline, ImageTarget, ImageUpload, StoredImage};
use crate::models::{decode, CreateProfileDto, UpdateProfileDto, UserProfile, DEFAULT_DISPLAY_NAME};
use crate::utils::validation::require_id;

pub struct ProfileService {
    store: SharedStore,
    images: Arc<ImagePipeline>,
}

impl ProfileService {
    pub fn new(store: SharedStore, images: Arc<ImagePipeline>) -> Self {
        ProfileService { store, images }
    }

    fn users() -> CollectionPath {
        CollectionPath::root(USERS)
    }

    /// Creates the profile document for `uid`. An existing profile is
    /// returned untouched.
    pub async fn create_profile(
        &self,
        uid: &str,
        dto: &CreateProfileDto,
    ) -> ServiceResult<UserProfile> {
        require_id(uid, "User id")?;
        if let Some(existing) = self.get_profile(uid).await? {
            return Ok(existing);
        }

        let display_name = dto
            .display_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        let document = doc! {
            "uid": uid,
            "displayName": display_name,
            "email": dto.email.clone(),
            "photoURL": dto.photo_url.clone(),
            "rating": 0.0,
            "ratingCount": 0_i64,
            "ratingSum": 0.0,
            "completedTasks": 0_i64,
            "postedTasks": 0_i64,
            "bookmarkedTasks": [],
            "skills": [],
            "createdAt": DateTime::now(),
        };
        self.store.set(&Self::users(), uid, document).await?;
        log::info!("created profile for user {}", uid);

        self.get_profile(uid)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", uid))
    }

    pub async fn get_profile(&self, uid: &str) -> ServiceResult<Option<UserProfile>> {
        require_id(uid, "User id")?;
        let Some(document) = self.store.get(&Self::users(), uid).await? else {
            return Ok(None);
        };
        let mut profile: UserProfile = decode(document)?;
        if profile.uid.is_empty() {
            profile.uid = uid.to_string();
        }
        Ok(Some(profile))
    }

    /// Applies the given fields, creating the document if it is missing.
    pub async fn update_profile(
        &self,
        uid: &str,
        dto: &UpdateProfileDto,
    ) -> ServiceResult<UserProfile> {
        require_id(uid, "User id")?;
        let mut changes = Document::new();
        if let Some(name) = &dto.display_name {
            changes.insert("displayName", name.trim());
        }
        if let Some(skills) = &dto.skills {
            changes.insert("skills", skills.clone());
        }
        if let Some(location) = &dto.location {
            changes.insert("location", location.clone());
        }
        changes.insert("updatedAt", DateTime::now());
        self.write_profile_fields(uid, changes).await?;

        self.get_profile(uid)
            .await?
            .ok_or_else(|| ServiceError::not_found("User", uid))
    }

    async fn write_profile_fields(&self, uid: &str, changes: Document) -> ServiceResult<()> {
        let users = Self::users();
        if self.store.get(&users, uid).await?.is_some() {
            self.store.update(&users, uid, changes).await?;
        } else {
            let mut document = doc! { "uid": uid, "createdAt": DateTime::now() };
            document.extend(changes);
            self.store.set(&users, uid, document).await?;
        }
        Ok(())
    }

    /// Errs on the side of "taken" when the lookup fails.
    pub async fn username_exists(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let query = Query::all().where_eq("displayName", name).limit(1);
        match self.store.query(&Self::users(), &query).await {
            Ok(records) => !records.is_empty(),
            Err(e) => {
                log::warn!("username lookup for '{}' failed: {}", name, e);
                true
            }
        }
    }

    /// Stores a new avatar and points the profile at it. Returns the
    /// reference written to `photoURL`.
    pub async fn upload_avatar(&self, uid: &str, upload: ImageUpload) -> ServiceResult<String> {
        require_id(uid, "User id")?;
        let stored = self.images.store(ImageTarget::Avatar { uid }, upload).await?;

        let inline_copy = match &stored {
            StoredImage::Inline(data_uri) => Bson::String(data_uri.clone()),
            StoredImage::Url(_) => Bson::Null,
        };
        let reference = stored.into_reference();
        let changes = doc! {
            "photoURL": reference.as_str(),
            "avatarUrl": reference.as_str(),
            "avatarBase64": inline_copy,
            "photoUpdatedAt": DateTime::now(),
            "updatedAt": DateTime::now(),
        };
        self.write_profile_fields(uid, changes).await?;
        log::info!("updated avatar for user {}", uid);
        Ok(reference)
    }

    /// Looks up every distinct id in one concurrent batch. Missing profiles
    /// and failed lookups are left out of the map.
    pub async fn fetch_profiles(&self, ids: &[String]) -> HashMap<String, UserProfile> {
        let mut distinct: Vec<&String> = ids.iter().filter(|id| !id.is_empty()).collect();
        distinct.sort();
        distinct.dedup();

        let lookups = distinct.iter().map(|id| self.get_profile(id));
        let results = join_all(lookups).await;

        let mut profiles = HashMap::new();
        for (id, result) in distinct.into_iter().zip(results) {
            match result {
                Ok(Some(profile)) => {
                    profiles.insert(id.clone(), profile);
                }
                Ok(None) => log::debug!("no profile for user {}", id),
                Err(e) => log::warn!("profile lookup for {} failed: {}", id, e),
            }
        }
        profiles
    }
}
