use std::sync::Arc;

use rocket::fairing::AdHoc;

use crate::backend::{LocalObjectStore, MemoryStore, MongoStore, ObjectStore, SharedStore};
use crate::config::{AppConfig, StoreBackend};
use crate::images::{ImagePipeline, ImageStrategy};
use crate::services::Marketplace;

/// Connects the configured document store and manages the wired
/// [`Marketplace`]. Ignition fails when the store is unreachable.
pub fn init() -> AdHoc {
    AdHoc::try_on_ignite("Marketplace backend", |rocket| async {
        let Some(config) = rocket.state::<AppConfig>().cloned() else {
            error!("✗ AppConfig is not managed, cannot start backend");
            return Err(rocket);
        };

        let store = match connect(&config).await {
            Ok(store) => store,
            Err(e) => {
                error!("✗ Failed to connect to MongoDB: {}", e);
                return Err(rocket);
            }
        };

        let objects: Option<Arc<dyn ObjectStore>> = if config.use_object_storage {
            Some(Arc::new(LocalObjectStore::new(
                &config.upload_dir,
                &config.upload_url_prefix,
            )))
        } else {
            None
        };
        let strategy = ImageStrategy::from_flag(config.use_object_storage);
        let images = ImagePipeline::new(strategy, objects).verbose(config.is_development);
        info!("✓ Image strategy: {:?}", images.strategy());

        Ok(rocket.manage(Marketplace::new(store, images)))
    })
}

async fn connect(config: &AppConfig) -> Result<SharedStore, mongodb::error::Error> {
    match config.store_backend {
        StoreBackend::Memory => {
            warn!("Using the in-memory store, data is lost on shutdown");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::MongoDb => {
            let store = MongoStore::connect(&config.mongodb_uri, &config.database_name).await?;
            info!("✓ MongoDB connected successfully");
            Ok(Arc::new(store))
        }
    }
}

/// Finishes task matches interrupted by an earlier failure.
pub fn reconcile() -> AdHoc {
    AdHoc::on_liftoff("Reconcile matched tasks", |rocket| {
        Box::pin(async move {
            let Some(market) = rocket.state::<Marketplace>() else {
                return;
            };
            match market.applications.reconcile_matched_tasks().await {
                Ok(0) => info!("✓ Matched tasks are consistent"),
                Ok(repaired) => warn!("Repaired {} interrupted task matches", repaired),
                Err(e) => error!("✗ Reconciling matched tasks failed: {}", e),
            }
        })
    })
}
