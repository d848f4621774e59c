use sqlx::PgPool;
use std::sync::Arc;

use crate::db::{queries::PgPhotoStore, PhotoStore};
use crate::services::storage::R2Client;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub photos: Arc<dyn PhotoStore>,
    pub storage: Arc<R2Client>,
}

impl AppState {
    pub fn new(db: PgPool, storage: R2Client) -> Self {
        Self {
            photos: Arc::new(PgPhotoStore::new(db.clone())),
            db,
            storage: Arc::new(storage),
        }
    }
}
