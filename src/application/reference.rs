//! Store locations and payment methods.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::error::{AppError, found};
use crate::application::repos::ReferenceRepo;
use crate::cache::{CacheAside, CacheKey, Invalidator, Mutation};
use crate::domain::entities::{PaymentMethodRecord, StoreRecord};

#[derive(Clone)]
pub struct ReferenceService {
    repo: Arc<dyn ReferenceRepo>,
    cache: CacheAside,
    invalidator: Invalidator,
}

impl ReferenceService {
    pub fn new(repo: Arc<dyn ReferenceRepo>, cache: CacheAside, invalidator: Invalidator) -> Self {
        Self {
            repo,
            cache,
            invalidator,
        }
    }

    pub async fn stores(&self) -> Result<Vec<StoreRecord>, AppError> {
        let stores = self
            .cache
            .cached(&CacheKey::Stores, || self.repo.list_stores())
            .await?;
        Ok(stores)
    }

    pub async fn store(&self, id: Uuid) -> Result<StoreRecord, AppError> {
        let store = self
            .cache
            .cached(&CacheKey::Store { id }, || self.repo.find_store(id))
            .await?;
        found(store)
    }

    pub async fn save_store(&self, store: StoreRecord) -> Result<StoreRecord, AppError> {
        let saved = self
            .invalidator
            .after_commit_with(self.repo.save_store(&store), |saved: &StoreRecord| {
                vec![Mutation::StoreChanged { id: saved.id }]
            })
            .await?;
        Ok(saved)
    }

    pub async fn payment_methods(&self) -> Result<Vec<PaymentMethodRecord>, AppError> {
        let methods = self
            .cache
            .cached(&CacheKey::PaymentMethods, || self.repo.list_payment_methods())
            .await?;
        Ok(methods)
    }

    pub async fn save_payment_method(
        &self,
        method: PaymentMethodRecord,
    ) -> Result<PaymentMethodRecord, AppError> {
        let saved = self
            .invalidator
            .after_commit(
                Mutation::PaymentMethodsChanged,
                self.repo.save_payment_method(&method),
            )
            .await?;
        Ok(saved)
    }
}
