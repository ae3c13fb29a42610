//! Product catalog reads and catalog administration.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::error::{AppError, found};
use crate::application::pagination::{PageRequest, Paged};
use crate::application::repos::{CatalogRepo, ProductListing};
use crate::cache::{CacheAside, CacheKey, Invalidator, Mutation, Segment};
use crate::domain::entities::{
    NewReview, ProductDetail, ProductRecord, PromotionRecord, ReviewRecord, TagRecord,
    VoucherRecord,
};

#[derive(Clone)]
pub struct CatalogService {
    repo: Arc<dyn CatalogRepo>,
    cache: CacheAside,
    invalidator: Invalidator,
}

impl CatalogService {
    pub fn new(repo: Arc<dyn CatalogRepo>, cache: CacheAside, invalidator: Invalidator) -> Self {
        Self {
            repo,
            cache,
            invalidator,
        }
    }

    pub async fn list_products(
        &self,
        listing: ProductListing,
    ) -> Result<Paged<ProductRecord>, AppError> {
        let key = CacheKey::Products(listing.clone());
        let page = self
            .cache
            .cached(&key, || self.repo.list_products(&listing))
            .await?;
        Ok(page)
    }

    pub async fn product(&self, id: Uuid) -> Result<ProductDetail, AppError> {
        let detail = self
            .cache
            .cached(&CacheKey::Product { id }, || self.repo.find_product(id))
            .await?;
        found(detail)
    }

    pub async fn tags(&self, page: PageRequest) -> Result<Paged<TagRecord>, AppError> {
        let tags = self
            .cache
            .cached(&CacheKey::ProductTags(page), || self.repo.list_tags(page))
            .await?;
        Ok(tags)
    }

    pub async fn reviews(
        &self,
        product_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<ReviewRecord>, AppError> {
        let key = CacheKey::Reviews { product_id, page };
        let reviews = self
            .cache
            .cached(&key, || self.repo.list_reviews(product_id, page))
            .await?;
        Ok(reviews)
    }

    pub async fn voucher(&self, code: &str) -> Result<VoucherRecord, AppError> {
        let key = CacheKey::Voucher {
            code: Segment::new(code)?,
        };
        let voucher = self
            .cache
            .cached(&key, || self.repo.find_voucher(code))
            .await?;
        found(voucher)
    }

    pub async fn promotions(&self, page: PageRequest) -> Result<Paged<PromotionRecord>, AppError> {
        let promotions = self
            .cache
            .cached(&CacheKey::Promotions(page), || {
                self.repo.list_active_promotions(page)
            })
            .await?;
        Ok(promotions)
    }

    pub async fn submit_review(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        review: NewReview,
    ) -> Result<ReviewRecord, AppError> {
        review.validate()?;
        let record = self
            .invalidator
            .after_commit(
                Mutation::ReviewSubmitted { product_id },
                self.repo.insert_review(product_id, user_id, &review),
            )
            .await?;
        Ok(record)
    }

    pub async fn moderate_review(
        &self,
        review_id: Uuid,
        approved: bool,
    ) -> Result<ReviewRecord, AppError> {
        let record = self
            .invalidator
            .after_commit_with(
                self.repo.set_review_approved(review_id, approved),
                |review: &ReviewRecord| {
                    vec![Mutation::ReviewModerated {
                        product_id: review.product_id,
                    }]
                },
            )
            .await?;
        Ok(record)
    }

    pub async fn save_product(&self, product: ProductRecord) -> Result<ProductRecord, AppError> {
        if product.name.trim().is_empty() {
            return Err(AppError::validation("product name must not be empty"));
        }
        let saved = self
            .invalidator
            .after_commit_with(self.repo.save_product(&product), |saved: &ProductRecord| {
                vec![Mutation::ProductChanged { id: saved.id }]
            })
            .await?;
        Ok(saved)
    }

    pub async fn save_tag(&self, tag: TagRecord) -> Result<TagRecord, AppError> {
        let saved = self
            .invalidator
            .after_commit(Mutation::TagsChanged, self.repo.save_tag(&tag))
            .await?;
        Ok(saved)
    }

    pub async fn save_voucher(&self, voucher: VoucherRecord) -> Result<VoucherRecord, AppError> {
        let code = Segment::new(voucher.code.as_str())?;
        let saved = self
            .invalidator
            .after_commit(
                Mutation::VoucherChanged { code },
                self.repo.save_voucher(&voucher),
            )
            .await?;
        Ok(saved)
    }

    pub async fn save_promotion(
        &self,
        promotion: PromotionRecord,
    ) -> Result<PromotionRecord, AppError> {
        if promotion.ends_at <= promotion.starts_at {
            return Err(AppError::validation("promotion must end after it starts"));
        }
        let saved = self
            .invalidator
            .after_commit(
                Mutation::PromotionChanged,
                self.repo.save_promotion(&promotion),
            )
            .await?;
        Ok(saved)
    }
}
