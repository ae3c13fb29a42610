//! Repository traits describing the store of record.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::application::pagination::{PageRequest, Paged};
use crate::cache::{KeyError, Segment};
use crate::domain::entities::{
    AddressRecord, CartItemRecord, CommentRecord, LoyaltyInfo, MembershipTierRecord, NewComment,
    NewReview, OrderRecord, PaymentMethodRecord, PostDetail, PostRecord, ProductDetail,
    ProductRecord, ProfileRecord, ProfileUpdate, PromotionRecord, ReviewRecord, SessionUser,
    StoreRecord, SupportTicketRecord, TagRecord, VoucherRecord, WishlistItem,
};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("resource not found")]
    NotFound,
}

impl RepoError {
    pub fn from_persistence(err: impl fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    CreatedAt,
    Price,
    Name,
}

impl ProductSort {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductSort::CreatedAt => "created_at",
            ProductSort::Price => "price",
            ProductSort::Name => "name",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Tag filter of a product listing. `all` is the rendered form of "no
/// filter", so it cannot also name a tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(Segment),
}

impl CategoryFilter {
    const ALL: &'static str = "all";

    pub fn only(tag: Segment) -> Result<Self, KeyError> {
        if tag.as_str() == Self::ALL {
            return Err(KeyError::ReservedWord {
                segment: tag.as_str().to_string(),
            });
        }
        Ok(Self::Only(tag))
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            CategoryFilter::All => None,
            CategoryFilter::Only(tag) => Some(tag.as_str()),
        }
    }
}

impl fmt::Display for CategoryFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag().unwrap_or(Self::ALL))
    }
}

/// Product listing query. Every field is part of the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ProductListing {
    pub page: PageRequest,
    pub sort: ProductSort,
    pub order: SortOrder,
    pub category: CategoryFilter,
}

#[async_trait]
pub trait CatalogRepo: Send + Sync {
    async fn list_products(
        &self,
        listing: &ProductListing,
    ) -> Result<Paged<ProductRecord>, RepoError>;

    async fn find_product(&self, id: Uuid) -> Result<Option<ProductDetail>, RepoError>;

    async fn save_product(&self, product: &ProductRecord) -> Result<ProductRecord, RepoError>;

    async fn list_tags(&self, page: PageRequest) -> Result<Paged<TagRecord>, RepoError>;

    async fn save_tag(&self, tag: &TagRecord) -> Result<TagRecord, RepoError>;

    async fn list_reviews(
        &self,
        product_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<ReviewRecord>, RepoError>;

    async fn insert_review(
        &self,
        product_id: Uuid,
        user_id: Uuid,
        review: &NewReview,
    ) -> Result<ReviewRecord, RepoError>;

    async fn set_review_approved(
        &self,
        review_id: Uuid,
        approved: bool,
    ) -> Result<ReviewRecord, RepoError>;

    async fn find_voucher(&self, code: &str) -> Result<Option<VoucherRecord>, RepoError>;

    async fn save_voucher(&self, voucher: &VoucherRecord) -> Result<VoucherRecord, RepoError>;

    async fn list_active_promotions(
        &self,
        page: PageRequest,
    ) -> Result<Paged<PromotionRecord>, RepoError>;

    async fn save_promotion(
        &self,
        promotion: &PromotionRecord,
    ) -> Result<PromotionRecord, RepoError>;
}

#[async_trait]
pub trait ContentRepo: Send + Sync {
    async fn list_posts(&self, page: PageRequest) -> Result<Paged<PostRecord>, RepoError>;

    async fn find_post(&self, slug: &str) -> Result<Option<PostDetail>, RepoError>;

    async fn insert_comment(
        &self,
        slug: &str,
        comment: &NewComment,
    ) -> Result<CommentRecord, RepoError>;

    async fn save_post(&self, post: &PostRecord, body: &str) -> Result<PostRecord, RepoError>;
}

#[async_trait]
pub trait AccountRepo: Send + Sync {
    async fn find_session(&self, token: &str) -> Result<Option<SessionUser>, RepoError>;

    async fn revoke_session(&self, token: &str) -> Result<(), RepoError>;

    async fn find_profile(&self, user_id: Uuid) -> Result<Option<ProfileRecord>, RepoError>;

    async fn update_profile(
        &self,
        user_id: Uuid,
        update: &ProfileUpdate,
    ) -> Result<ProfileRecord, RepoError>;

    async fn list_addresses(&self, user_id: Uuid) -> Result<Vec<AddressRecord>, RepoError>;

    async fn save_address(&self, address: &AddressRecord) -> Result<AddressRecord, RepoError>;

    async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<(), RepoError>;

    async fn list_wishlist(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<WishlistItem>, RepoError>;

    /// Add the product if absent, remove it otherwise. Returns whether it
    /// is now in the wishlist.
    async fn toggle_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, RepoError>;

    async fn find_loyalty(&self, user_id: Uuid) -> Result<Option<LoyaltyInfo>, RepoError>;

    async fn adjust_points(&self, user_id: Uuid, delta: i64) -> Result<LoyaltyInfo, RepoError>;

    async fn list_membership_tiers(&self) -> Result<Vec<MembershipTierRecord>, RepoError>;

    async fn save_membership_tier(
        &self,
        tier: &MembershipTierRecord,
    ) -> Result<MembershipTierRecord, RepoError>;
}

#[async_trait]
pub trait CommerceRepo: Send + Sync {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderRecord>, RepoError>;

    async fn list_orders(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<OrderRecord>, RepoError>;

    /// Turn the user's cart into an order, redeeming `voucher` if given.
    async fn place_order(
        &self,
        user_id: Uuid,
        voucher: Option<&str>,
    ) -> Result<OrderRecord, RepoError>;

    async fn list_support_tickets(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<SupportTicketRecord>, RepoError>;

    async fn open_support_ticket(
        &self,
        user_id: Uuid,
        subject: &str,
    ) -> Result<SupportTicketRecord, RepoError>;

    async fn list_cart(&self, user_id: Uuid) -> Result<Vec<CartItemRecord>, RepoError>;

    async fn add_to_cart(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Vec<CartItemRecord>, RepoError>;
}

#[async_trait]
pub trait ReferenceRepo: Send + Sync {
    async fn list_stores(&self) -> Result<Vec<StoreRecord>, RepoError>;

    async fn find_store(&self, id: Uuid) -> Result<Option<StoreRecord>, RepoError>;

    async fn save_store(&self, store: &StoreRecord) -> Result<StoreRecord, RepoError>;

    async fn list_payment_methods(&self) -> Result<Vec<PaymentMethodRecord>, RepoError>;

    async fn save_payment_method(
        &self,
        method: &PaymentMethodRecord,
    ) -> Result<PaymentMethodRecord, RepoError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_all_is_reserved() {
        let all = Segment::new("all").expect("valid segment");
        assert!(matches!(
            CategoryFilter::only(all),
            Err(KeyError::ReservedWord { .. })
        ));
        assert_eq!(CategoryFilter::All.to_string(), "all");
    }

    #[test]
    fn default_listing_is_newest_first() {
        let listing = ProductListing::default();
        assert_eq!(listing.sort.as_str(), "created_at");
        assert_eq!(listing.order.as_str(), "desc");
        assert_eq!(listing.page, PageRequest::default());
    }
}
