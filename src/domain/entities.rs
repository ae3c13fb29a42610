//! Domain entities mirrored from the store of record.
//!
//! Every record that a cached read returns is serialized to JSON in the cache
//! store, so these types derive both `Serialize` and `Deserialize`.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::error::DomainError;

// Catalog

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price_cents: i64,
    pub tags: Vec<String>,
    pub image_urls: Vec<String>,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVariantRecord {
    pub id: Uuid,
    pub sku: String,
    pub price_cents: i64,
    pub stock: i32,
}

/// Product detail page: the product, its active variants and a rating
/// summary over approved reviews.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub product: ProductRecord,
    pub variants: Vec<ProductVariantRecord>,
    pub review_count: u32,
    pub average_rating: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRecord {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: Uuid,
    pub product_id: Uuid,
    pub user_id: Uuid,
    pub rating: u8,
    pub body: String,
    pub approved: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub rating: u8,
    pub body: String,
}

impl NewReview {
    pub fn validate(&self) -> Result<(), DomainError> {
        if !(1..=5).contains(&self.rating) {
            return Err(DomainError::validation("rating must be between 1 and 5"));
        }
        if self.body.trim().is_empty() {
            return Err(DomainError::validation("review body must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoucherRecord {
    pub code: String,
    pub discount_percent: u8,
    pub usage_count: u32,
    pub usage_limit: Option<u32>,
    pub expires_at: Option<OffsetDateTime>,
}

impl VoucherRecord {
    pub fn is_redeemable(&self, now: OffsetDateTime) -> bool {
        let within_limit = self
            .usage_limit
            .is_none_or(|limit| self.usage_count < limit);
        let unexpired = self.expires_at.is_none_or(|expires_at| now < expires_at);
        within_limit && unexpired
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub id: Uuid,
    pub name: String,
    pub vouchers: Vec<VoucherRecord>,
    pub starts_at: OffsetDateTime,
    pub ends_at: OffsetDateTime,
}

// Content

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: Uuid,
    pub slug: String,
    pub title: String,
    pub excerpt: String,
    pub author_name: String,
    pub comment_count: u32,
    pub published_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: Uuid,
    pub post_id: Uuid,
    pub author_name: String,
    pub body: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostDetail {
    pub post: PostRecord,
    pub body: String,
    pub comments: Vec<CommentRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub author_name: String,
    pub body: String,
}

impl NewComment {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.author_name.trim().is_empty() {
            return Err(DomainError::validation("comment author must not be empty"));
        }
        if self.body.trim().is_empty() {
            return Err(DomainError::validation("comment body must not be empty"));
        }
        Ok(())
    }
}

// Accounts

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub line1: String,
    pub city: String,
    pub country: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub addresses: Vec<AddressRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileUpdate {
    pub full_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WishlistItem {
    pub product: ProductRecord,
    pub added_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipTierRecord {
    pub id: Uuid,
    pub name: String,
    pub min_points: i64,
    pub discount_percent: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyInfo {
    pub user_id: Uuid,
    pub points: i64,
    pub tier: Option<MembershipTierRecord>,
}

// Reference data

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRecord {
    pub id: Uuid,
    pub name: String,
    pub address: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMethodRecord {
    pub id: Uuid,
    pub name: String,
    pub enabled: bool,
}

// Transactional

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: OrderStatus,
    pub total_cents: i64,
    pub voucher_code: Option<String>,
    pub placed_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportTicketRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subject: String,
    pub open: bool,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemRecord {
    pub product_id: Uuid,
    pub quantity: u32,
}
