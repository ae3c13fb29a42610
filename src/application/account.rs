//! Sessions, profiles, addresses, wishlists and loyalty.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::error::{AppError, found};
use crate::application::pagination::{PageRequest, Paged};
use crate::application::repos::AccountRepo;
use crate::cache::{CacheAside, CacheKey, Invalidator, Mutation, Segment};
use crate::domain::entities::{
    AddressRecord, LoyaltyInfo, MembershipTierRecord, ProfileRecord, ProfileUpdate, SessionUser,
    WishlistItem,
};

#[derive(Clone)]
pub struct AccountService {
    repo: Arc<dyn AccountRepo>,
    cache: CacheAside,
    invalidator: Invalidator,
}

impl AccountService {
    pub fn new(repo: Arc<dyn AccountRepo>, cache: CacheAside, invalidator: Invalidator) -> Self {
        Self {
            repo,
            cache,
            invalidator,
        }
    }

    /// Resolve a bearer token to its user.
    pub async fn session(&self, token: &str) -> Result<SessionUser, AppError> {
        let key = CacheKey::UserSession {
            token: Segment::new(token)?,
        };
        let session = self
            .cache
            .cached(&key, || self.repo.find_session(token))
            .await?;
        found(session)
    }

    pub async fn logout(&self, token: &str) -> Result<(), AppError> {
        let token_segment = Segment::new(token)?;
        self.invalidator
            .after_commit(
                Mutation::SessionRevoked {
                    token: token_segment,
                },
                self.repo.revoke_session(token),
            )
            .await?;
        Ok(())
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<ProfileRecord, AppError> {
        let profile = self
            .cache
            .cached(&CacheKey::UserProfile { user_id }, || {
                self.repo.find_profile(user_id)
            })
            .await?;
        found(profile)
    }

    /// Update the profile from the session identified by `token`. Other
    /// sessions of the same user keep their cached name until they expire.
    pub async fn update_profile(
        &self,
        user_id: Uuid,
        token: &str,
        update: ProfileUpdate,
    ) -> Result<ProfileRecord, AppError> {
        if update.full_name.trim().is_empty() {
            return Err(AppError::validation("full name must not be empty"));
        }
        let token = Segment::new(token)?;
        let profile = self
            .invalidator
            .after_commit(
                Mutation::ProfileUpdated { user_id, token },
                self.repo.update_profile(user_id, &update),
            )
            .await?;
        Ok(profile)
    }

    pub async fn addresses(&self, user_id: Uuid) -> Result<Vec<AddressRecord>, AppError> {
        let addresses = self
            .cache
            .cached(&CacheKey::Addresses { user_id }, || {
                self.repo.list_addresses(user_id)
            })
            .await?;
        Ok(addresses)
    }

    pub async fn save_address(&self, address: AddressRecord) -> Result<AddressRecord, AppError> {
        let saved = self
            .invalidator
            .after_commit(
                Mutation::AddressesChanged {
                    user_id: address.user_id,
                },
                self.repo.save_address(&address),
            )
            .await?;
        Ok(saved)
    }

    pub async fn delete_address(&self, user_id: Uuid, address_id: Uuid) -> Result<(), AppError> {
        self.invalidator
            .after_commit(
                Mutation::AddressesChanged { user_id },
                self.repo.delete_address(user_id, address_id),
            )
            .await?;
        Ok(())
    }

    pub async fn wishlist(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<WishlistItem>, AppError> {
        let key = CacheKey::Wishlist { user_id, page };
        let items = self
            .cache
            .cached(&key, || self.repo.list_wishlist(user_id, page))
            .await?;
        Ok(items)
    }

    /// Returns whether the product is now wishlisted.
    pub async fn toggle_wishlist(&self, user_id: Uuid, product_id: Uuid) -> Result<bool, AppError> {
        let listed = self
            .invalidator
            .after_commit(
                Mutation::WishlistChanged { user_id },
                self.repo.toggle_wishlist(user_id, product_id),
            )
            .await?;
        Ok(listed)
    }

    pub async fn loyalty(&self, user_id: Uuid) -> Result<LoyaltyInfo, AppError> {
        let info = self
            .cache
            .cached(&CacheKey::LoyaltyInfo { user_id }, || {
                self.repo.find_loyalty(user_id)
            })
            .await?;
        found(info)
    }

    pub async fn adjust_points(&self, user_id: Uuid, delta: i64) -> Result<LoyaltyInfo, AppError> {
        let info = self
            .invalidator
            .after_commit(
                Mutation::LoyaltyAdjusted { user_id },
                self.repo.adjust_points(user_id, delta),
            )
            .await?;
        Ok(info)
    }

    pub async fn membership_tiers(&self) -> Result<Vec<MembershipTierRecord>, AppError> {
        let tiers = self
            .cache
            .cached(&CacheKey::MembershipTiers, || {
                self.repo.list_membership_tiers()
            })
            .await?;
        Ok(tiers)
    }

    pub async fn save_membership_tier(
        &self,
        tier: MembershipTierRecord,
    ) -> Result<MembershipTierRecord, AppError> {
        if tier.discount_percent > 100 {
            return Err(AppError::validation("discount must not exceed 100%"));
        }
        let saved = self
            .invalidator
            .after_commit(
                Mutation::MembershipTiersChanged,
                self.repo.save_membership_tier(&tier),
            )
            .await?;
        Ok(saved)
    }
}
