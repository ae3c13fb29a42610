//! Orders, support tickets and carts.
//!
//! These reads are never cached. They still go through [`CacheAside`] so the
//! decision lives in the policy table, which bypasses the store for them.

use std::sync::Arc;

use uuid::Uuid;

use crate::application::error::{AppError, found};
use crate::application::pagination::{PageRequest, Paged};
use crate::application::repos::CommerceRepo;
use crate::cache::{CacheAside, CacheKey, Invalidator, Mutation, Segment};
use crate::domain::entities::{CartItemRecord, OrderRecord, SupportTicketRecord};

#[derive(Clone)]
pub struct CommerceService {
    repo: Arc<dyn CommerceRepo>,
    cache: CacheAside,
    invalidator: Invalidator,
}

impl CommerceService {
    pub fn new(repo: Arc<dyn CommerceRepo>, cache: CacheAside, invalidator: Invalidator) -> Self {
        Self {
            repo,
            cache,
            invalidator,
        }
    }

    pub async fn order(&self, id: Uuid) -> Result<OrderRecord, AppError> {
        let order = self
            .cache
            .cached(&CacheKey::Order { id }, || self.repo.find_order(id))
            .await?;
        found(order)
    }

    pub async fn my_orders(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<OrderRecord>, AppError> {
        let key = CacheKey::MyOrders { user_id, page };
        let orders = self
            .cache
            .cached(&key, || self.repo.list_orders(user_id, page))
            .await?;
        Ok(orders)
    }

    /// Check out the user's cart. A redeemed voucher's cached usage count is
    /// evicted once the order commits.
    pub async fn place_order(
        &self,
        user_id: Uuid,
        voucher: Option<&str>,
    ) -> Result<OrderRecord, AppError> {
        let voucher_segment = voucher.map(Segment::new).transpose()?;
        let order = self
            .invalidator
            .after_commit(
                Mutation::OrderPlaced {
                    user_id,
                    voucher: voucher_segment,
                },
                self.repo.place_order(user_id, voucher),
            )
            .await?;
        Ok(order)
    }

    pub async fn support_tickets(
        &self,
        user_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<SupportTicketRecord>, AppError> {
        let key = CacheKey::SupportTickets { user_id, page };
        let tickets = self
            .cache
            .cached(&key, || self.repo.list_support_tickets(user_id, page))
            .await?;
        Ok(tickets)
    }

    pub async fn open_support_ticket(
        &self,
        user_id: Uuid,
        subject: &str,
    ) -> Result<SupportTicketRecord, AppError> {
        if subject.trim().is_empty() {
            return Err(AppError::validation("ticket subject must not be empty"));
        }
        let ticket = self
            .invalidator
            .after_commit(
                Mutation::SupportTicketChanged { user_id },
                self.repo.open_support_ticket(user_id, subject),
            )
            .await?;
        Ok(ticket)
    }

    pub async fn cart(&self, user_id: Uuid) -> Result<Vec<CartItemRecord>, AppError> {
        let items = self
            .cache
            .cached(&CacheKey::Cart { user_id }, || self.repo.list_cart(user_id))
            .await?;
        Ok(items)
    }

    pub async fn add_to_cart(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: u32,
    ) -> Result<Vec<CartItemRecord>, AppError> {
        if quantity == 0 {
            return Err(AppError::validation("quantity must be positive"));
        }
        let items = self
            .invalidator
            .after_commit(
                Mutation::CartChanged { user_id },
                self.repo.add_to_cart(user_id, product_id, quantity),
            )
            .await?;
        Ok(items)
    }
}
