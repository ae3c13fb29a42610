//! Write-path invalidation.
//!
//! Each [`Mutation`] names the store-of-record resources it writes and the
//! cache keys/patterns that must go once it commits. Families declare which
//! resources they are derived from ([`Family::reads`]), so the mapping can be
//! checked against the policy table: every cacheable family that reads a
//! written resource is either invalidated or listed in
//! [`ACCEPTED_STALENESS`].

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use metrics::{counter, histogram};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::keys::{CacheKey, Family, KeyPattern, Segment};
use super::metrics::{METRIC_CACHE_INVALIDATED_KEYS, METRIC_CACHE_INVALIDATION_MS};
use super::policy::TtlPolicy;
use super::store::{CacheStore, StoreError};
use super::ttl::Freshness;

/// Tables of the store of record that cached values are derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Resource {
    User,
    Session,
    Address,
    Wishlist,
    LoyaltyAccount,
    MembershipTier,
    Product,
    Tag,
    Review,
    Voucher,
    Promotion,
    Post,
    Comment,
    Store,
    PaymentMethod,
    Order,
    SupportTicket,
    CartItem,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Resource::User => "user",
            Resource::Session => "session",
            Resource::Address => "address",
            Resource::Wishlist => "wishlist",
            Resource::LoyaltyAccount => "loyalty_account",
            Resource::MembershipTier => "membership_tier",
            Resource::Product => "product",
            Resource::Tag => "tag",
            Resource::Review => "review",
            Resource::Voucher => "voucher",
            Resource::Promotion => "promotion",
            Resource::Post => "post",
            Resource::Comment => "comment",
            Resource::Store => "store",
            Resource::PaymentMethod => "payment_method",
            Resource::Order => "order",
            Resource::SupportTicket => "support_ticket",
            Resource::CartItem => "cart_item",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Family {
    /// Resources a cached value of this family is computed from, including
    /// those only contributing aggregates (review ratings on product detail,
    /// comment counts on post listings).
    pub fn reads(self) -> &'static [Resource] {
        use Resource as R;
        match self {
            Family::UserSession => &[R::User, R::Session],
            Family::UserProfile => &[R::User, R::Address],
            Family::Addresses => &[R::Address],
            Family::Wishlist => &[R::Wishlist, R::Product],
            Family::LoyaltyInfo => &[R::LoyaltyAccount, R::MembershipTier],
            Family::MembershipTiers => &[R::MembershipTier],
            Family::Products => &[R::Product, R::Tag],
            Family::Product => &[R::Product, R::Tag, R::Review],
            Family::ProductTags => &[R::Tag],
            Family::Reviews => &[R::Review],
            Family::Voucher => &[R::Voucher],
            Family::Promotions => &[R::Promotion, R::Voucher],
            Family::Posts | Family::Post => &[R::Post, R::Comment],
            Family::Stores | Family::Store => &[R::Store],
            Family::PaymentMethods => &[R::PaymentMethod],
            Family::Order | Family::MyOrders => &[R::Order],
            Family::SupportTickets => &[R::SupportTicket],
            Family::Cart => &[R::CartItem],
        }
    }
}

/// One unit of invalidation work.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Invalidation {
    /// Exact key, where the affected key is derivable from the mutation.
    Key(CacheKey),
    /// Every key of a family (optionally one owner), where the affected
    /// listing pages are unbounded.
    Pattern(KeyPattern),
}

impl Invalidation {
    pub fn family(&self) -> Family {
        match self {
            Invalidation::Key(key) => key.family(),
            Invalidation::Pattern(pattern) => pattern.target(),
        }
    }

    /// Whether executing this invalidation removes `key`.
    pub fn covers(&self, key: &CacheKey) -> bool {
        match self {
            Invalidation::Key(own) => own == key,
            Invalidation::Pattern(pattern) => pattern.matches(key),
        }
    }
}

impl fmt::Display for Invalidation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Invalidation::Key(key) => write!(f, "key {key}"),
            Invalidation::Pattern(pattern) => write!(f, "pattern {pattern}"),
        }
    }
}

/// Staleness tolerated after a mutation: `(mutation kind, family, reason)`.
/// Only short- and session-class families may appear here, so the window is
/// bounded by their TTL.
pub const ACCEPTED_STALENESS: &[(&str, Family, &str)] = &[
    (
        "profile_updated",
        Family::UserSession,
        "only the acting session is evicted; other sessions of the user age out",
    ),
    (
        "product_changed",
        Family::Wishlist,
        "wishlists embed product summaries but are keyed by user, not product",
    ),
    (
        "order_placed",
        Family::Promotions,
        "voucher usage counts shown on promotion pages lag by one TTL",
    ),
];

/// A committed write to the store of record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Logout or token rotation.
    SessionRevoked { token: Segment },
    /// Profile edit made from the session identified by `token`.
    ProfileUpdated { user_id: Uuid, token: Segment },
    AddressesChanged { user_id: Uuid },
    WishlistChanged { user_id: Uuid },
    LoyaltyAdjusted { user_id: Uuid },
    MembershipTiersChanged,
    /// Product created, updated, deleted or restocked.
    ProductChanged { id: Uuid },
    TagsChanged,
    ReviewSubmitted { product_id: Uuid },
    ReviewModerated { product_id: Uuid },
    /// Checkout. Redeeming a voucher bumps its usage count.
    OrderPlaced {
        user_id: Uuid,
        voucher: Option<Segment>,
    },
    VoucherChanged { code: Segment },
    PromotionChanged,
    CommentAdded { post_slug: Segment },
    PostChanged { slug: Segment },
    StoreChanged { id: Uuid },
    PaymentMethodsChanged,
    CartChanged { user_id: Uuid },
    SupportTicketChanged { user_id: Uuid },
}

impl Mutation {
    pub fn kind(&self) -> &'static str {
        match self {
            Mutation::SessionRevoked { .. } => "session_revoked",
            Mutation::ProfileUpdated { .. } => "profile_updated",
            Mutation::AddressesChanged { .. } => "addresses_changed",
            Mutation::WishlistChanged { .. } => "wishlist_changed",
            Mutation::LoyaltyAdjusted { .. } => "loyalty_adjusted",
            Mutation::MembershipTiersChanged => "membership_tiers_changed",
            Mutation::ProductChanged { .. } => "product_changed",
            Mutation::TagsChanged => "tags_changed",
            Mutation::ReviewSubmitted { .. } => "review_submitted",
            Mutation::ReviewModerated { .. } => "review_moderated",
            Mutation::OrderPlaced { .. } => "order_placed",
            Mutation::VoucherChanged { .. } => "voucher_changed",
            Mutation::PromotionChanged => "promotion_changed",
            Mutation::CommentAdded { .. } => "comment_added",
            Mutation::PostChanged { .. } => "post_changed",
            Mutation::StoreChanged { .. } => "store_changed",
            Mutation::PaymentMethodsChanged => "payment_methods_changed",
            Mutation::CartChanged { .. } => "cart_changed",
            Mutation::SupportTicketChanged { .. } => "support_ticket_changed",
        }
    }

    /// Resources written by the mutation.
    pub fn writes(&self) -> &'static [Resource] {
        use Resource as R;
        match self {
            Mutation::SessionRevoked { .. } => &[R::Session],
            Mutation::ProfileUpdated { .. } => &[R::User],
            Mutation::AddressesChanged { .. } => &[R::Address],
            Mutation::WishlistChanged { .. } => &[R::Wishlist],
            Mutation::LoyaltyAdjusted { .. } => &[R::LoyaltyAccount],
            Mutation::MembershipTiersChanged => &[R::MembershipTier],
            Mutation::ProductChanged { .. } => &[R::Product],
            Mutation::TagsChanged => &[R::Tag],
            Mutation::ReviewSubmitted { .. } | Mutation::ReviewModerated { .. } => &[R::Review],
            Mutation::OrderPlaced { voucher: None, .. } => &[R::Order, R::CartItem],
            Mutation::OrderPlaced {
                voucher: Some(_), ..
            } => &[R::Order, R::CartItem, R::Voucher],
            Mutation::VoucherChanged { .. } => &[R::Voucher],
            Mutation::PromotionChanged => &[R::Promotion],
            Mutation::CommentAdded { .. } => &[R::Comment],
            Mutation::PostChanged { .. } => &[R::Post],
            Mutation::StoreChanged { .. } => &[R::Store],
            Mutation::PaymentMethodsChanged => &[R::PaymentMethod],
            Mutation::CartChanged { .. } => &[R::CartItem],
            Mutation::SupportTicketChanged { .. } => &[R::SupportTicket],
        }
    }

    /// Keys and patterns to delete once the mutation has committed.
    pub fn invalidations(&self) -> Vec<Invalidation> {
        use Invalidation::{Key, Pattern};
        match self {
            Mutation::SessionRevoked { token } => vec![Key(CacheKey::UserSession {
                token: token.clone(),
            })],
            Mutation::ProfileUpdated { user_id, token } => vec![
                Key(CacheKey::UserProfile { user_id: *user_id }),
                Key(CacheKey::UserSession {
                    token: token.clone(),
                }),
            ],
            Mutation::AddressesChanged { user_id } => vec![
                Key(CacheKey::Addresses { user_id: *user_id }),
                Key(CacheKey::UserProfile { user_id: *user_id }),
            ],
            Mutation::WishlistChanged { user_id } => {
                vec![Pattern(KeyPattern::scoped(Family::Wishlist, *user_id))]
            }
            Mutation::LoyaltyAdjusted { user_id } => {
                vec![Key(CacheKey::LoyaltyInfo { user_id: *user_id })]
            }
            Mutation::MembershipTiersChanged => vec![
                Key(CacheKey::MembershipTiers),
                Pattern(KeyPattern::family(Family::LoyaltyInfo)),
            ],
            Mutation::ProductChanged { id } => vec![
                Key(CacheKey::Product { id: *id }),
                Pattern(KeyPattern::family(Family::Products)),
            ],
            Mutation::TagsChanged => vec![
                Pattern(KeyPattern::family(Family::ProductTags)),
                Pattern(KeyPattern::family(Family::Products)),
                Pattern(KeyPattern::family(Family::Product)),
            ],
            Mutation::ReviewSubmitted { product_id } | Mutation::ReviewModerated { product_id } => {
                vec![
                    Pattern(KeyPattern::scoped(Family::Reviews, *product_id)),
                    Key(CacheKey::Product { id: *product_id }),
                ]
            }
            Mutation::OrderPlaced { voucher, .. } => voucher
                .iter()
                .map(|code| Key(CacheKey::Voucher { code: code.clone() }))
                .collect(),
            Mutation::VoucherChanged { code } => vec![
                Key(CacheKey::Voucher { code: code.clone() }),
                Pattern(KeyPattern::family(Family::Promotions)),
            ],
            Mutation::PromotionChanged => {
                vec![Pattern(KeyPattern::family(Family::Promotions))]
            }
            Mutation::CommentAdded { post_slug: slug } | Mutation::PostChanged { slug } => vec![
                Key(CacheKey::Post { slug: slug.clone() }),
                Pattern(KeyPattern::family(Family::Posts)),
            ],
            Mutation::StoreChanged { id } => vec![
                Key(CacheKey::Stores),
                Key(CacheKey::Store { id: *id }),
            ],
            Mutation::PaymentMethodsChanged => vec![Key(CacheKey::PaymentMethods)],
            Mutation::CartChanged { .. } | Mutation::SupportTicketChanged { .. } => Vec::new(),
        }
    }

    /// Cacheable families derived from a written resource that this mutation
    /// neither invalidates nor lists as accepted staleness.
    pub fn uncovered_families(&self, policy: &TtlPolicy) -> Vec<Family> {
        let writes = self.writes();
        let invalidated: HashSet<Family> =
            self.invalidations().iter().map(Invalidation::family).collect();
        Family::ALL
            .into_iter()
            .filter(|family| policy.freshness(*family) != Freshness::Never)
            .filter(|family| family.reads().iter().any(|res| writes.contains(res)))
            .filter(|family| !invalidated.contains(family))
            .filter(|family| {
                !ACCEPTED_STALENESS
                    .iter()
                    .any(|(kind, accepted, _)| *kind == self.kind() && accepted == family)
            })
            .collect()
    }

    /// One instance of every mutation, with placeholder ids. Optional
    /// parameters are filled so the widest invalidation set is shown.
    pub fn samples() -> Vec<Mutation> {
        let id = Uuid::nil();
        let token = Segment::placeholder("<token>");
        let code = Segment::placeholder("<code>");
        let slug = Segment::placeholder("<slug>");
        vec![
            Mutation::SessionRevoked {
                token: token.clone(),
            },
            Mutation::ProfileUpdated { user_id: id, token },
            Mutation::AddressesChanged { user_id: id },
            Mutation::WishlistChanged { user_id: id },
            Mutation::LoyaltyAdjusted { user_id: id },
            Mutation::MembershipTiersChanged,
            Mutation::ProductChanged { id },
            Mutation::TagsChanged,
            Mutation::ReviewSubmitted { product_id: id },
            Mutation::ReviewModerated { product_id: id },
            Mutation::OrderPlaced {
                user_id: id,
                voucher: Some(code.clone()),
            },
            Mutation::VoucherChanged { code },
            Mutation::PromotionChanged,
            Mutation::CommentAdded {
                post_slug: slug.clone(),
            },
            Mutation::PostChanged { slug },
            Mutation::StoreChanged { id },
            Mutation::PaymentMethodsChanged,
            Mutation::CartChanged { user_id: id },
            Mutation::SupportTicketChanged { user_id: id },
        ]
    }
}

/// Deduplicated invalidation work for a batch of mutations.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    /// Kinds of the mutations folded into the plan.
    pub mutations: Vec<&'static str>,
    pub patterns: Vec<KeyPattern>,
    /// Exact keys not already covered by one of `patterns`.
    pub keys: Vec<CacheKey>,
}

impl InvalidationPlan {
    pub fn from_mutations<'a>(mutations: impl IntoIterator<Item = &'a Mutation>) -> Self {
        let mut plan = Self::default();
        let mut seen = HashSet::new();
        let mut keys = Vec::new();

        for mutation in mutations {
            plan.mutations.push(mutation.kind());
            for invalidation in mutation.invalidations() {
                if !seen.insert(invalidation.clone()) {
                    continue;
                }
                match invalidation {
                    Invalidation::Key(key) => keys.push(key),
                    Invalidation::Pattern(pattern) => plan.patterns.push(pattern),
                }
            }
        }

        plan.keys = keys
            .into_iter()
            .filter(|key| !plan.patterns.iter().any(|pattern| pattern.matches(key)))
            .collect();
        plan
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.keys.is_empty()
    }

    /// Total number of store operations the plan issues.
    pub fn len(&self) -> usize {
        self.patterns.len() + self.keys.len()
    }

    fn targets(&self) -> impl Iterator<Item = Invalidation> + '_ {
        self.patterns
            .iter()
            .cloned()
            .map(Invalidation::Pattern)
            .chain(self.keys.iter().cloned().map(Invalidation::Key))
    }
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ mutations: [{}], patterns: {}, keys: {} }}",
            self.mutations.join(", "),
            self.patterns.len(),
            self.keys.len(),
        )
    }
}

/// Outcome of executing a plan.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub deleted: u64,
    /// Targets whose delete failed, with the store error.
    pub failed: Vec<(String, StoreError)>,
}

impl InvalidationReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runs invalidation plans against the cache store after writes commit.
#[derive(Clone)]
pub struct Invalidator {
    store: Arc<dyn CacheStore>,
}

impl Invalidator {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    /// Await `commit`, then invalidate for `mutation`. Nothing is invalidated
    /// when the commit fails.
    pub async fn after_commit<T, E, Fut>(&self, mutation: Mutation, commit: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.after_commit_with(commit, |_| vec![mutation]).await
    }

    /// Like [`after_commit`](Self::after_commit) when the mutations depend on
    /// the committed value (ids assigned by the store of record, slugs looked
    /// up during the write).
    pub async fn after_commit_with<T, E, Fut, M>(&self, commit: Fut, mutations: M) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        M: FnOnce(&T) -> Vec<Mutation>,
    {
        let value = commit.await?;
        let mutations = mutations(&value);
        self.invalidate(&mutations).await;
        Ok(value)
    }

    /// Plan and execute invalidation for already-committed mutations.
    ///
    /// Failures are logged and reported, never raised: the write has
    /// committed and affected entries will age out with their TTL.
    #[instrument(skip_all, fields(mutations = mutations.len()))]
    pub async fn invalidate(&self, mutations: &[Mutation]) -> InvalidationReport {
        let plan = InvalidationPlan::from_mutations(mutations);
        self.execute(&plan).await
    }

    pub async fn execute(&self, plan: &InvalidationPlan) -> InvalidationReport {
        if plan.is_empty() {
            return InvalidationReport::default();
        }
        let started_at = Instant::now();

        let outcomes = join_all(plan.targets().map(|target| {
            let store = Arc::clone(&self.store);
            async move {
                let result = match &target {
                    Invalidation::Key(key) => store.delete(&key.to_string()).await,
                    Invalidation::Pattern(pattern) => {
                        store.delete_by_pattern(&pattern.to_string()).await
                    }
                };
                (target, result)
            }
        }))
        .await;

        let mut report = InvalidationReport::default();
        for (target, result) in outcomes {
            match result {
                Ok(deleted) => {
                    counter!(METRIC_CACHE_INVALIDATED_KEYS, "family" => target.family().name())
                        .increment(deleted);
                    report.deleted += deleted;
                }
                Err(err) => {
                    warn!(invalidation = %target, error = %err, "Cache invalidation failed");
                    report.failed.push((target.to_string(), err));
                }
            }
        }

        histogram!(METRIC_CACHE_INVALIDATION_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            plan = %plan,
            deleted = report.deleted,
            failed = report.failed.len(),
            "Cache invalidation complete"
        );
        report
    }

    /// Delete every key matching a raw glob pattern.
    pub async fn delete_matching(&self, pattern: &str) -> Result<u64, StoreError> {
        let deleted = self.store.delete_by_pattern(pattern).await?;
        info!(pattern, deleted, "Deleted cache keys by pattern");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroU64;

    use super::*;
    use crate::application::pagination::PageRequest;
    use crate::cache::store::MemoryStore;

    fn id(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn slug(value: &str) -> Segment {
        Segment::new(value).expect("valid segment")
    }

    async fn seed(store: &MemoryStore, keys: &[CacheKey]) {
        let ttl = NonZeroU64::new(600).expect("non-zero");
        for key in keys {
            store.set(&key.to_string(), "1", ttl).await.expect("seed");
        }
    }

    #[test]
    fn plan_dedupes_and_drops_keys_under_patterns() {
        let mutations = [
            Mutation::ProductChanged { id: id(1) },
            Mutation::ProductChanged { id: id(1) },
            Mutation::TagsChanged,
        ];
        let plan = InvalidationPlan::from_mutations(&mutations);

        assert_eq!(plan.mutations.len(), 3);
        assert_eq!(plan.patterns.len(), 3);
        // product:<id> is covered by the `product:*` pattern from the tag change.
        assert!(plan.keys.is_empty());
        assert!(plan.to_string().contains("product_changed"));
    }

    #[test]
    fn order_without_voucher_invalidates_nothing() {
        let mutation = Mutation::OrderPlaced {
            user_id: id(1),
            voucher: None,
        };
        assert!(mutation.invalidations().is_empty());
        assert!(
            mutation
                .uncovered_families(&TtlPolicy::default())
                .is_empty()
        );
    }

    #[tokio::test]
    async fn review_invalidates_only_its_product() {
        let store = Arc::new(MemoryStore::new());
        let page = PageRequest::default();
        let keep = [
            CacheKey::Reviews {
                product_id: id(2),
                page,
            },
            CacheKey::Product { id: id(2) },
        ];
        let evict = [
            CacheKey::Reviews {
                product_id: id(1),
                page,
            },
            CacheKey::Reviews {
                product_id: id(1),
                page: PageRequest::new(2, 20),
            },
            CacheKey::Product { id: id(1) },
        ];
        seed(&store, &keep).await;
        seed(&store, &evict).await;

        let invalidator = Invalidator::new(store.clone());
        let report = invalidator
            .invalidate(&[Mutation::ReviewSubmitted { product_id: id(1) }])
            .await;

        assert_eq!(report.deleted, 3);
        assert!(report.is_complete());
        for key in &keep {
            assert!(store.get(&key.to_string()).await.expect("get").is_some());
        }
        for key in &evict {
            assert!(store.get(&key.to_string()).await.expect("get").is_none());
        }
    }

    #[tokio::test]
    async fn failed_commit_invalidates_nothing() {
        let store = Arc::new(MemoryStore::new());
        let key = CacheKey::Post { slug: slug("hello") };
        seed(&store, std::slice::from_ref(&key)).await;

        let invalidator = Invalidator::new(store.clone());
        let result: Result<(), &str> = invalidator
            .after_commit(
                Mutation::PostChanged { slug: slug("hello") },
                async { Err("constraint violation") },
            )
            .await;

        assert_eq!(result, Err("constraint violation"));
        assert!(store.get(&key.to_string()).await.expect("get").is_some());
    }

    #[tokio::test]
    async fn mutations_can_depend_on_committed_value() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, &[CacheKey::Store { id: id(5) }, CacheKey::Stores]).await;

        let invalidator = Invalidator::new(store.clone());
        let created = invalidator
            .after_commit_with(async { Ok::<_, &str>(id(5)) }, |store_id| {
                vec![Mutation::StoreChanged { id: *store_id }]
            })
            .await;

        assert_eq!(created, Ok(id(5)));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_failures_are_reported_not_raised() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let invalidator = Invalidator::new(store);

        let report = invalidator
            .invalidate(&[Mutation::PaymentMethodsChanged])
            .await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].1.is_unavailable());
    }
}
