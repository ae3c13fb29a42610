//! Cache key definitions.
//!
//! `CacheKey` names one cached read and `KeyPattern` names a family of keys for
//! invalidation. Both render to the colon-delimited layout kept in the store:
//! lowercase tag segments followed by stringified parameters in a fixed order,
//! e.g. `product:<uuid>` or `products:1:20:created_at:desc:all`.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use crate::application::pagination::PageRequest;
use crate::application::repos::ProductListing;

/// Separator between key segments.
pub const DELIMITER: char = ':';

/// Wildcard used by invalidation patterns.
pub const WILDCARD: char = '*';

const RESERVED: &[char] = &[DELIMITER, WILDCARD, '?', '[', ']', '{', '}', '\\'];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key segment must not be empty")]
    Empty,
    #[error("key segment `{segment}` contains reserved character {ch:?}")]
    ReservedCharacter { segment: String, ch: char },
    #[error("key segment `{segment}` is reserved")]
    ReservedWord { segment: String },
}

/// A free-form key parameter (slug, token, voucher code, category) that has
/// been checked at the boundary.
///
/// Segments never contain the delimiter, glob metacharacters or whitespace,
/// so rendered keys cannot collide and patterns cannot match by accident.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Segment(String);

impl Segment {
    pub fn new(value: impl Into<String>) -> Result<Self, KeyError> {
        let value = value.into();
        if value.is_empty() {
            return Err(KeyError::Empty);
        }
        if let Some(ch) = value
            .chars()
            .find(|ch| RESERVED.contains(ch) || ch.is_whitespace() || ch.is_control())
        {
            return Err(KeyError::ReservedCharacter { segment: value, ch });
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unchecked segment for sample keys shown in listings.
    pub(super) fn placeholder(value: &'static str) -> Self {
        Self(value.to_string())
    }
}

impl TryFrom<&str> for Segment {
    type Error = KeyError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A family of cache keys sharing one tag prefix and one freshness policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Family {
    // Account (session class)
    /// Authenticated user resolved from a session token.
    UserSession,
    /// Profile of one user, including saved addresses.
    UserProfile,
    /// Saved shipping addresses of one user.
    Addresses,
    /// Paginated wishlist of one user.
    Wishlist,
    /// Loyalty points and tier of one user.
    LoyaltyInfo,
    /// Membership tier reference table.
    MembershipTiers,

    // Catalog
    /// Paginated, sorted, filtered product listings.
    Products,
    /// Product detail by id.
    Product,
    /// Paginated product tag listing.
    ProductTags,
    /// Paginated approved reviews of one product.
    Reviews,
    /// Voucher lookup by code.
    Voucher,
    /// Paginated active promotions.
    Promotions,

    // Content
    /// Paginated published posts.
    Posts,
    /// Post detail by slug, with comments.
    Post,

    // Reference data
    /// All stores.
    Stores,
    /// Store detail by id.
    Store,
    /// Payment methods reference table.
    PaymentMethods,

    // Transactional (never cached)
    Order,
    MyOrders,
    SupportTickets,
    Cart,
}

impl Family {
    pub const ALL: [Family; 21] = [
        Family::UserSession,
        Family::UserProfile,
        Family::Addresses,
        Family::Wishlist,
        Family::LoyaltyInfo,
        Family::MembershipTiers,
        Family::Products,
        Family::Product,
        Family::ProductTags,
        Family::Reviews,
        Family::Voucher,
        Family::Promotions,
        Family::Posts,
        Family::Post,
        Family::Stores,
        Family::Store,
        Family::PaymentMethods,
        Family::Order,
        Family::MyOrders,
        Family::SupportTickets,
        Family::Cart,
    ];

    /// Stable snake_case name used in configuration, logs and metrics.
    pub fn name(self) -> &'static str {
        match self {
            Family::UserSession => "user_session",
            Family::UserProfile => "user_profile",
            Family::Addresses => "addresses",
            Family::Wishlist => "wishlist",
            Family::LoyaltyInfo => "loyalty_info",
            Family::MembershipTiers => "membership_tiers",
            Family::Products => "products",
            Family::Product => "product",
            Family::ProductTags => "product_tags",
            Family::Reviews => "reviews",
            Family::Voucher => "voucher",
            Family::Promotions => "promotions",
            Family::Posts => "posts",
            Family::Post => "post",
            Family::Stores => "stores",
            Family::Store => "store",
            Family::PaymentMethods => "payment_methods",
            Family::Order => "order",
            Family::MyOrders => "my_orders",
            Family::SupportTickets => "support_tickets",
            Family::Cart => "cart",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.name() == name)
    }

    /// Leading tag segments shared by every key of the family.
    fn prefix(self) -> &'static [&'static str] {
        match self {
            Family::UserSession => &["user", "token"],
            Family::UserProfile => &["user", "profile"],
            Family::Addresses => &["address", "user"],
            Family::Wishlist => &["wishlist", "user"],
            Family::LoyaltyInfo => &["loyalty_info", "user"],
            Family::MembershipTiers => &["membership_tiers"],
            Family::Products => &["products"],
            Family::Product => &["product"],
            Family::ProductTags => &["product_tags"],
            Family::Reviews => &["reviews", "product"],
            Family::Voucher => &["voucher"],
            Family::Promotions => &["promotions", "active"],
            Family::Posts => &["posts"],
            Family::Post => &["post"],
            Family::Stores => &["stores"],
            Family::Store => &["store"],
            Family::PaymentMethods => &["payment_methods"],
            Family::Order => &["order"],
            Family::MyOrders => &["my_orders"],
            Family::SupportTickets => &["support_tickets", "user"],
            Family::Cart => &["cart", "user"],
        }
    }

    /// Families whose keys carry an owning id.
    pub fn is_scopable(self) -> bool {
        self.is_keyed_by_owner()
            || matches!(
                self,
                Family::Wishlist | Family::Reviews | Family::MyOrders | Family::SupportTickets
            )
    }

    /// Families whose keys end at the owning id, so a scoped pattern is the
    /// exact key.
    pub fn is_keyed_by_owner(self) -> bool {
        matches!(
            self,
            Family::UserProfile
                | Family::Addresses
                | Family::LoyaltyInfo
                | Family::Product
                | Family::Store
                | Family::Order
                | Family::Cart
        )
    }

    /// Families whose single key carries no parameters.
    pub fn is_singleton(self) -> bool {
        matches!(
            self,
            Family::MembershipTiers | Family::Stores | Family::PaymentMethods
        )
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Key of one cached read. One variant per family, each with a typed
/// parameter list rendered in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    UserSession { token: Segment },
    UserProfile { user_id: Uuid },
    Addresses { user_id: Uuid },
    Wishlist { user_id: Uuid, page: PageRequest },
    LoyaltyInfo { user_id: Uuid },
    MembershipTiers,
    Products(ProductListing),
    Product { id: Uuid },
    ProductTags(PageRequest),
    Reviews { product_id: Uuid, page: PageRequest },
    Voucher { code: Segment },
    Promotions(PageRequest),
    Posts(PageRequest),
    Post { slug: Segment },
    Stores,
    Store { id: Uuid },
    PaymentMethods,
    Order { id: Uuid },
    MyOrders { user_id: Uuid, page: PageRequest },
    SupportTickets { user_id: Uuid, page: PageRequest },
    Cart { user_id: Uuid },
}

impl CacheKey {
    pub fn family(&self) -> Family {
        match self {
            CacheKey::UserSession { .. } => Family::UserSession,
            CacheKey::UserProfile { .. } => Family::UserProfile,
            CacheKey::Addresses { .. } => Family::Addresses,
            CacheKey::Wishlist { .. } => Family::Wishlist,
            CacheKey::LoyaltyInfo { .. } => Family::LoyaltyInfo,
            CacheKey::MembershipTiers => Family::MembershipTiers,
            CacheKey::Products(_) => Family::Products,
            CacheKey::Product { .. } => Family::Product,
            CacheKey::ProductTags(_) => Family::ProductTags,
            CacheKey::Reviews { .. } => Family::Reviews,
            CacheKey::Voucher { .. } => Family::Voucher,
            CacheKey::Promotions(_) => Family::Promotions,
            CacheKey::Posts(_) => Family::Posts,
            CacheKey::Post { .. } => Family::Post,
            CacheKey::Stores => Family::Stores,
            CacheKey::Store { .. } => Family::Store,
            CacheKey::PaymentMethods => Family::PaymentMethods,
            CacheKey::Order { .. } => Family::Order,
            CacheKey::MyOrders { .. } => Family::MyOrders,
            CacheKey::SupportTickets { .. } => Family::SupportTickets,
            CacheKey::Cart { .. } => Family::Cart,
        }
    }

    /// The owning id that scoped patterns narrow on (user, product, store, order).
    pub fn scope(&self) -> Option<Uuid> {
        match self {
            CacheKey::UserProfile { user_id }
            | CacheKey::Addresses { user_id }
            | CacheKey::Wishlist { user_id, .. }
            | CacheKey::LoyaltyInfo { user_id }
            | CacheKey::MyOrders { user_id, .. }
            | CacheKey::SupportTickets { user_id, .. }
            | CacheKey::Cart { user_id } => Some(*user_id),
            CacheKey::Reviews { product_id, .. } => Some(*product_id),
            CacheKey::Product { id } | CacheKey::Store { id } | CacheKey::Order { id } => {
                Some(*id)
            }
            CacheKey::UserSession { .. }
            | CacheKey::MembershipTiers
            | CacheKey::Products(_)
            | CacheKey::ProductTags(_)
            | CacheKey::Voucher { .. }
            | CacheKey::Promotions(_)
            | CacheKey::Posts(_)
            | CacheKey::Post { .. }
            | CacheKey::Stores
            | CacheKey::PaymentMethods => None,
        }
    }

    /// A representative key of `family`, used when listing the policy table.
    pub fn sample(family: Family) -> CacheKey {
        let id = Uuid::nil();
        let page = PageRequest::default();
        let segment = Segment::placeholder;
        match family {
            Family::UserSession => CacheKey::UserSession {
                token: segment("<token>"),
            },
            Family::UserProfile => CacheKey::UserProfile { user_id: id },
            Family::Addresses => CacheKey::Addresses { user_id: id },
            Family::Wishlist => CacheKey::Wishlist { user_id: id, page },
            Family::LoyaltyInfo => CacheKey::LoyaltyInfo { user_id: id },
            Family::MembershipTiers => CacheKey::MembershipTiers,
            Family::Products => CacheKey::Products(ProductListing::default()),
            Family::Product => CacheKey::Product { id },
            Family::ProductTags => CacheKey::ProductTags(page),
            Family::Reviews => CacheKey::Reviews {
                product_id: id,
                page,
            },
            Family::Voucher => CacheKey::Voucher {
                code: segment("<code>"),
            },
            Family::Promotions => CacheKey::Promotions(page),
            Family::Posts => CacheKey::Posts(page),
            Family::Post => CacheKey::Post {
                slug: segment("<slug>"),
            },
            Family::Stores => CacheKey::Stores,
            Family::Store => CacheKey::Store { id },
            Family::PaymentMethods => CacheKey::PaymentMethods,
            Family::Order => CacheKey::Order { id },
            Family::MyOrders => CacheKey::MyOrders { user_id: id, page },
            Family::SupportTickets => CacheKey::SupportTickets { user_id: id, page },
            Family::Cart => CacheKey::Cart { user_id: id },
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_prefix(f, self.family())?;
        match self {
            CacheKey::UserSession { token } => write_params(f, &[token]),
            CacheKey::UserProfile { user_id }
            | CacheKey::Addresses { user_id }
            | CacheKey::LoyaltyInfo { user_id }
            | CacheKey::Cart { user_id } => write_params(f, &[user_id]),
            CacheKey::Wishlist { user_id, page }
            | CacheKey::MyOrders { user_id, page }
            | CacheKey::SupportTickets { user_id, page } => {
                write_params(f, &[user_id, &page.page(), &page.limit()])
            }
            CacheKey::Reviews { product_id, page } => {
                write_params(f, &[product_id, &page.page(), &page.limit()])
            }
            CacheKey::Products(listing) => write_params(
                f,
                &[
                    &listing.page.page(),
                    &listing.page.limit(),
                    &listing.sort.as_str(),
                    &listing.order.as_str(),
                    &listing.category,
                ],
            ),
            CacheKey::Product { id } | CacheKey::Store { id } | CacheKey::Order { id } => {
                write_params(f, &[id])
            }
            CacheKey::ProductTags(page) | CacheKey::Promotions(page) | CacheKey::Posts(page) => {
                write_params(f, &[&page.page(), &page.limit()])
            }
            CacheKey::Voucher { code } => write_params(f, &[code]),
            CacheKey::Post { slug } => write_params(f, &[slug]),
            CacheKey::MembershipTiers | CacheKey::Stores | CacheKey::PaymentMethods => Ok(()),
        }
    }
}

/// Pattern covering every key of one family, optionally narrowed to one
/// owning id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPattern {
    family: Family,
    scope: Option<Uuid>,
}

impl KeyPattern {
    pub fn family(family: Family) -> Self {
        Self {
            family,
            scope: None,
        }
    }

    /// Pattern over the keys of `family` owned by `scope`. Families whose keys
    /// carry no owning id ignore the scope and cover the whole family. For
    /// families keyed by the owner alone the pattern renders as the exact key.
    pub fn scoped(family: Family, scope: Uuid) -> Self {
        Self {
            family,
            scope: family.is_scopable().then_some(scope),
        }
    }

    pub fn target(&self) -> Family {
        self.family
    }

    /// Structural match, equivalent to glob-matching the rendered strings.
    pub fn matches(&self, key: &CacheKey) -> bool {
        key.family() == self.family && self.scope.is_none_or(|scope| key.scope() == Some(scope))
    }
}

impl fmt::Display for KeyPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_prefix(f, self.family)?;
        if self.family.is_singleton() {
            return Ok(());
        }
        if let Some(scope) = self.scope {
            write!(f, "{DELIMITER}{scope}")?;
            if self.family.is_keyed_by_owner() {
                return Ok(());
            }
        }
        write!(f, "{DELIMITER}{WILDCARD}")
    }
}

fn write_prefix(f: &mut fmt::Formatter<'_>, family: Family) -> fmt::Result {
    for (index, tag) in family.prefix().iter().enumerate() {
        if index > 0 {
            write!(f, "{DELIMITER}")?;
        }
        f.write_str(tag)?;
    }
    Ok(())
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[&dyn fmt::Display]) -> fmt::Result {
    for param in params {
        write!(f, "{DELIMITER}{param}")?;
    }
    Ok(())
}
