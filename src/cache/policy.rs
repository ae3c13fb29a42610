//! Declarative freshness policy, one row per key family.
//!
//! The read path resolves TTLs here and the invalidation path reads the same
//! rows to find the pattern covering a family.

use std::num::NonZeroU64;

use thiserror::Error;

use super::keys::{Family, KeyPattern};
use super::ttl::{DurationError, Freshness, Ttl};

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;

/// Default lifetime of indefinite-class entries.
pub const DEFAULT_INDEFINITE_TTL: NonZeroU64 = NonZeroU64::new(24 * HOUR).unwrap();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("unknown cache family `{name}`")]
    UnknownFamily { name: String },
    #[error("cache family `{family}` is never cached and cannot be given a TTL")]
    NeverCached { family: Family },
    #[error("TTL for cache family `{family}` must be greater than zero")]
    ZeroTtl { family: Family },
    #[error("invalid TTL for cache family `{family}`: {source}")]
    Duration {
        family: Family,
        #[source]
        source: DurationError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyEntry {
    pub family: Family,
    pub freshness: Freshness,
    pub ttl: Ttl,
    /// Pattern covering every key of the family.
    pub pattern: KeyPattern,
}

/// Built-in class and TTL of each family. `None` defers to the configured
/// indefinite default.
fn builtin(family: Family) -> (Freshness, Option<u64>) {
    match family {
        Family::UserSession => (Freshness::Session, Some(30 * MINUTE)),
        Family::UserProfile => (Freshness::Session, Some(30 * MINUTE)),
        Family::Addresses => (Freshness::Session, Some(30 * MINUTE)),
        Family::Wishlist => (Freshness::Session, Some(15 * MINUTE)),
        Family::LoyaltyInfo => (Freshness::Long, Some(HOUR)),
        Family::MembershipTiers => (Freshness::Indefinite, None),
        Family::Products => (Freshness::Medium, Some(10 * MINUTE)),
        Family::Product => (Freshness::Medium, Some(10 * MINUTE)),
        Family::ProductTags => (Freshness::Indefinite, None),
        Family::Reviews => (Freshness::Medium, Some(20 * MINUTE)),
        Family::Voucher => (Freshness::Short, Some(2 * MINUTE)),
        Family::Promotions => (Freshness::Short, Some(5 * MINUTE)),
        Family::Posts => (Freshness::Long, Some(6 * HOUR)),
        Family::Post => (Freshness::Long, Some(6 * HOUR)),
        Family::Stores => (Freshness::Indefinite, None),
        Family::Store => (Freshness::Indefinite, None),
        Family::PaymentMethods => (Freshness::Indefinite, None),
        Family::Order => (Freshness::Never, Some(0)),
        Family::MyOrders => (Freshness::Never, Some(0)),
        Family::SupportTickets => (Freshness::Never, Some(0)),
        Family::Cart => (Freshness::Never, Some(0)),
    }
}

/// Family to freshness/TTL table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlPolicy {
    // Indexed by `Family as usize`, in `Family::ALL` order.
    entries: [PolicyEntry; Family::ALL.len()],
}

impl TtlPolicy {
    /// Built-in table with `indefinite_ttl` applied to the indefinite class.
    pub fn new(indefinite_ttl: NonZeroU64) -> Self {
        let entries = Family::ALL.map(|family| {
            let (freshness, secs) = builtin(family);
            let ttl = match secs {
                Some(secs) => Ttl::from_secs(secs),
                None => Ttl::Seconds(indefinite_ttl),
            };
            PolicyEntry {
                family,
                freshness,
                ttl,
                pattern: KeyPattern::family(family),
            }
        });
        Self { entries }
    }

    /// Built-in table plus per-family overrides keyed by family name.
    pub fn with_overrides<'a>(
        indefinite_ttl: NonZeroU64,
        overrides: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, PolicyError> {
        let mut policy = Self::new(indefinite_ttl);
        for (name, duration) in overrides {
            let family = Family::from_name(name).ok_or_else(|| PolicyError::UnknownFamily {
                name: name.to_string(),
            })?;
            let ttl =
                Ttl::parse(duration).map_err(|source| PolicyError::Duration { family, source })?;
            policy.override_ttl(family, ttl)?;
        }
        Ok(policy)
    }

    /// Replace the TTL of a cacheable family. Never-class families stay
    /// uncached and a zero TTL is rejected rather than read as "disable".
    pub fn override_ttl(&mut self, family: Family, ttl: Ttl) -> Result<(), PolicyError> {
        let entry = &mut self.entries[family as usize];
        if entry.freshness == Freshness::Never {
            return Err(PolicyError::NeverCached { family });
        }
        if !ttl.is_cacheable() {
            return Err(PolicyError::ZeroTtl { family });
        }
        entry.ttl = ttl;
        Ok(())
    }

    pub fn resolve(&self, family: Family) -> Ttl {
        self.entry(family).ttl
    }

    pub fn freshness(&self, family: Family) -> Freshness {
        self.entry(family).freshness
    }

    pub fn entry(&self, family: Family) -> &PolicyEntry {
        &self.entries[family as usize]
    }

    pub fn entries(&self) -> impl Iterator<Item = &PolicyEntry> {
        self.entries.iter()
    }
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_INDEFINITE_TTL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(policy: &TtlPolicy, family: Family) -> Option<u64> {
        policy.resolve(family).as_secs()
    }

    #[test]
    fn builtin_table_matches_documented_ttls() {
        let policy = TtlPolicy::default();
        assert_eq!(secs(&policy, Family::Wishlist), Some(900));
        assert_eq!(secs(&policy, Family::Addresses), Some(1800));
        assert_eq!(secs(&policy, Family::Voucher), Some(120));
        assert_eq!(secs(&policy, Family::Promotions), Some(300));
        assert_eq!(secs(&policy, Family::Products), Some(600));
        assert_eq!(secs(&policy, Family::Reviews), Some(1200));
        assert_eq!(secs(&policy, Family::Posts), Some(21_600));
        assert_eq!(secs(&policy, Family::LoyaltyInfo), Some(3600));
        assert_eq!(secs(&policy, Family::Stores), Some(86_400));
        assert_eq!(secs(&policy, Family::ProductTags), Some(86_400));
        assert_eq!(policy.resolve(Family::Order), Ttl::Never);
        assert_eq!(policy.resolve(Family::Cart), Ttl::Never);
    }

    #[test]
    fn rows_follow_family_order() {
        let policy = TtlPolicy::default();
        for family in Family::ALL {
            assert_eq!(policy.entry(family).family, family);
        }
    }

    #[test]
    fn indefinite_default_is_configurable() {
        let policy = TtlPolicy::new(NonZeroU64::new(7200).expect("non-zero"));
        assert_eq!(secs(&policy, Family::PaymentMethods), Some(7200));
        assert_eq!(secs(&policy, Family::Products), Some(600));
    }

    #[test]
    fn overrides_parse_human_durations() {
        let policy = TtlPolicy::with_overrides(
            NonZeroU64::new(86_400).expect("non-zero"),
            [("products", "2 minutes"), ("stores", "2 days")],
        )
        .expect("valid overrides");
        assert_eq!(secs(&policy, Family::Products), Some(120));
        assert_eq!(secs(&policy, Family::Stores), Some(172_800));
        assert_eq!(policy.freshness(Family::Stores), Freshness::Indefinite);
    }

    #[test]
    fn invalid_overrides_are_rejected() {
        let base = NonZeroU64::new(86_400).expect("non-zero");
        assert!(matches!(
            TtlPolicy::with_overrides(base, [("products", "banana")]),
            Err(PolicyError::Duration {
                family: Family::Products,
                source: DurationError::InvalidFormat { .. }
            })
        ));
        assert_eq!(
            TtlPolicy::with_overrides(base, [("orders_v2", "1 hour")]),
            Err(PolicyError::UnknownFamily {
                name: "orders_v2".to_string()
            })
        );
        assert_eq!(
            TtlPolicy::with_overrides(base, [("order", "1 hour")]),
            Err(PolicyError::NeverCached {
                family: Family::Order
            })
        );
        assert_eq!(
            TtlPolicy::with_overrides(base, [("voucher", "0 seconds")]),
            Err(PolicyError::ZeroTtl {
                family: Family::Voucher
            })
        );
    }
}
