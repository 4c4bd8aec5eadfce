//! Organization — the tenant boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "organization_tier", rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Pro,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub tier: Tier,
    /// Opaque secret used to HMAC-sign outbound deliveries and callbacks.
    pub webhook_secret: Vec<u8>,
    pub owner_user_id: Uuid,
    pub notification_email: Option<String>,
    pub notification_webhook_url: Option<String>,
    /// Advisory monthly execution counter; authoritative count can be
    /// recomputed from `executions`. Mutated only by the exec counter
    /// flush, never incremented directly by request handlers.
    pub monthly_execution_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Monthly execution quota for this org's tier.
    pub fn monthly_quota(&self, free_quota: i64, pro_quota: i64) -> i64 {
        match self.tier {
            Tier::Free => free_quota,
            Tier::Pro => pro_quota,
        }
    }

    /// True once the org has consumed its full monthly quota.
    pub fn is_over_quota(&self, free_quota: i64, pro_quota: i64) -> bool {
        self.monthly_execution_count >= self.monthly_quota(free_quota, pro_quota)
    }

    /// Percentage of the monthly quota consumed, clamped to `[0, 100]`.
    pub fn quota_percent(&self, free_quota: i64, pro_quota: i64) -> u8 {
        let quota = self.monthly_quota(free_quota, pro_quota).max(1);
        let pct = self.monthly_execution_count.saturating_mul(100) / quota;
        pct.clamp(0, 100) as u8
    }

    /// Retention window, in days, for executions/tasks/pings of this tier.
    pub fn retention_days(&self, free_days: i64, pro_days: i64) -> i64 {
        match self.tier {
            Tier::Free => free_days,
            Tier::Pro => pro_days,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tier: Tier, count: i64) -> Organization {
        Organization {
            id: Uuid::now_v7(),
            name: "acme".into(),
            tier,
            webhook_secret: b"secret".to_vec(),
            owner_user_id: Uuid::now_v7(),
            notification_email: None,
            notification_webhook_url: None,
            monthly_execution_count: count,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn free_tier_over_quota() {
        let org = sample(Tier::Free, 1_000);
        assert!(org.is_over_quota(1_000, 100_000));
    }

    #[test]
    fn pro_tier_not_over_quota_at_free_ceiling() {
        let org = sample(Tier::Pro, 1_000);
        assert!(!org.is_over_quota(1_000, 100_000));
    }

    #[test]
    fn retention_days_by_tier() {
        assert_eq!(sample(Tier::Free, 0).retention_days(7, 30), 7);
        assert_eq!(sample(Tier::Pro, 0).retention_days(7, 30), 30);
    }

    #[test]
    fn quota_percent_crosses_eighty() {
        let org = sample(Tier::Free, 800);
        assert_eq!(org.quota_percent(1_000, 100_000), 80);
    }

    #[test]
    fn quota_percent_clamps_past_full() {
        let org = sample(Tier::Free, 5_000);
        assert_eq!(org.quota_percent(1_000, 100_000), 100);
    }
}
