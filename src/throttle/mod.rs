//! Local throttling engine
//!
//! Holds the throttle directives applied from the replicated log and the
//! node-local record of which apps recently asked to be checked. The
//! directive map is only written by the consensus apply path; everything
//! else reads it.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Ratio used when a new throttle does not name one
pub const DEFAULT_THROTTLE_RATIO: f64 = 1.0;

/// TTL used when a throttle names neither an expiry nor a TTL
pub const DEFAULT_THROTTLE_TTL_MINUTES: i64 = 60;

/// How long a check keeps an app in the recent-apps map
pub const RECENT_APP_WINDOW_MINUTES: i64 = 60;

/// An active throttle directive for one application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppThrottle {
    pub app_name: String,
    /// Fraction of requests to reject, in `[0, 1]`
    pub ratio: f64,
    /// The throttle is void from this instant on
    pub expire_at: DateTime<Utc>,
    /// Requested duration, informational
    pub ttl_minutes: i64,
}

impl AppThrottle {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire_at <= now
    }
}

/// A recent throttle check by an application, as seen by this node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentApp {
    pub app_name: String,
    pub checked_at: DateTime<Utc>,
    pub minutes_since_checked: i64,
}

/// Resolve the expiry of a throttle request against `now`.
///
/// An explicit `expire_at` wins; otherwise a positive TTL counts from `now`,
/// and anything else falls back to [`DEFAULT_THROTTLE_TTL_MINUTES`].
pub fn resolve_expire_at(
    now: DateTime<Utc>,
    ttl_minutes: i64,
    expire_at: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    match expire_at {
        Some(at) => at,
        None if ttl_minutes > 0 => now + Duration::minutes(ttl_minutes),
        None => now + Duration::minutes(DEFAULT_THROTTLE_TTL_MINUTES),
    }
}

/// Throttle directives plus recent-check bookkeeping
#[derive(Debug, Default)]
pub struct Throttler {
    throttled_apps: RwLock<HashMap<String, AppThrottle>>,
    recent_apps: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Throttler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or refresh a throttle.
    ///
    /// Re-throttling an app overwrites its expiry and TTL; a missing ratio
    /// keeps the current one (or the default for a new entry). Does not read
    /// the clock, so replaying the same calls always yields the same map.
    pub fn throttle_app(
        &self,
        app_name: &str,
        expire_at: DateTime<Utc>,
        ratio: Option<f64>,
        ttl_minutes: i64,
    ) {
        let mut apps = self.throttled_apps.write();
        let ratio = ratio
            .or_else(|| apps.get(app_name).map(|t| t.ratio))
            .unwrap_or(DEFAULT_THROTTLE_RATIO);
        apps.insert(
            app_name.to_string(),
            AppThrottle {
                app_name: app_name.to_string(),
                ratio,
                expire_at,
                ttl_minutes,
            },
        );
    }

    /// Remove a throttle; absent apps are ignored
    pub fn unthrottle_app(&self, app_name: &str) {
        self.throttled_apps.write().remove(app_name);
    }

    /// All throttles still in effect now
    pub fn throttled_apps_map(&self) -> HashMap<String, AppThrottle> {
        self.throttled_apps_map_at(Utc::now())
    }

    /// All throttles still in effect at `now`
    pub fn throttled_apps_map_at(&self, now: DateTime<Utc>) -> HashMap<String, AppThrottle> {
        self.throttled_apps
            .read()
            .iter()
            .filter(|(_, t)| !t.is_expired_at(now))
            .map(|(name, t)| (name.clone(), t.clone()))
            .collect()
    }

    /// Whether a request from `app_name` should be throttled right now.
    ///
    /// Partial ratios are rolled per call.
    pub fn is_app_throttled(&self, app_name: &str) -> bool {
        let ratio = match self.throttled_apps.read().get(app_name) {
            Some(t) if !t.is_expired_at(Utc::now()) => t.ratio,
            _ => return false,
        };
        if ratio >= 1.0 {
            return true;
        }
        if ratio <= 0.0 {
            return false;
        }
        rand::random::<f64>() < ratio
    }

    /// Record a check from `app_name` and report whether it is throttled
    pub fn check_app(&self, app_name: &str) -> bool {
        self.mark_recent_app(app_name, Utc::now());
        self.is_app_throttled(app_name)
    }

    pub fn mark_recent_app(&self, app_name: &str, at: DateTime<Utc>) {
        self.recent_apps.write().insert(app_name.to_string(), at);
    }

    /// Apps checked on this node within the recent-apps window
    pub fn recent_apps_map(&self) -> HashMap<String, RecentApp> {
        let now = Utc::now();
        let window = Duration::minutes(RECENT_APP_WINDOW_MINUTES);

        let mut recent = self.recent_apps.write();
        recent.retain(|_, checked_at| now - *checked_at < window);
        recent
            .iter()
            .map(|(name, checked_at)| {
                (
                    name.clone(),
                    RecentApp {
                        app_name: name.clone(),
                        checked_at: *checked_at,
                        minutes_since_checked: (now - *checked_at).num_minutes(),
                    },
                )
            })
            .collect()
    }

    /// Every stored directive, expired ones included, in key order
    pub(crate) fn snapshot(&self) -> BTreeMap<String, AppThrottle> {
        self.throttled_apps
            .read()
            .iter()
            .map(|(name, t)| (name.clone(), t.clone()))
            .collect()
    }

    /// Replace all directives
    pub(crate) fn restore(&self, apps: BTreeMap<String, AppThrottle>) {
        *self.throttled_apps.write() = apps.into_iter().collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_and_overwrite() {
        let throttler = Throttler::new();
        let now = Utc::now();

        throttler.throttle_app("svc-a", now + Duration::minutes(5), Some(0.5), 5);
        let apps = throttler.throttled_apps_map_at(now);
        assert_eq!(apps["svc-a"].ratio, 0.5);
        assert_eq!(apps["svc-a"].expire_at, now + Duration::minutes(5));

        // Refresh without a ratio keeps the existing one
        throttler.throttle_app("svc-a", now + Duration::minutes(30), None, 30);
        let apps = throttler.throttled_apps_map_at(now);
        assert_eq!(apps["svc-a"].ratio, 0.5);
        assert_eq!(apps["svc-a"].ttl_minutes, 30);

        // A new app without a ratio gets the default
        throttler.throttle_app("svc-b", now + Duration::minutes(1), None, 1);
        assert_eq!(
            throttler.throttled_apps_map_at(now)["svc-b"].ratio,
            DEFAULT_THROTTLE_RATIO
        );
    }

    #[test]
    fn test_expired_throttles_hidden_but_kept() {
        let throttler = Throttler::new();
        let now = Utc::now();

        throttler.throttle_app("old", now - Duration::seconds(1), Some(1.0), 1);
        throttler.throttle_app("new", now + Duration::minutes(1), Some(1.0), 1);

        let apps = throttler.throttled_apps_map_at(now);
        assert!(!apps.contains_key("old"));
        assert!(apps.contains_key("new"));
        assert!(!throttler.is_app_throttled("old"));
        // Still physically present until unthrottled
        assert_eq!(throttler.snapshot().len(), 2);
    }

    #[test]
    fn test_unthrottle_idempotent() {
        let throttler = Throttler::new();
        throttler.throttle_app("svc", Utc::now() + Duration::minutes(1), None, 1);
        throttler.unthrottle_app("svc");
        throttler.unthrottle_app("svc");
        assert!(throttler.throttled_apps_map().is_empty());
    }

    #[test]
    fn test_ratio_extremes() {
        let throttler = Throttler::new();
        let later = Utc::now() + Duration::minutes(10);
        throttler.throttle_app("all", later, Some(1.0), 10);
        throttler.throttle_app("none", later, Some(0.0), 10);

        for _ in 0..50 {
            assert!(throttler.is_app_throttled("all"));
            assert!(!throttler.is_app_throttled("none"));
        }
        assert!(!throttler.is_app_throttled("unknown"));
    }

    #[test]
    fn test_check_app_records_recent() {
        let throttler = Throttler::new();
        assert!(!throttler.check_app("svc-c"));

        throttler.mark_recent_app("stale", Utc::now() - Duration::minutes(90));
        let recent = throttler.recent_apps_map();
        assert!(recent.contains_key("svc-c"));
        assert_eq!(recent["svc-c"].minutes_since_checked, 0);
        assert!(!recent.contains_key("stale"));
    }

    #[test]
    fn test_resolve_expire_at() {
        let now = Utc::now();
        let explicit = now + Duration::minutes(2);
        assert_eq!(resolve_expire_at(now, 30, Some(explicit)), explicit);
        assert_eq!(resolve_expire_at(now, 30, None), now + Duration::minutes(30));
        assert_eq!(
            resolve_expire_at(now, 0, None),
            now + Duration::minutes(DEFAULT_THROTTLE_TTL_MINUTES)
        );
    }
}
