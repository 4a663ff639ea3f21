//! Typed ID definitions for workers, jobs and externally stored records.

use crate::{define_numbered_id, define_record_key};

// =============================================================================
// Scheduler-owned identifiers
// =============================================================================

define_numbered_id!(
    /// One member of the fixed worker pool, numbered from 1.
    ///
    /// Parses `system-worker-3`, `worker-3` and a bare `3`; always renders
    /// the container name form.
    WorkerId,
    u32,
    "system-worker-",
    min = 1,
    aliases = ["worker-", ""]
);

define_numbered_id!(
    /// Name of a scheduled job section, e.g. `job12`.
    JobName,
    u64,
    "job",
    min = 0
);

impl WorkerId {
    /// Enumerates the pool `1..=max_workers` in placement order.
    pub fn pool(max_workers: u32) -> impl Iterator<Item = WorkerId> {
        (1..=max_workers).map(WorkerId)
    }

    /// Returns whether this worker belongs to a pool of `max_workers`.
    #[must_use]
    pub const fn in_pool(&self, max_workers: u32) -> bool {
        self.0 <= max_workers
    }
}

impl JobName {
    /// Returns the numeric suffix.
    #[must_use]
    pub const fn suffix(&self) -> u64 {
        self.0
    }
}

// =============================================================================
// Subscription store keys
// =============================================================================

define_record_key!(
    /// Primary key of a subscription record.
    SubscriptionId
);

define_record_key!(
    /// Primary key of an available (pollable) API.
    ApiId
);

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdError;
    use proptest::prelude::*;

    #[test]
    fn test_worker_id_accepts_all_forms() {
        let canonical: WorkerId = "system-worker-2".parse().unwrap();
        let short: WorkerId = "worker-2".parse().unwrap();
        let bare: WorkerId = "2".parse().unwrap();
        assert_eq!(canonical, short);
        assert_eq!(canonical, bare);
        assert_eq!(canonical.to_string(), "system-worker-2");
    }

    #[test]
    fn test_worker_id_rejects_zero() {
        let result: Result<WorkerId, _> = "system-worker-0".parse();
        assert!(matches!(
            result.unwrap_err(),
            IdError::OutOfRange { value: 0, min: 1 }
        ));
    }

    #[test]
    fn test_worker_id_invalid_prefix() {
        let result: Result<WorkerId, _> = "node-1".parse();
        assert!(result.unwrap_err().is_prefix_error());
    }

    #[test]
    fn test_worker_pool_order() {
        let pool: Vec<String> = WorkerId::pool(3).map(|w| w.to_string()).collect();
        assert_eq!(
            pool,
            vec!["system-worker-1", "system-worker-2", "system-worker-3"]
        );
        assert!(WorkerId::new(3).unwrap().in_pool(3));
        assert!(!WorkerId::new(4).unwrap().in_pool(3));
    }

    #[test]
    fn test_job_name_roundtrip() {
        let name: JobName = "job17".parse().unwrap();
        assert_eq!(name.suffix(), 17);
        assert_eq!(name.to_string(), "job17");
    }

    #[test]
    fn test_job_name_rejects_leading_zero() {
        let result: Result<JobName, _> = "job07".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidNumber(_)));
    }

    #[test]
    fn test_job_name_rejects_trailing_text() {
        let result: Result<JobName, _> = "job7a".parse();
        assert!(matches!(result.unwrap_err(), IdError::InvalidNumber(_)));
    }

    #[test]
    fn test_job_name_empty() {
        let result: Result<JobName, _> = "".parse();
        assert!(result.unwrap_err().is_empty());
    }

    #[test]
    fn test_job_name_json_is_string() {
        let name = JobName::new(4).unwrap();
        assert_eq!(serde_json::to_string(&name).unwrap(), "\"job4\"");
    }

    #[test]
    fn test_subscription_id_json_is_number() {
        let id = SubscriptionId::new(12345);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "12345");
        let parsed: SubscriptionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_api_id_from_str() {
        assert_eq!("7".parse::<ApiId>().unwrap(), ApiId::new(7));
        assert!("seven".parse::<ApiId>().is_err());
    }

    proptest! {
        #[test]
        fn prop_job_name_display_parses_back(n in any::<u64>()) {
            let name = JobName::new(n).unwrap();
            let parsed: JobName = name.to_string().parse().unwrap();
            prop_assert_eq!(name, parsed);
        }

        #[test]
        fn prop_worker_id_display_parses_back(n in 1u32..) {
            let worker = WorkerId::new(n).unwrap();
            let parsed: WorkerId = worker.to_string().parse().unwrap();
            prop_assert_eq!(worker, parsed);
        }
    }
}
