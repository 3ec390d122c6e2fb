//! Concurrency planning for the encoder
//!
//! Derives the worker pool size and chapter ordering from configuration and CPU count.

use crate::config::Config;

/// How the chapters of one audiobook may be scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChapterOrdering {
    /// A chapter starts only after the previous one finished
    #[default]
    Sequential,
    /// All chapters may run at once, bounded only by the pool size
    Interleaved,
}

/// Concurrency plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct ConcurrencyPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of encode workers running in parallel
    pub workers: u32,
    pub ordering: ChapterOrdering,
}

impl ConcurrencyPlan {
    /// Derive a concurrency plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus
    /// - Uses `scheduler.concurrency` when non-zero
    /// - Otherwise uses the core count capped at `scheduler.concurrency_cap`
    /// - Never fewer than one worker
    pub fn derive(cfg: &Config) -> Self {
        Self::derive_with_cores(cfg, num_cpus::get() as u32)
    }

    pub fn derive_with_cores(cfg: &Config, total_cores: u32) -> Self {
        let workers = if cfg.scheduler.concurrency > 0 {
            cfg.scheduler.concurrency
        } else {
            derive_workers(total_cores, cfg.scheduler.concurrency_cap)
        };

        let ordering = if cfg.scheduler.sequential_chapters {
            ChapterOrdering::Sequential
        } else {
            ChapterOrdering::Interleaved
        };

        Self {
            total_cores,
            workers,
            ordering,
        }
    }

    /// Fixed plan, mostly for tests and explicit CLI overrides
    pub fn fixed(workers: u32, ordering: ChapterOrdering) -> Self {
        Self {
            total_cores: workers,
            workers: workers.max(1),
            ordering,
        }
    }
}

/// Cores, capped, at least one
fn derive_workers(cores: u32, cap: u32) -> u32 {
    cores.min(cap.max(1)).max(1)
}

/// Public function to derive a concurrency plan from configuration
pub fn derive_plan(cfg: &Config) -> ConcurrencyPlan {
    ConcurrencyPlan::derive(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfig;
    use proptest::prelude::*;

    fn config(concurrency: u32, cap: u32, sequential: bool) -> Config {
        Config {
            scheduler: SchedulerConfig {
                concurrency,
                concurrency_cap: cap,
                sequential_chapters: sequential,
            },
            ..Config::default()
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Auto-derived pool size is the core count capped, never zero.
        #[test]
        fn prop_auto_workers_capped(cores in 1u32..256, cap in 0u32..16) {
            let plan = ConcurrencyPlan::derive_with_cores(&config(0, cap, true), cores);

            prop_assert_eq!(plan.total_cores, cores);
            prop_assert!(plan.workers >= 1);
            prop_assert!(plan.workers <= cap.max(1));
            prop_assert!(plan.workers <= cores);
            prop_assert_eq!(plan.workers, cores.min(cap.max(1)));
        }

        // An explicit concurrency wins over derivation.
        #[test]
        fn prop_explicit_concurrency_override(cores in 1u32..256, explicit in 1u32..64) {
            let plan = ConcurrencyPlan::derive_with_cores(&config(explicit, 4, true), cores);
            prop_assert_eq!(plan.workers, explicit);
        }
    }

    #[test]
    fn test_ordering_from_config() {
        assert_eq!(
            ConcurrencyPlan::derive_with_cores(&config(0, 4, true), 8).ordering,
            ChapterOrdering::Sequential
        );
        assert_eq!(
            ConcurrencyPlan::derive_with_cores(&config(0, 4, false), 8).ordering,
            ChapterOrdering::Interleaved
        );
    }

    #[test]
    fn test_default_config_caps_at_four() {
        let plan = ConcurrencyPlan::derive_with_cores(&Config::default(), 32);
        assert_eq!(plan.workers, 4);
        let plan = ConcurrencyPlan::derive_with_cores(&Config::default(), 2);
        assert_eq!(plan.workers, 2);
    }

    #[test]
    fn test_detected_cores_produce_valid_plan() {
        let plan = derive_plan(&Config::default());
        assert!(plan.total_cores >= 1);
        assert!((1..=4).contains(&plan.workers));
    }

    #[test]
    fn test_fixed_plan_never_zero() {
        assert_eq!(ConcurrencyPlan::fixed(0, ChapterOrdering::Interleaved).workers, 1);
        assert_eq!(ConcurrencyPlan::fixed(3, ChapterOrdering::Sequential).workers, 3);
    }
}
