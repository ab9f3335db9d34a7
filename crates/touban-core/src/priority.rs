//! Priority provider SPI consumed by the task-priority recompute job.
//!
//! Providers are discovered and instantiated by the host process and handed
//! to the manager before the engine starts; each is initialized exactly once.

use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;

/// The slice of a task the recompute job shows to providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskSummary {
    pub id: String,
    pub priority: i32,
    pub created: Option<SystemTime>,
    pub due: Option<SystemTime>,
}

/// Pluggable priority opinion. `None` means "no opinion".
pub trait PriorityServiceProvider: Send + Sync {
    /// Called once before first use, with the engine configuration as the
    /// handle.
    fn initialize(&self, _config: &SchedulerConfig) {}

    fn calculate_priority(&self, task: &TaskSummary) -> Option<i32>;
}

/// How simultaneous non-empty opinions are combined.
///
/// The reference behavior is unspecified, so the rule is explicit
/// configuration rather than a baked-in guess.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CombineRule {
    /// Highest opinion wins; order-independent.
    #[default]
    Max,
    /// First provider (registration order) with an opinion wins.
    FirstNonEmpty,
    /// Sum of all opinions.
    Sum,
}

/// Holds the registered providers and combines their opinions per task.
#[derive(Clone, Default)]
pub struct PriorityServiceManager {
    providers: Vec<Arc<dyn PriorityServiceProvider>>,
    rule: CombineRule,
}

impl PriorityServiceManager {
    pub fn new(rule: CombineRule) -> Self {
        Self {
            providers: Vec::new(),
            rule,
        }
    }

    pub fn register(mut self, provider: Arc<dyn PriorityServiceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Initialize every provider once. Call before handing the manager to
    /// the recompute job.
    pub fn initialize(&self, config: &SchedulerConfig) {
        for provider in &self.providers {
            provider.initialize(config);
        }
        tracing::debug!(
            providers = self.providers.len(),
            rule = ?self.rule,
            "priority providers initialized"
        );
    }

    /// Whether any provider registered. A disabled manager makes the
    /// recompute job a no-op pass.
    pub fn is_enabled(&self) -> bool {
        !self.providers.is_empty()
    }

    /// Ask every provider and combine the non-empty opinions.
    pub fn calculate_priority(&self, task: &TaskSummary) -> Option<i32> {
        let mut opinions = self
            .providers
            .iter()
            .filter_map(|provider| provider.calculate_priority(task));
        match self.rule {
            CombineRule::Max => opinions.max(),
            CombineRule::FirstNonEmpty => opinions.next(),
            CombineRule::Sum => opinions.next().map(|first| first + opinions.sum::<i32>()),
        }
    }
}

impl std::fmt::Debug for PriorityServiceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityServiceManager")
            .field("providers", &self.providers.len())
            .field("rule", &self.rule)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Option<i32>);

    impl PriorityServiceProvider for Fixed {
        fn calculate_priority(&self, _task: &TaskSummary) -> Option<i32> {
            self.0
        }
    }

    fn task() -> TaskSummary {
        TaskSummary {
            id: "TKI:1".into(),
            priority: 2,
            created: None,
            due: None,
        }
    }

    fn manager(rule: CombineRule, opinions: &[Option<i32>]) -> PriorityServiceManager {
        opinions.iter().fold(
            PriorityServiceManager::new(rule),
            |manager, &opinion| manager.register(Arc::new(Fixed(opinion))),
        )
    }

    #[test]
    fn empty_manager_is_disabled_and_has_no_opinion() {
        let manager = PriorityServiceManager::default();
        assert!(!manager.is_enabled());
        assert_eq!(manager.calculate_priority(&task()), None);
    }

    #[test]
    fn max_picks_highest_and_skips_no_opinion() {
        let manager = manager(CombineRule::Max, &[Some(3), None, Some(9), Some(1)]);
        assert!(manager.is_enabled());
        assert_eq!(manager.calculate_priority(&task()), Some(9));
    }

    #[test]
    fn first_non_empty_respects_registration_order() {
        let manager = manager(CombineRule::FirstNonEmpty, &[None, Some(4), Some(9)]);
        assert_eq!(manager.calculate_priority(&task()), Some(4));
    }

    #[test]
    fn sum_adds_all_opinions() {
        let manager = manager(CombineRule::Sum, &[Some(3), None, Some(4)]);
        assert_eq!(manager.calculate_priority(&task()), Some(7));
    }

    #[test]
    fn all_abstain_means_no_opinion() {
        for rule in [CombineRule::Max, CombineRule::FirstNonEmpty, CombineRule::Sum] {
            let manager = manager(rule, &[None, None]);
            assert_eq!(manager.calculate_priority(&task()), None);
        }
    }
}
