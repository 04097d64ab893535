//! Phase evaluation
//!
//! Conditions are checked in a fixed priority order and the first match
//! wins. "Running" is checked before any failure signal: during a rolling
//! update both can hold for the same revision and the component is then
//! reported as Running.

use dbplane_common::crd::ComponentPhase;

/// Everything the phase depends on, gathered once per pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseSignals {
    /// The component is being deleted
    pub deleting: bool,
    /// Desired replicas and the live workload replicas are both zero
    pub zero_replicas: bool,
    /// At least one pod exists
    pub has_pods: bool,
    /// The workload is on its latest revision with every replica ready
    pub workload_running: bool,
    /// Every config template has been applied by the pods
    pub config_synced: bool,
    /// A volume expansion has not finished
    pub volume_expanding: bool,
    /// Some failure signal has passed its grace period
    pub has_failure: bool,
    /// At least one ready pod on the latest revision (holding the leader
    /// role for role-aware kinds)
    pub available: bool,
}

/// Next phase for the given signals and current phase
pub fn compute_phase(signals: &PhaseSignals, current: Option<ComponentPhase>) -> ComponentPhase {
    if signals.deleting {
        return ComponentPhase::Deleting;
    }
    if signals.zero_replicas {
        return if signals.has_pods {
            ComponentPhase::Stopping
        } else {
            ComponentPhase::Stopped
        };
    }
    if signals.workload_running && signals.config_synced && !signals.volume_expanding {
        return ComponentPhase::Running;
    }
    if !signals.has_failure {
        return match current {
            None | Some(ComponentPhase::Creating) => ComponentPhase::Creating,
            Some(_) => ComponentPhase::Updating,
        };
    }
    if !signals.available {
        ComponentPhase::Failed
    } else {
        ComponentPhase::Abnormal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> PhaseSignals {
        PhaseSignals {
            has_pods: true,
            workload_running: true,
            config_synced: true,
            available: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_deleting_wins_over_everything() {
        let signals = PhaseSignals {
            deleting: true,
            zero_replicas: true,
            has_failure: true,
            ..running()
        };
        assert_eq!(compute_phase(&signals, Some(ComponentPhase::Running)), ComponentPhase::Deleting);
    }

    #[test]
    fn test_zero_replicas_stops() {
        let mut signals = PhaseSignals {
            zero_replicas: true,
            has_pods: true,
            ..Default::default()
        };
        assert_eq!(compute_phase(&signals, Some(ComponentPhase::Running)), ComponentPhase::Stopping);
        signals.has_pods = false;
        assert_eq!(compute_phase(&signals, Some(ComponentPhase::Stopping)), ComponentPhase::Stopped);
    }

    #[test]
    fn test_running_regardless_of_prior_phase() {
        for prior in [
            None,
            Some(ComponentPhase::Creating),
            Some(ComponentPhase::Failed),
            Some(ComponentPhase::Abnormal),
            Some(ComponentPhase::Updating),
        ] {
            assert_eq!(compute_phase(&running(), prior), ComponentPhase::Running);
        }
    }

    #[test]
    fn test_running_checked_before_failure() {
        let signals = PhaseSignals {
            has_failure: true,
            ..running()
        };
        assert_eq!(compute_phase(&signals, None), ComponentPhase::Running);
    }

    #[test]
    fn test_unsynced_config_or_expansion_blocks_running() {
        let unsynced = PhaseSignals {
            config_synced: false,
            ..running()
        };
        assert_eq!(
            compute_phase(&unsynced, Some(ComponentPhase::Running)),
            ComponentPhase::Updating
        );
        let expanding = PhaseSignals {
            volume_expanding: true,
            ..running()
        };
        assert_eq!(compute_phase(&expanding, None), ComponentPhase::Creating);
    }

    #[test]
    fn test_creating_until_first_success() {
        let signals = PhaseSignals {
            has_pods: true,
            ..Default::default()
        };
        assert_eq!(compute_phase(&signals, None), ComponentPhase::Creating);
        assert_eq!(
            compute_phase(&signals, Some(ComponentPhase::Creating)),
            ComponentPhase::Creating
        );
        assert_eq!(
            compute_phase(&signals, Some(ComponentPhase::Abnormal)),
            ComponentPhase::Updating
        );
    }

    #[test]
    fn test_failure_splits_on_availability() {
        let mut signals = PhaseSignals {
            has_pods: true,
            has_failure: true,
            ..Default::default()
        };
        assert_eq!(compute_phase(&signals, None), ComponentPhase::Failed);
        signals.available = true;
        assert_eq!(compute_phase(&signals, None), ComponentPhase::Abnormal);
    }
}
