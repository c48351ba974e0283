//! Static trial-count estimation and progress fractions.

use crate::description::{NodeDescription, TimelineDescription};

/// Leaf invocations a timeline would perform if every conditional passed, no
/// loop function asked for more and sampling kept the set count. Each content
/// item counts one (trial) or its own estimate (timeline); the sum is scaled by
/// `repetitions` and by the number of variable sets. Saturates at `usize::MAX`.
pub fn naive_trial_count(description: &TimelineDescription) -> usize {
    let per_set = description
        .timeline
        .iter()
        .map(|item| match item {
            NodeDescription::Trial(_) => 1,
            NodeDescription::Timeline(timeline) => naive_trial_count(timeline),
        })
        .fold(0usize, usize::saturating_add);
    per_set
        .saturating_mul(description.repetitions.unwrap_or(1))
        .saturating_mul(description.variable_set_count().max(1))
}

/// `completed / estimate` clamped to `[0, 1]`. With nothing to run, a settled
/// timeline is done and an unsettled one has not begun.
pub fn progress_fraction(completed: usize, estimate: usize, settled: bool) -> f64 {
    if estimate == 0 {
        return if settled { 1.0 } else { 0.0 };
    }
    (completed as f64 / estimate as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::TrialDescription;
    use trellis_types::VariableSet;

    #[test]
    fn nested_estimate_multiplies_out() {
        let desc = TimelineDescription::default()
            .push(TrialDescription::new("a"))
            .push(
                TimelineDescription::default()
                    .push(TrialDescription::new("b"))
                    .repetitions(2),
            )
            .push(
                TimelineDescription::default()
                    .push(TrialDescription::new("c"))
                    .repetitions(5),
            )
            .repetitions(3)
            .timeline_variables(vec![VariableSet::new(), VariableSet::new()]);
        assert_eq!(naive_trial_count(&desc), 48);
    }

    #[test]
    fn huge_repetition_counts_saturate() {
        let desc = TimelineDescription::default()
            .push(
                TimelineDescription::default()
                    .push(TrialDescription::new("a"))
                    .repetitions(usize::MAX),
            )
            .push(TrialDescription::new("b"))
            .repetitions(2);
        assert_eq!(naive_trial_count(&desc), usize::MAX);
        assert!(progress_fraction(3, naive_trial_count(&desc), false) < 1e-12);
    }

    #[test]
    fn empty_timeline_counts_zero() {
        assert_eq!(naive_trial_count(&TimelineDescription::default()), 0);
    }

    #[test]
    fn fraction_is_clamped() {
        assert_eq!(progress_fraction(0, 4, false), 0.0);
        assert_eq!(progress_fraction(2, 4, false), 0.5);
        assert_eq!(progress_fraction(9, 4, false), 1.0);
        assert_eq!(progress_fraction(0, 0, false), 0.0);
        assert_eq!(progress_fraction(0, 0, true), 1.0);
    }
}
