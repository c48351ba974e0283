//! Variable-set ordering: sampling strategies, the sampler/randomizer seams and
//! the default `rand`-backed implementation.

use std::sync::Mutex;

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use trellis_types::{Result, TrellisError};

use crate::description::TimelineDescription;
use crate::sync::lock;

// ---------------------------------------------------------------------------
// Strategy and options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleStrategy {
    WithReplacement,
    WithoutReplacement,
    FixedRepetitions,
    AlternateGroups,
    Custom,
}

impl SampleStrategy {
    /// Parse a `sample.type` value. Unknown names are a configuration error.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "with-replacement" => Ok(SampleStrategy::WithReplacement),
            "without-replacement" => Ok(SampleStrategy::WithoutReplacement),
            "fixed-repetitions" => Ok(SampleStrategy::FixedRepetitions),
            "alternate-groups" => Ok(SampleStrategy::AlternateGroups),
            "custom" => Ok(SampleStrategy::Custom),
            other => Err(TrellisError::InvalidSampleType {
                sample_type: other.to_string(),
            }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SampleStrategy::WithReplacement => "with-replacement",
            SampleStrategy::WithoutReplacement => "without-replacement",
            SampleStrategy::FixedRepetitions => "fixed-repetitions",
            SampleStrategy::AlternateGroups => "alternate-groups",
            SampleStrategy::Custom => "custom",
        }
    }
}

/// Strategy options carried by the `sample` control parameter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleOptions {
    pub size: Option<usize>,
    pub weights: Option<Vec<f64>>,
    pub groups: Option<Vec<Vec<usize>>>,
    pub randomize_group_order: bool,
}

impl SampleOptions {
    /// Check the options against a strategy and the number of declared variable sets.
    pub fn check(&self, strategy: SampleStrategy, set_count: usize) -> Result<()> {
        let invalid = |message: String| TrellisError::InvalidSampleOptions {
            strategy: strategy.as_str().to_string(),
            message,
        };
        match strategy {
            SampleStrategy::WithReplacement => {
                if let Some(weights) = &self.weights {
                    if weights.len() != set_count {
                        return Err(invalid(format!(
                            "{} weights given for {} variable sets",
                            weights.len(),
                            set_count
                        )));
                    }
                    if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
                        return Err(invalid("weights must be finite and non-negative".into()));
                    }
                    if weights.iter().sum::<f64>() <= 0.0 {
                        return Err(invalid("weights must not all be zero".into()));
                    }
                }
            }
            SampleStrategy::WithoutReplacement => {
                if let Some(size) = self.size {
                    if size > set_count {
                        return Err(invalid(format!(
                            "cannot take a sample of {size} from {set_count} variable sets"
                        )));
                    }
                }
            }
            SampleStrategy::AlternateGroups => {
                let groups = self
                    .groups
                    .as_ref()
                    .filter(|g| !g.is_empty())
                    .ok_or_else(|| invalid("at least one group is required".into()))?;
                if let Some(bad) = groups.iter().flatten().find(|&&i| i >= set_count) {
                    return Err(invalid(format!(
                        "group index {bad} is out of range for {set_count} variable sets"
                    )));
                }
            }
            SampleStrategy::FixedRepetitions | SampleStrategy::Custom => {}
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

/// Produces an order of variable-set indices for one of the library strategies.
/// `custom` never reaches a sampler; the engine calls the description's function.
pub trait Sampler: Send + Sync {
    fn sample(
        &self,
        strategy: SampleStrategy,
        indices: &[usize],
        options: &SampleOptions,
    ) -> Result<Vec<usize>>;
}

/// Uniform permutation used by `randomize_order`.
pub trait Randomizer: Send + Sync {
    fn shuffle(&self, indices: Vec<usize>) -> Vec<usize>;
}

// ---------------------------------------------------------------------------
// RandomSampler
// ---------------------------------------------------------------------------

/// Default sampler and randomizer backed by a seedable [`StdRng`].
pub struct RandomSampler {
    rng: Mutex<StdRng>,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic orderings for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn with_replacement(
        rng: &mut StdRng,
        indices: &[usize],
        size: usize,
        weights: Option<&[f64]>,
    ) -> Result<Vec<usize>> {
        match weights {
            Some(weights) => {
                let dist = WeightedIndex::new(weights).map_err(|e| {
                    TrellisError::InvalidSampleOptions {
                        strategy: SampleStrategy::WithReplacement.as_str().into(),
                        message: e.to_string(),
                    }
                })?;
                Ok((0..size).map(|_| indices[dist.sample(&mut *rng)]).collect())
            }
            None => Ok((0..size)
                .map(|_| indices[rng.gen_range(0..indices.len())])
                .collect()),
        }
    }

    fn alternate_groups(
        rng: &mut StdRng,
        groups: &[Vec<usize>],
        randomize_group_order: bool,
    ) -> Vec<usize> {
        let mut shuffled: Vec<Vec<usize>> = groups.to_vec();
        for group in &mut shuffled {
            group.shuffle(&mut *rng);
        }
        if shuffled.len() == 1 {
            return shuffled.remove(0);
        }
        let mut group_order: Vec<usize> = (0..shuffled.len()).collect();
        if randomize_group_order {
            group_order.shuffle(&mut *rng);
        }
        let shortest = shuffled.iter().map(Vec::len).min().unwrap_or(0);
        let mut out = Vec::with_capacity(shortest * shuffled.len());
        for position in 0..shortest {
            for &group in &group_order {
                out.push(shuffled[group][position]);
            }
        }
        out
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler for RandomSampler {
    fn sample(
        &self,
        strategy: SampleStrategy,
        indices: &[usize],
        options: &SampleOptions,
    ) -> Result<Vec<usize>> {
        options.check(strategy, indices.len())?;
        if indices.is_empty() {
            return Ok(Vec::new());
        }
        let mut rng = lock(&self.rng);
        match strategy {
            SampleStrategy::WithReplacement => Self::with_replacement(
                &mut rng,
                indices,
                options.size.unwrap_or(indices.len()),
                options.weights.as_deref(),
            ),
            SampleStrategy::WithoutReplacement => {
                let mut order = indices.to_vec();
                order.shuffle(&mut *rng);
                order.truncate(options.size.unwrap_or(indices.len()));
                Ok(order)
            }
            SampleStrategy::FixedRepetitions => {
                let repeats = options.size.unwrap_or(1);
                let mut order: Vec<usize> = indices
                    .iter()
                    .flat_map(|&i| std::iter::repeat(i).take(repeats))
                    .collect();
                order.shuffle(&mut *rng);
                Ok(order)
            }
            SampleStrategy::AlternateGroups => {
                let groups = options.groups.as_deref().unwrap_or_default();
                Ok(Self::alternate_groups(
                    &mut rng,
                    groups,
                    options.randomize_group_order,
                ))
            }
            SampleStrategy::Custom => Err(TrellisError::InvalidSampleOptions {
                strategy: strategy.as_str().into(),
                message: "custom sampling needs a sampling function".into(),
            }),
        }
    }
}

impl Randomizer for RandomSampler {
    fn shuffle(&self, mut indices: Vec<usize>) -> Vec<usize> {
        indices.shuffle(&mut *lock(&self.rng));
        indices
    }
}

// ---------------------------------------------------------------------------
// Ordering for one pass
// ---------------------------------------------------------------------------

/// Compute the variable-set order of one pass of a timeline. A timeline without
/// variable sets yields a single unbound slot.
pub fn variable_set_order(
    description: &TimelineDescription,
    sampler: &dyn Sampler,
    randomizer: &dyn Randomizer,
) -> Result<Vec<Option<usize>>> {
    let count = description.variable_set_count();
    if count == 0 {
        return Ok(vec![None]);
    }
    let base: Vec<usize> = (0..count).collect();

    let (source, order) = match &description.sample {
        Some(sample) => {
            let strategy = SampleStrategy::parse(&sample.sample_type)?;
            let order = match strategy {
                SampleStrategy::Custom => {
                    let f = sample.custom.as_ref().ok_or_else(|| {
                        TrellisError::InvalidSampleOptions {
                            strategy: strategy.as_str().into(),
                            message: "custom sampling needs a sampling function".into(),
                        }
                    })?;
                    f(&base)
                }
                _ => sampler.sample(strategy, &base, &sample.options)?,
            };
            (strategy.as_str(), order)
        }
        None if description.randomize_order => ("randomize_order", randomizer.shuffle(base)),
        None => return Ok(base.into_iter().map(Some).collect()),
    };

    if let Some(bad) = order.iter().find(|&&i| i >= count) {
        return Err(TrellisError::InvalidSampleOptions {
            strategy: source.to_string(),
            message: format!("index {bad} is out of range for {count} variable sets"),
        });
    }
    Ok(order.into_iter().map(Some).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::SampleDescription;
    use trellis_types::VariableSet;

    fn sets(n: usize) -> Vec<VariableSet> {
        (0..n).map(|i| VariableSet::new().with("i", i)).collect()
    }

    #[test]
    fn parse_known_strategies() {
        for name in [
            "with-replacement",
            "without-replacement",
            "fixed-repetitions",
            "alternate-groups",
            "custom",
        ] {
            assert_eq!(SampleStrategy::parse(name).unwrap().as_str(), name);
        }
    }

    #[test]
    fn parse_unknown_strategy_names_it() {
        let err = SampleStrategy::parse("shuffle-ish").unwrap_err();
        assert!(err.is_configuration_error());
        assert!(err.to_string().contains("\"shuffle-ish\""));
    }

    #[test]
    fn without_replacement_takes_distinct_indices() {
        let sampler = RandomSampler::seeded(7);
        let options = SampleOptions {
            size: Some(3),
            ..SampleOptions::default()
        };
        let mut order = sampler
            .sample(SampleStrategy::WithoutReplacement, &[0, 1, 2, 3, 4], &options)
            .unwrap();
        assert_eq!(order.len(), 3);
        order.sort_unstable();
        order.dedup();
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn without_replacement_rejects_oversized_sample() {
        let sampler = RandomSampler::seeded(1);
        let options = SampleOptions {
            size: Some(4),
            ..SampleOptions::default()
        };
        let err = sampler
            .sample(SampleStrategy::WithoutReplacement, &[0, 1], &options)
            .unwrap_err();
        assert!(matches!(err, TrellisError::InvalidSampleOptions { .. }));
    }

    #[test]
    fn with_replacement_honors_zero_weights() {
        let sampler = RandomSampler::seeded(3);
        let options = SampleOptions {
            size: Some(20),
            weights: Some(vec![0.0, 1.0, 0.0]),
            ..SampleOptions::default()
        };
        let order = sampler
            .sample(SampleStrategy::WithReplacement, &[0, 1, 2], &options)
            .unwrap();
        assert_eq!(order, vec![1; 20]);
    }

    #[test]
    fn with_replacement_rejects_mismatched_weights() {
        let options = SampleOptions {
            weights: Some(vec![1.0]),
            ..SampleOptions::default()
        };
        assert!(options.check(SampleStrategy::WithReplacement, 2).is_err());
    }

    #[test]
    fn fixed_repetitions_repeats_every_index() {
        let sampler = RandomSampler::seeded(11);
        let options = SampleOptions {
            size: Some(3),
            ..SampleOptions::default()
        };
        let mut order = sampler
            .sample(SampleStrategy::FixedRepetitions, &[0, 1], &options)
            .unwrap();
        order.sort_unstable();
        assert_eq!(order, vec![0, 0, 0, 1, 1, 1]);
    }

    #[test]
    fn alternate_groups_interleave_up_to_shortest_group() {
        let sampler = RandomSampler::seeded(5);
        let options = SampleOptions {
            groups: Some(vec![vec![0, 1, 2], vec![3, 4]]),
            ..SampleOptions::default()
        };
        let order = sampler
            .sample(SampleStrategy::AlternateGroups, &[0, 1, 2, 3, 4], &options)
            .unwrap();
        assert_eq!(order.len(), 4);
        for (position, index) in order.iter().enumerate() {
            if position % 2 == 0 {
                assert!(*index <= 2, "expected first group at {position}: {order:?}");
            } else {
                assert!(*index >= 3, "expected second group at {position}: {order:?}");
            }
        }
    }

    #[test]
    fn alternate_groups_require_groups() {
        let err = SampleOptions::default()
            .check(SampleStrategy::AlternateGroups, 3)
            .unwrap_err();
        assert!(err.to_string().contains("at least one group"));
    }

    #[test]
    fn seeded_samplers_agree() {
        let a = RandomSampler::seeded(42);
        let b = RandomSampler::seeded(42);
        let base: Vec<usize> = (0..10).collect();
        assert_eq!(a.shuffle(base.clone()), b.shuffle(base));
    }

    #[test]
    fn order_without_variables_is_single_unbound_slot() {
        let desc = TimelineDescription::default();
        let sampler = RandomSampler::seeded(0);
        let order = variable_set_order(&desc, &sampler, &sampler).unwrap();
        assert_eq!(order, vec![None]);
    }

    #[test]
    fn order_defaults_to_natural() {
        let desc = TimelineDescription::default().timeline_variables(sets(3));
        let sampler = RandomSampler::seeded(0);
        let order = variable_set_order(&desc, &sampler, &sampler).unwrap();
        assert_eq!(order, vec![Some(0), Some(1), Some(2)]);
    }

    #[test]
    fn order_uses_custom_function() {
        let desc = TimelineDescription::default()
            .timeline_variables(sets(3))
            .sample(SampleDescription::custom(|_| vec![2, 2, 0]));
        let sampler = RandomSampler::seeded(0);
        let order = variable_set_order(&desc, &sampler, &sampler).unwrap();
        assert_eq!(order, vec![Some(2), Some(2), Some(0)]);
    }

    #[test]
    fn order_rejects_out_of_range_custom_indices() {
        let desc = TimelineDescription::default()
            .timeline_variables(sets(2))
            .sample(SampleDescription::custom(|_| vec![5]));
        let sampler = RandomSampler::seeded(0);
        let err = variable_set_order(&desc, &sampler, &sampler).unwrap_err();
        assert!(err.to_string().contains("index 5 is out of range"));
    }

    #[test]
    fn order_rejects_unknown_sample_type() {
        let desc = TimelineDescription::default()
            .timeline_variables(sets(2))
            .sample(SampleDescription::named("random-ish"));
        let sampler = RandomSampler::seeded(0);
        let err = variable_set_order(&desc, &sampler, &sampler).unwrap_err();
        assert!(matches!(
            err,
            TrellisError::InvalidSampleType { ref sample_type } if sample_type == "random-ish"
        ));
    }

    #[test]
    fn randomize_order_is_a_permutation() {
        let desc = TimelineDescription::default()
            .timeline_variables(sets(6))
            .randomize_order(true);
        let sampler = RandomSampler::seeded(9);
        let mut order: Vec<usize> = variable_set_order(&desc, &sampler, &sampler)
            .unwrap()
            .into_iter()
            .flatten()
            .collect();
        order.sort_unstable();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }
}
