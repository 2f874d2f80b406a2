//! Bounded randomized sampling of labeled image pools.
//!
//! Each pool is capped at `max_per_label` items by drawing a uniform subset
//! without replacement, then the concatenation of all pools is shuffled as a
//! whole so that an item's label cannot be inferred from its position.
//!
//! The random source is injected: [`Sampler::with_seed`] is fully
//! reproducible, while [`Sampler::from_clock`] derives a seed from the wall
//! clock and should only be used at the outermost call site.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::pool::{ImageItem, ImagePool};

/// Items drawn per pool when no explicit cap is configured.
pub const DEFAULT_MAX_PER_LABEL: usize = 50;

/// The fixed, ordered list of items one session presents.
///
/// Produced once per session and never mutated; re-sampling builds a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationSequence {
    items: Vec<ImageItem>,
}

impl EvaluationSequence {
    pub fn items(&self) -> &[ImageItem] {
        &self.items
    }

    pub fn get(&self, index: usize) -> Option<&ImageItem> {
        self.items.get(index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<ImageItem>> for EvaluationSequence {
    /// Wrap an already ordered item list, e.g. a sequence replayed from a log.
    fn from(items: Vec<ImageItem>) -> Self {
        Self { items }
    }
}

/// Draws evaluation sequences from labeled pools.
pub struct Sampler {
    seed: u64,
    rng: StdRng,
}

impl Sampler {
    /// Create a sampler with a specific seed.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Create a sampler seeded from the high-resolution wall clock.
    pub fn from_clock() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        info!(seed, "sampler seeded from wall clock");
        Self::with_seed(seed)
    }

    /// Use `seed` when given, otherwise fall back to the wall clock.
    pub fn new(seed: Option<u64>) -> Self {
        match seed {
            Some(seed) => Self::with_seed(seed),
            None => Self::from_clock(),
        }
    }

    /// The seed this sampler was created with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Build a shuffled evaluation sequence from `pools`.
    ///
    /// Pools are consumed so sampled items move into the sequence without
    /// being copied. Fails before drawing anything if any pool is empty.
    pub fn sample(
        &mut self,
        pools: Vec<ImagePool>,
        max_per_label: usize,
    ) -> Result<EvaluationSequence> {
        if let Some(empty) = pools.iter().find(|p| p.is_empty()) {
            return Err(Error::EmptyPool(empty.label.clone()));
        }

        let mut items = Vec::new();
        for pool in pools {
            let available = pool.len();
            let mut drawn = self.draw(pool.items, max_per_label);
            debug!(
                label = %pool.label,
                available,
                drawn = drawn.len(),
                "pool sampled"
            );
            items.append(&mut drawn);
        }

        if items.is_empty() {
            return Err(Error::NoItems);
        }

        items.shuffle(&mut self.rng);
        Ok(EvaluationSequence { items })
    }

    /// Uniform subset of exactly `limit` items, or the whole pool if smaller.
    fn draw(&mut self, items: Vec<ImageItem>, limit: usize) -> Vec<ImageItem> {
        if items.len() <= limit {
            return items;
        }

        let mut keep = vec![false; items.len()];
        for i in index::sample(&mut self.rng, items.len(), limit).iter() {
            keep[i] = true;
        }

        items
            .into_iter()
            .zip(keep)
            .filter_map(|(item, kept)| kept.then_some(item))
            .collect()
    }
}

/// Sample `pools` with an optional seed, logging the effective seed.
pub fn sample(
    pools: Vec<ImagePool>,
    max_per_label: usize,
    seed: Option<u64>,
) -> Result<EvaluationSequence> {
    Sampler::new(seed).sample(pools, max_per_label)
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler").field("seed", &self.seed).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::ImageClass;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn pool(label: &str, class: ImageClass, n: usize) -> ImagePool {
        let items = (0..n)
            .map(|i| {
                let id = format!("{label}/{i:03}.png");
                ImageItem::new(id.as_str(), id.as_str(), Some(class))
            })
            .collect();
        ImagePool::new(label, items)
    }

    fn ids(seq: &EvaluationSequence) -> Vec<String> {
        seq.items().iter().map(|i| i.id.0.clone()).collect()
    }

    #[test]
    fn caps_each_pool_at_max_per_label() {
        let pools = vec![
            pool("real", ImageClass::Real, 80),
            pool("synthetic", ImageClass::Synthetic, 30),
        ];

        let seq = Sampler::with_seed(7).sample(pools, 50).unwrap();

        assert_eq!(seq.len(), 80);
        let real = seq
            .items()
            .iter()
            .filter(|i| i.true_class == Some(ImageClass::Real))
            .count();
        assert_eq!(real, 50);
    }

    #[test]
    fn subset_has_no_duplicates() {
        let seq = Sampler::with_seed(1)
            .sample(vec![pool("real", ImageClass::Real, 200)], 50)
            .unwrap();

        let unique: HashSet<_> = ids(&seq).into_iter().collect();
        assert_eq!(unique.len(), 50);
    }

    #[test]
    fn same_seed_gives_identical_sequence() {
        let make = || {
            vec![
                pool("real", ImageClass::Real, 120),
                pool("synthetic", ImageClass::Synthetic, 90),
            ]
        };

        let a = Sampler::with_seed(2025).sample(make(), 50).unwrap();
        let b = Sampler::with_seed(2025).sample(make(), 50).unwrap();
        let c = Sampler::with_seed(2026).sample(make(), 50).unwrap();

        assert_eq!(a, b);
        assert_ne!(ids(&a), ids(&c));
    }

    #[test]
    fn shuffle_interleaves_labels() {
        let pools = vec![
            pool("real", ImageClass::Real, 20),
            pool("synthetic", ImageClass::Synthetic, 20),
        ];

        let seq = Sampler::with_seed(3).sample(pools, 50).unwrap();

        // an unshuffled concatenation would put every real item first
        let first_half_real = seq.items()[..20]
            .iter()
            .filter(|i| i.true_class == Some(ImageClass::Real))
            .count();
        assert!(first_half_real < 20);
    }

    #[test]
    fn empty_pool_is_rejected() {
        let pools = vec![
            pool("real", ImageClass::Real, 5),
            pool("synthetic", ImageClass::Synthetic, 0),
        ];

        let err = Sampler::with_seed(0).sample(pools, 50).unwrap_err();
        assert!(matches!(err, Error::EmptyPool(label) if label == "synthetic"));
    }

    #[test]
    fn no_pools_or_zero_cap_is_no_items() {
        let err = Sampler::with_seed(0).sample(Vec::new(), 50).unwrap_err();
        assert!(matches!(err, Error::NoItems));

        let err = Sampler::with_seed(0)
            .sample(vec![pool("real", ImageClass::Real, 3)], 0)
            .unwrap_err();
        assert!(matches!(err, Error::NoItems));
    }

    #[test]
    fn seed_is_reported() {
        assert_eq!(Sampler::with_seed(99).seed(), 99);
        assert_eq!(Sampler::new(Some(5)).seed(), 5);
    }

    proptest! {
        #[test]
        fn sequence_length_is_sum_of_capped_pool_sizes(
            sizes in prop::collection::vec(1usize..120, 1..5),
            max_per_label in 1usize..80,
            seed in any::<u64>(),
        ) {
            let pools: Vec<_> = sizes
                .iter()
                .enumerate()
                .map(|(i, &n)| pool(&format!("pool{i}"), ImageClass::Real, n))
                .collect();
            let expected: usize = sizes.iter().map(|&n| n.min(max_per_label)).sum();

            let seq = Sampler::with_seed(seed).sample(pools, max_per_label).unwrap();

            prop_assert_eq!(seq.len(), expected);
        }
    }
}
