use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::data::{DataConfig, Dataset, Label, Partition};
use crate::encoding::ClassWeights;
use crate::error::DataError;

/// Dataset indices with as many negatives as positives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalancedIndexSet {
    positives: Vec<usize>,
    negatives: Vec<usize>,
}

impl BalancedIndexSet {
    pub fn positives(&self) -> &[usize] {
        &self.positives
    }

    pub fn negatives(&self) -> &[usize] {
        &self.negatives
    }

    pub fn len(&self) -> usize {
        self.positives.len() + self.negatives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positives.is_empty() && self.negatives.is_empty()
    }

    /// Positives first, then the sampled negatives.
    pub fn indices(&self) -> Vec<usize> {
        self.positives
            .iter()
            .chain(self.negatives.iter())
            .copied()
            .collect()
    }
}

/// Keeps every positive example and undersamples negatives, without
/// replacement, down to the same count.
pub fn resample<R: Rng + ?Sized>(
    dataset: &Dataset,
    rng: &mut R,
) -> Result<BalancedIndexSet, DataError> {
    let mut positives = Vec::new();
    let mut negatives = Vec::new();
    for (i, example) in dataset.iter().enumerate() {
        match example.label {
            Label::Positive => positives.push(i),
            Label::Negative => negatives.push(i),
        }
    }

    info!(
        "Resampling dataset: positive={}, negative={}",
        positives.len(),
        negatives.len()
    );

    if positives.is_empty() {
        return Err(DataError::EmptyDataset);
    }
    if negatives.len() < positives.len() {
        return Err(DataError::InsufficientNegativeSamples {
            positives: positives.len(),
            negatives: negatives.len(),
        });
    }

    let negatives: Vec<usize> = negatives
        .choose_multiple(rng, positives.len())
        .copied()
        .collect();

    Ok(BalancedIndexSet {
        positives,
        negatives,
    })
}

/// Train and test dataset indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partitions the balanced set so both sides keep its class ratio.
///
/// The test side gets `ceil(test_fraction * n)` indices, shared out between
/// the classes in proportion to their size; every class ends up with at least
/// one member on each side.
pub fn stratified_split<R: Rng + ?Sized>(
    dataset: &Dataset,
    balanced: &BalancedIndexSet,
    test_fraction: f64,
    rng: &mut R,
) -> Result<Split, DataError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(DataError::InvalidTestFraction(test_fraction));
    }
    if balanced.is_empty() {
        return Err(DataError::EmptyDataset);
    }

    let mut classes: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
    for i in balanced.indices() {
        let label = dataset
            .example(i)
            .map(|e| e.label)
            .ok_or(DataError::EmptyDataset)?;
        classes[label.index()].push(i);
    }

    for label in Label::ALL {
        let count = classes[label.index()].len();
        if count < 2 {
            return Err(DataError::InsufficientSamplesForStratification {
                label: label.into(),
                count,
            });
        }
    }

    let total = balanced.len();
    let n_test = (test_fraction * total as f64).ceil() as usize;
    let n_train = total - n_test;
    if n_test < classes.len() || n_train < classes.len() {
        // Too few examples to place every class on both sides.
        let smallest = Label::ALL
            .into_iter()
            .min_by_key(|l| classes[l.index()].len())
            .unwrap_or(Label::Negative);
        return Err(DataError::InsufficientSamplesForStratification {
            label: smallest.into(),
            count: classes[smallest.index()].len(),
        });
    }

    let counts = [classes[0].len(), classes[1].len()];
    let allocation = allocate_test_counts(counts, n_test);

    let mut train = Vec::with_capacity(n_train);
    let mut test = Vec::with_capacity(n_test);
    for (members, take) in classes.iter_mut().zip(allocation) {
        members.shuffle(rng);
        test.extend_from_slice(&members[..take]);
        train.extend_from_slice(&members[take..]);
    }
    train.shuffle(rng);
    test.shuffle(rng);

    info!("Dataset split: train={}, test={}", train.len(), test.len());
    debug!("Test allocation per class: {:?}", allocation);

    Ok(Split { train, test })
}

/// Proportional share of `n_test` per class: floors first, leftovers to the
/// largest fractional parts, then clamped to `[1, count - 1]`.
fn allocate_test_counts(counts: [usize; 2], n_test: usize) -> [usize; 2] {
    let total: usize = counts.iter().sum();
    let exact: Vec<f64> = counts
        .iter()
        .map(|&c| c as f64 * n_test as f64 / total as f64)
        .collect();

    let mut allocation = [exact[0].floor() as usize, exact[1].floor() as usize];
    let mut leftover = n_test - allocation.iter().sum::<usize>();

    let mut order = [0usize, 1];
    order.sort_by(|&a, &b| {
        let frac_a = exact[a] - exact[a].floor();
        let frac_b = exact[b] - exact[b].floor();
        frac_b
            .partial_cmp(&frac_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(counts[b].cmp(&counts[a]))
    });
    for &class in order.iter().cycle() {
        if leftover == 0 {
            break;
        }
        allocation[class] += 1;
        leftover -= 1;
    }

    for (take, &count) in allocation.iter_mut().zip(counts.iter()) {
        *take = (*take).clamp(1, count - 1);
    }
    allocation
}

/// Everything training and evaluation need from one dataset.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub balanced: BalancedIndexSet,
    pub split: Split,
    pub train: Partition,
    pub test: Partition,
    /// Computed on the full, unbalanced label distribution.
    pub class_weights: ClassWeights,
}

impl PreparedData {
    pub fn prepare<R: Rng + ?Sized>(
        dataset: &Dataset,
        config: &DataConfig,
        rng: &mut R,
    ) -> Result<Self, DataError> {
        let balanced = resample(dataset, rng)?;
        info!("Balanced index set size: {}", balanced.len());

        let split = stratified_split(dataset, &balanced, config.test_fraction, rng)?;
        let class_weights = ClassWeights::balanced(&dataset.labels())?;
        info!(
            "Class weights: negative={:.4}, positive={:.4}",
            class_weights[Label::Negative],
            class_weights[Label::Positive]
        );

        Ok(Self {
            train: dataset.partition(&split.train),
            test: dataset.partition(&split.test),
            balanced,
            split,
            class_weights,
        })
    }
}
