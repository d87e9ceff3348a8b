//! Labelled datasets and their fixed train/test partition.
//!
//! A dataset is registered once under an id in the [`DatasetStore`]; the
//! partition is computed at registration with [`TEST_FRACTION`] and
//! [`SPLIT_SEED`] and never recomputed, so every model variant trained on
//! that id sees the same split.
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::error::{PipelineError, Result};
use crate::features::{FeaturePipeline, RawRecord};
use crate::math::{Array1, Array2};

/// Share of rows held out for testing.
pub const TEST_FRACTION: f64 = 0.25;
/// Seed of the partition shuffle.
pub const SPLIT_SEED: u64 = 42;

pub type DatasetId = String;

#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    pub x: Array2<f64>,
    pub y: Array1<usize>,
    pub feature_names: Vec<String>,
    pub class_labels: Vec<String>,
}

impl Dataset {
    pub fn new(
        x: Array2<f64>,
        y: Array1<usize>,
        feature_names: Vec<String>,
        class_labels: Vec<String>,
    ) -> Result<Self> {
        if x.nrows() != y.len() {
            return Err(PipelineError::InvalidInput(format!(
                "{} rows but {} labels",
                x.nrows(),
                y.len()
            )));
        }
        if x.ncols() != feature_names.len() {
            return Err(PipelineError::InvalidInput(format!(
                "{} columns but {} feature names",
                x.ncols(),
                feature_names.len()
            )));
        }
        if let Some(bad) = y.iter().find(|&&c| c >= class_labels.len()) {
            return Err(PipelineError::InvalidInput(format!(
                "label {} has no class name ({} classes)",
                bad,
                class_labels.len()
            )));
        }
        if !x.is_finite() {
            return Err(PipelineError::InvalidInput(
                "feature matrix contains non-finite values".into(),
            ));
        }
        Ok(Dataset {
            x,
            y,
            feature_names,
            class_labels,
        })
    }

    /// Encode labelled raw records through the feature pipeline.
    pub fn from_records(pipeline: &FeaturePipeline, records: &[RawRecord]) -> Result<Self> {
        let (x, y) = pipeline.transform_batch(records)?;
        Dataset::new(
            x,
            Array1::from_vec(y),
            pipeline.feature_names().to_vec(),
            pipeline.class_labels().to_vec(),
        )
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_classes(&self) -> usize {
        self.class_labels.len()
    }

    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.n_classes()];
        for &c in self.y.iter() {
            counts[c] += 1;
        }
        counts
    }

    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            x: self.x.select_rows(indices),
            y: self.y.select(indices),
            feature_names: self.feature_names.clone(),
            class_labels: self.class_labels.clone(),
        }
    }

    pub fn log_input_data_summary(&self) {
        let summary: Vec<String> = self
            .class_labels
            .iter()
            .zip(self.class_counts())
            .map(|(label, count)| format!("{}={}", label, count))
            .collect();
        log::info!(
            "dataset: {} rows, {} features, classes [{}]",
            self.n_samples(),
            self.x.ncols(),
            summary.join(", ")
        );
    }
}

/// Disjoint row indices covering the whole dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Partition {
    /// Seeded shuffle, then the first `ceil(n * test_fraction)` rows become the test set.
    pub fn split(n: usize, test_fraction: f64, seed: u64) -> Result<Partition> {
        if !(0.0..1.0).contains(&test_fraction) || test_fraction == 0.0 {
            return Err(PipelineError::InvalidInput(format!(
                "test fraction {} must be in (0, 1)",
                test_fraction
            )));
        }
        let n_test = (n as f64 * test_fraction).ceil() as usize;
        if n_test == 0 || n_test >= n {
            return Err(PipelineError::InvalidInput(format!(
                "{} rows cannot be split into non-empty train and test sets",
                n
            )));
        }
        let mut order: Vec<usize> = (0..n).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        order.shuffle(&mut rng);

        let mut test = order[..n_test].to_vec();
        let mut train = order[n_test..].to_vec();
        test.sort_unstable();
        train.sort_unstable();
        Ok(Partition { train, test })
    }
}

/// A dataset with its materialized train and test portions.
#[derive(Debug, Clone)]
pub struct PartitionedDataset {
    pub id: DatasetId,
    pub full: Dataset,
    pub partition: Partition,
    pub train: Dataset,
    pub test: Dataset,
}

impl PartitionedDataset {
    pub fn new(id: &str, dataset: Dataset) -> Result<Self> {
        let partition = Partition::split(dataset.n_samples(), TEST_FRACTION, SPLIT_SEED)?;
        let train = dataset.subset(&partition.train);
        let test = dataset.subset(&partition.test);
        log::debug!(
            "dataset `{}` partitioned: {} train / {} test",
            id,
            train.n_samples(),
            test.n_samples()
        );
        Ok(PartitionedDataset {
            id: id.to_string(),
            full: dataset,
            partition,
            train,
            test,
        })
    }
}

/// Registered datasets by id. Each id is partitioned exactly once.
#[derive(Default)]
pub struct DatasetStore {
    datasets: RwLock<HashMap<DatasetId, Arc<PartitionedDataset>>>,
}

impl DatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `dataset` under `id`. A second registration of the same id keeps the first one.
    pub fn register(&self, id: &str, dataset: Dataset) -> Result<Arc<PartitionedDataset>> {
        if let Some(existing) = self.datasets.read().get(id) {
            log::debug!("dataset `{}` already registered", id);
            return Ok(Arc::clone(existing));
        }
        let partitioned = Arc::new(PartitionedDataset::new(id, dataset)?);
        let mut guard = self.datasets.write();
        let entry = guard
            .entry(id.to_string())
            .or_insert_with(|| Arc::clone(&partitioned));
        Ok(Arc::clone(entry))
    }

    pub fn get(&self, id: &str) -> Result<Arc<PartitionedDataset>> {
        self.datasets
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownDataset(id.to_string()))
    }

    pub fn ids(&self) -> Vec<DatasetId> {
        let mut ids: Vec<DatasetId> = self.datasets.read().keys().cloned().collect();
        ids.sort();
        ids
    }
}
