//! Memoized model fitting.
//!
//! Fitted models are cached by `(model id, dataset id, portion, hyper-parameter
//! fingerprint)`. Each key owns a `OnceCell`: the first caller fits, every
//! concurrent caller for the same key blocks on that cell and then shares the
//! same `Arc<FittedModel>`. A failed fit leaves the cell empty.
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::{resolve, ClassWeighting, VariantSpec};
use crate::data_handling::{Dataset, DatasetStore, PartitionedDataset};
use crate::error::Result;
use crate::models::classifier_trait::ClassifierModel;
use crate::models::factory::build_model;

/// Which rows a model is fitted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Portion {
    Train,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub model_id: String,
    pub dataset_id: String,
    pub portion: Portion,
    pub fingerprint: String,
}

/// A classifier fitted on one portion of a registered dataset. Read-only.
pub struct FittedModel {
    pub variant: VariantSpec,
    pub portion: Portion,
    pub dataset_id: String,
    pub model: Box<dyn ClassifierModel>,
    pub feature_names: Vec<String>,
    pub class_labels: Vec<String>,
    /// Per-feature means of the rows the model was fitted on.
    pub background_means: Vec<f64>,
    pub fit_time: Duration,
}

impl std::fmt::Debug for FittedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FittedModel")
            .field("variant", &self.variant.id)
            .field("portion", &self.portion)
            .field("dataset_id", &self.dataset_id)
            .field("n_features", &self.feature_names.len())
            .field("fit_time", &self.fit_time)
            .finish()
    }
}

/// Per-sample weights for a label vector.
pub fn sample_weights(y: &[usize], n_classes: usize, weighting: ClassWeighting) -> Vec<f64> {
    match weighting {
        ClassWeighting::None => vec![1.0; y.len()],
        ClassWeighting::InverseFrequency => {
            let mut counts = vec![0usize; n_classes];
            for &c in y {
                counts[c] += 1;
            }
            let n = y.len() as f64;
            // 1 / proportion(class)
            y.iter().map(|&c| n / counts[c] as f64).collect()
        }
    }
}

type Slot = Arc<OnceCell<Arc<FittedModel>>>;

/// Get-or-fit cache over the registry and a dataset store.
pub struct Trainer {
    store: Arc<DatasetStore>,
    entries: Mutex<HashMap<CacheKey, Slot>>,
    fits: AtomicUsize,
}

impl Trainer {
    pub fn new(store: Arc<DatasetStore>) -> Self {
        Trainer {
            store,
            entries: Mutex::new(HashMap::new()),
            fits: AtomicUsize::new(0),
        }
    }

    pub fn store(&self) -> &Arc<DatasetStore> {
        &self.store
    }

    /// Model fitted on the train partition.
    pub fn train(&self, model_id: &str, dataset_id: &str) -> Result<Arc<FittedModel>> {
        let spec = resolve(model_id)?;
        self.train_spec(&spec, dataset_id, Portion::Train)
    }

    /// Model fitted on every row of the dataset.
    pub fn train_full(&self, model_id: &str, dataset_id: &str) -> Result<Arc<FittedModel>> {
        let spec = resolve(model_id)?;
        self.train_spec(&spec, dataset_id, Portion::Full)
    }

    /// Get or fit an explicit variant spec.
    pub fn train_spec(
        &self,
        spec: &VariantSpec,
        dataset_id: &str,
        portion: Portion,
    ) -> Result<Arc<FittedModel>> {
        let dataset = self.store.get(dataset_id)?;
        let key = CacheKey {
            model_id: spec.id.clone(),
            dataset_id: dataset_id.to_string(),
            portion,
            fingerprint: spec.fingerprint(),
        };

        let slot = {
            let mut entries = self.entries.lock();
            Arc::clone(entries.entry(key).or_default())
        };
        if let Some(hit) = slot.get() {
            log::debug!("cache hit: {} on `{}` ({:?})", spec.id, dataset_id, portion);
            return Ok(Arc::clone(hit));
        }
        let fitted = slot.get_or_try_init(|| self.fit(spec, &dataset, portion).map(Arc::new))?;
        Ok(Arc::clone(fitted))
    }

    fn fit(
        &self,
        spec: &VariantSpec,
        dataset: &PartitionedDataset,
        portion: Portion,
    ) -> Result<FittedModel> {
        let data: &Dataset = match portion {
            Portion::Train => &dataset.train,
            Portion::Full => &dataset.full,
        };
        log::info!(
            "cache miss: fitting {} on `{}` ({:?}, {} rows)",
            spec.display_name,
            dataset.id,
            portion,
            data.n_samples()
        );

        let weights = sample_weights(data.y.as_slice(), data.n_classes(), spec.class_weighting);
        let mut model = build_model(spec);
        let start = Instant::now();
        model.fit(&data.x, data.y.as_slice(), data.n_classes(), &weights)?;
        let fit_time = start.elapsed();
        self.fits.fetch_add(1, Ordering::SeqCst);
        log::info!("fitted {} in {:.2?}", spec.id, fit_time);

        Ok(FittedModel {
            variant: spec.clone(),
            portion,
            dataset_id: dataset.id.clone(),
            model,
            feature_names: data.feature_names.clone(),
            class_labels: data.class_labels.clone(),
            background_means: data.x.column_means(),
            fit_time,
        })
    }

    /// Drop every cached model.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        log::info!("clearing {} cached models", entries.len());
        entries.clear();
    }

    /// Number of fitted models held by the cache.
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total fits performed since construction.
    pub fn fit_count(&self) -> usize {
        self.fits.load(Ordering::SeqCst)
    }
}
