mod common;

use std::collections::HashSet;
use std::sync::Arc;

use clinpred_classifiers::data_handling::TEST_FRACTION;
use clinpred_classifiers::evaluation::{evaluate, evaluate_classifier, Metric};
use clinpred_classifiers::models::classifier_trait::ClassifierModel;
use clinpred_classifiers::models::factory::build_model;
use clinpred_classifiers::trainer::Portion;
use clinpred_classifiers::config::resolve;
use clinpred_classifiers::PipelineError;

#[test]
fn test_split_is_disjoint_and_complete() {
    let trainer = common::trainer_with("banded", common::banded(101, 2, 1));
    let data = trainer.store().get("banded").unwrap();

    let train: HashSet<usize> = data.partition.train.iter().copied().collect();
    let test: HashSet<usize> = data.partition.test.iter().copied().collect();
    assert!(train.is_disjoint(&test));
    assert_eq!(train.len() + test.len(), 101);
    assert_eq!(test.len(), (101.0 * TEST_FRACTION).ceil() as usize);

    // registering again keeps the first partition
    let again = trainer
        .store()
        .register("banded", common::banded(40, 2, 9))
        .unwrap();
    assert_eq!(again.partition, data.partition);
}

#[test]
fn test_repeated_training_hits_the_cache() {
    let trainer = common::trainer_with("banded", common::banded(120, 2, 2));

    let a = trainer.train("xgboost", "banded").unwrap();
    let b = trainer.train("XGB", "banded").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(trainer.fit_count(), 1);

    let full = trainer.train_full("xgboost", "banded").unwrap();
    assert_eq!(full.portion, Portion::Full);
    assert!(!Arc::ptr_eq(&a, &full));
    assert_eq!(trainer.fit_count(), 2);
    assert_eq!(trainer.len(), 2);
}

#[test]
fn test_concurrent_first_access_fits_once() {
    let trainer = common::trainer_with("banded", common::banded(150, 3, 4));

    let fitted: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| trainer.train("random_forest", "banded").unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(trainer.fit_count(), 1);
    assert!(fitted.iter().all(|m| Arc::ptr_eq(m, &fitted[0])));
}

#[test]
fn test_unknown_variant_is_rejected_before_fitting() {
    let trainer = common::trainer_with("banded", common::banded(60, 2, 8));
    let err = trainer.train("svm", "banded").unwrap_err();
    assert!(matches!(err, PipelineError::UnknownVariant(ref id) if id == "svm"));
    assert_eq!(trainer.fit_count(), 0);
    assert!(trainer.is_empty());
}

#[test]
fn test_metrics_are_bounded_and_cached_models_are_reused() {
    let trainer = common::trainer_with("banded", common::banded(200, 3, 6));

    for id in ["lightgbm", "xgboost", "random_forest", "logistic_regression"] {
        let fitted = trainer.train(id, "banded").unwrap();
        let record = evaluate(&fitted, trainer.store(), "banded").unwrap();
        assert_eq!(record.n_train + record.n_test, 200);
        assert_eq!(record.rows.len(), 5);

        for row in &record.rows {
            assert!(row.test.is_finite(), "{} {}", id, row.metric);
            assert!(!row.interpretation.is_empty());
            if row.metric == Metric::LogLoss {
                assert!(row.test >= 0.0);
            } else {
                assert!((0.0..=1.0).contains(&row.test), "{} {} = {}", id, row.metric, row.test);
                assert!(row.train.map_or(true, |v| (0.0..=1.0).contains(&v)));
            }
        }
        assert!(record.get(Metric::Precision).unwrap().train.is_none());
    }
    // evaluation never refits
    assert_eq!(trainer.fit_count(), 4);
}

#[test]
fn test_evaluating_an_unfitted_classifier_fails() {
    let trainer = common::trainer_with("banded", common::banded(60, 2, 10));
    let data = trainer.store().get("banded").unwrap();
    let model = build_model(&resolve("lr").unwrap());

    let err = evaluate_classifier(model.as_ref(), "logistic_regression", &data).unwrap_err();
    assert!(matches!(err, PipelineError::NotFitted));
}

#[test]
fn test_refit_after_clear_reproduces_predictions() {
    let trainer = common::trainer_with("banded", common::banded(160, 3, 12));
    let data = trainer.store().get("banded").unwrap();

    for id in ["lightgbm", "xgboost", "random_forest", "logistic_regression"] {
        let first = trainer.train(id, "banded").unwrap();
        let before = first.model.predict_proba(&data.test.x).unwrap();

        trainer.clear();
        assert!(trainer.is_empty());
        let second = trainer.train(id, "banded").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        let after = second.model.predict_proba(&data.test.x).unwrap();
        assert_eq!(before, after, "{} is not reproducible after a refit", id);
        assert_eq!(first.background_means, second.background_means);
    }
    assert_eq!(trainer.fit_count(), 8);
}

#[test]
fn test_evaluation_requires_the_train_portion_of_the_same_dataset() {
    let trainer = common::trainer_with("banded", common::banded(80, 2, 14));
    trainer
        .store()
        .register("other", common::banded(80, 2, 15))
        .unwrap();

    let full = trainer.train_full("xgboost", "banded").unwrap();
    let err = evaluate(&full, trainer.store(), "banded").unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));

    let fitted = trainer.train("xgboost", "banded").unwrap();
    assert!(evaluate(&fitted, trainer.store(), "other").is_err());
    assert!(evaluate(&fitted, trainer.store(), "banded").is_ok());
    assert_eq!(trainer.fit_count(), 2);
}
