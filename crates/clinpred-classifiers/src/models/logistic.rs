use linfa::traits::Fit;
use linfa::Dataset;
use linfa_logistic::{MultiFittedLogisticRegression, MultiLogisticRegression};

use crate::config::LogisticParams;
use crate::error::{PipelineError, Result};
use crate::math::Array2;
use crate::models::classifier_trait::{check_row, check_training_set, ClassifierModel, Link};
use crate::preprocessing::{fit_scaler, transform_all, Scaler};

/// L2-regularized logistic regression on standardized features, fitted with
/// `linfa-logistic`.
///
/// Every target is fitted as a multinomial model so the class columns follow
/// the sorted class indices. A binary target keeps a single log-odds margin,
/// `m_1 - m_0`, which gives the same probabilities through the sigmoid.
/// `C` maps to linfa's summed-loss penalty as `alpha = 1 / C`.
pub struct LogisticRegressionClassifier {
    params: LogisticParams,
    scaler: Option<Scaler>,
    model: Option<MultiFittedLogisticRegression<f64, usize>>,
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
    n_classes: usize,
}

impl LogisticRegressionClassifier {
    pub fn new(params: LogisticParams) -> Self {
        LogisticRegressionClassifier {
            params,
            scaler: None,
            model: None,
            coef: Vec::new(),
            intercept: Vec::new(),
            n_classes: 0,
        }
    }

    fn margins(&self, z: &[f64]) -> Vec<f64> {
        self.coef
            .iter()
            .zip(&self.intercept)
            .map(|(w, b)| b + w.iter().zip(z).map(|(wi, zi)| wi * zi).sum::<f64>())
            .collect()
    }
}

fn to_ndarray(x: &Array2<f64>) -> Result<ndarray::Array2<f64>> {
    ndarray::Array2::from_shape_vec(x.shape(), x.to_vec())
        .map_err(|e| PipelineError::Training(e.to_string()))
}

impl ClassifierModel for LogisticRegressionClassifier {
    fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &[usize],
        n_classes: usize,
        sample_weight: &[f64],
    ) -> Result<()> {
        let n = check_training_set(x, y, n_classes, sample_weight)?;
        if self.params.c <= 0.0 {
            return Err(PipelineError::Training("C must be positive".into()));
        }
        // linfa-logistic has no per-sample weights
        if sample_weight.iter().any(|w| *w != sample_weight[0]) {
            return Err(PipelineError::Training(
                "logistic regression does not support sample weights".into(),
            ));
        }
        let mut seen = vec![false; n_classes];
        y.iter().for_each(|&c| seen[c] = true);
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(PipelineError::Training(format!(
                "class {} has no training rows",
                missing
            )));
        }
        let n_features = x.ncols();

        let scaler = fit_scaler(x)?;
        let z = transform_all(x, &scaler)?;
        let dataset = Dataset::new(to_ndarray(&z)?, ndarray::Array1::from_vec(y.to_vec()));

        let fitted = MultiLogisticRegression::default()
            .alpha(1.0 / self.params.c)
            .max_iterations(self.params.max_iter as u64)
            .gradient_tolerance(self.params.tol)
            .fit(&dataset)
            .map_err(|e| PipelineError::Training(format!("logistic regression: {}", e)))?;

        let w = fitted.params();
        let b = fitted.intercept();
        if w.dim() != (n_features, n_classes) || b.len() != n_classes {
            return Err(PipelineError::Training(format!(
                "unexpected coefficient shape {:?} for {} features x {} classes",
                w.dim(),
                n_features,
                n_classes
            )));
        }
        let class_coef = |k: usize| -> Vec<f64> { (0..n_features).map(|j| w[[j, k]]).collect() };

        if n_classes == 2 {
            let (w0, w1) = (class_coef(0), class_coef(1));
            self.coef = vec![w1.iter().zip(&w0).map(|(a, c)| a - c).collect()];
            self.intercept = vec![b[1] - b[0]];
        } else {
            self.coef = (0..n_classes).map(class_coef).collect();
            self.intercept = b.iter().copied().collect();
        }

        log::debug!(
            "logistic regression (alpha {:.4}) fitted on {} rows x {} features",
            1.0 / self.params.c,
            n,
            n_features
        );
        self.n_classes = n_classes;
        self.scaler = Some(scaler);
        self.model = Some(fitted);
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.scaler.is_some() && self.model.is_some()
    }

    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn n_features(&self) -> usize {
        self.scaler.as_ref().map_or(0, Scaler::n_features)
    }

    fn n_outputs(&self) -> usize {
        self.intercept.len()
    }

    fn link(&self) -> Link {
        if self.n_classes == 2 {
            Link::Logistic
        } else {
            Link::Softmax
        }
    }

    fn predict_raw_row(&self, row: &[f64]) -> Result<Vec<f64>> {
        check_row(self.is_fitted(), self.n_features(), row)?;
        let z = match &self.scaler {
            Some(sc) => sc.transform_row(row),
            None => return Err(PipelineError::NotFitted),
        };
        Ok(self.margins(&z))
    }

    fn name(&self) -> &str {
        "logistic_regression"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(n: usize, label: impl Fn(f64, f64) -> usize) -> (Array2<f64>, Vec<usize>) {
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let a = (i % 10) as f64;
            let b = (i / 10) as f64;
            data.push(a);
            data.push(b);
            y.push(label(a, b));
        }
        (Array2::from_shape_vec((n, 2), data).unwrap(), y)
    }

    fn params(c: f64) -> LogisticParams {
        LogisticParams {
            c,
            max_iter: 200,
            tol: 1e-4,
        }
    }

    #[test]
    fn learns_a_linear_boundary() {
        let (x, y) = grid(50, |a, _| usize::from(a > 4.5));
        let mut lr = LogisticRegressionClassifier::new(params(10.0));
        lr.fit(&x, &y, 2, &vec![1.0; 50]).unwrap();

        assert_eq!(lr.n_outputs(), 1);
        assert_eq!(lr.predict(&x).unwrap(), y);
        let margin = lr.predict_raw_row(&[9.0, 2.0]).unwrap();
        assert!(margin[0] > 0.0);
    }

    #[test]
    fn margins_agree_with_linfa_probabilities() {
        let (x, y) = grid(60, |a, b| if a < 3.5 { 0 } else if b < 2.5 { 1 } else { 2 });
        let mut lr = LogisticRegressionClassifier::new(params(1.0));
        lr.fit(&x, &y, 3, &vec![1.0; 60]).unwrap();
        assert_eq!(lr.n_outputs(), 3);

        let ours = lr.predict_proba(&x).unwrap();
        let z = transform_all(&x, lr.scaler.as_ref().unwrap()).unwrap();
        let theirs = lr.model.as_ref().unwrap().predict_probabilities(&to_ndarray(&z).unwrap());
        for i in 0..60 {
            for k in 0..3 {
                assert!((ours[(i, k)] - theirs[[i, k]]).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn rejects_missing_classes_and_weights() {
        let (x, y) = grid(20, |a, _| usize::from(a > 4.5));
        let mut lr = LogisticRegressionClassifier::new(params(1.0));
        assert!(lr.fit(&x, &y, 3, &vec![1.0; 20]).is_err());

        let mut weights = vec![1.0; 20];
        weights[0] = 2.0;
        assert!(lr.fit(&x, &y, 2, &weights).is_err());
        assert!(!lr.is_fitted());
    }
}
