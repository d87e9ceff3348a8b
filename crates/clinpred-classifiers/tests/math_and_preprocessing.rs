//! Integration tests for the array types and the column scaler.

use clinpred_classifiers::math::{argmax, Array1, Array2};
use clinpred_classifiers::preprocessing::{fit_scaler, transform_all};

// ---------------------------------------------------------------------------
// Array1
// ---------------------------------------------------------------------------

#[test]
fn array1_select_and_index() {
    let a = Array1::from_vec(vec![10, 20, 30, 40, 50]);
    assert_eq!(a.select(&[0, 2, 4]).to_vec(), vec![10, 30, 50]);
    assert_eq!(a[1], 20);
    let e: Array1<usize> = Array1::from_vec(vec![]);
    assert!(e.is_empty());
}

#[test]
fn argmax_prefers_the_first_maximum() {
    assert_eq!(argmax(&[0.2, 0.5, 0.5, 0.1]), Some(1));
    assert_eq!(argmax(&[]), None);
}

// ---------------------------------------------------------------------------
// Array2
// ---------------------------------------------------------------------------

#[test]
fn array2_shape_mismatch_errors() {
    assert!(Array2::<f64>::from_shape_vec((2, 3), vec![1.0, 2.0, 3.0]).is_err());
    assert!(Array2::from_rows(vec![vec![1, 2], vec![3]], 2).is_err());
}

#[test]
fn array2_rows_columns_and_selection() {
    let a = Array2::from_shape_vec((3, 2), vec![1, 2, 3, 4, 5, 6]).unwrap();
    assert_eq!(a[(1, 0)], 3);
    assert_eq!(a.row_slice(2), &[5, 6]);

    let picked = a.select_rows(&[2, 0]);
    assert_eq!(picked.to_vec(), vec![5, 6, 1, 2]);
    assert_eq!(a.rows().count(), 3);
}

#[test]
fn array2_finiteness() {
    let mut a: Array2<f64> = Array2::zeros(2, 2);
    assert!(a.is_finite());
    a.row_slice_mut(1)[0] = f64::NAN;
    assert!(!a.is_finite());
}

// ---------------------------------------------------------------------------
// Scaler fit / transform
// ---------------------------------------------------------------------------

#[test]
fn fit_scaler_computes_mean_and_std() {
    let x = Array2::from_shape_vec(
        (4, 2),
        vec![
            1.0, 10.0,
            2.0, 10.0,
            3.0, 10.0,
            4.0, 10.0,
        ],
    )
    .unwrap();

    let sc = fit_scaler(&x).unwrap();
    assert!((sc.mean[0] - 2.5).abs() < 1e-12);
    assert!((sc.std[0] - 1.25f64.sqrt()).abs() < 1e-12);
    // constant column keeps unit scale
    assert_eq!(sc.std[1], 1.0);

    let t = transform_all(&x, &sc).unwrap();
    let col_mean: f64 = (0..4).map(|r| t[(r, 0)]).sum::<f64>() / 4.0;
    assert!(col_mean.abs() < 1e-12);
    assert!((0..4).all(|r| t[(r, 1)] == 0.0));
}

#[test]
fn scaler_rejects_empty_and_mismatched_input() {
    let empty: Array2<f64> = Array2::zeros(0, 3);
    assert!(fit_scaler(&empty).is_err());

    let x = Array2::from_shape_vec((2, 2), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    let sc = fit_scaler(&x).unwrap();
    let wide: Array2<f64> = Array2::zeros(2, 3);
    assert!(transform_all(&wide, &sc).is_err());
}
