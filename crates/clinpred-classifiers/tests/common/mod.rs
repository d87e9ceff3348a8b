#![allow(dead_code)]

use std::sync::Arc;

use clinpred_classifiers::data_handling::{Dataset, DatasetStore};
use clinpred_classifiers::features::{RawRecord, RawValue};
use clinpred_classifiers::math::{Array1, Array2};
use clinpred_classifiers::trainer::Trainer;

/// Small deterministic generator so fixtures do not depend on rand's stream.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn uniform(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn coin(&mut self, p: f64) -> bool {
        self.uniform() < p
    }

    pub fn pick<'a>(&mut self, options: &[&'a str]) -> &'a str {
        let i = (self.uniform() * options.len() as f64) as usize;
        options[i.min(options.len() - 1)]
    }
}

fn names(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|j| format!("{}{}", prefix, j)).collect()
}

/// 100 rows of 5 binary features; the label is a noisy majority of the first three.
pub fn toy_binary() -> Dataset {
    let mut rng = Lcg::new(7);
    let (n, f) = (100, 5);
    let mut x = Vec::with_capacity(n * f);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let row: Vec<f64> = (0..f).map(|_| if rng.coin(0.5) { 1.0 } else { 0.0 }).collect();
        let vote = row[0] + row[1] + row[2] >= 2.0;
        y.push(usize::from(vote != rng.coin(0.1)));
        x.extend(row);
    }
    Dataset::new(
        Array2::from_shape_vec((n, f), x).unwrap(),
        Array1::from_vec(y),
        names("flag_", f),
        vec!["negative".into(), "positive".into()],
    )
    .unwrap()
}

/// Continuous features with a noisy linear score cut into `n_classes` bands.
pub fn banded(n: usize, n_classes: usize, seed: u64) -> Dataset {
    let mut rng = Lcg::new(seed);
    let f = 4;
    let cuts: Vec<f64> = (1..n_classes).map(|k| 0.9 * k as f64 / n_classes as f64 + 0.2).collect();
    let mut x = Vec::with_capacity(n * f);
    let mut y = Vec::with_capacity(n);
    for _ in 0..n {
        let row: Vec<f64> = (0..f).map(|_| rng.uniform()).collect();
        let score = row[0] + 0.5 * row[1] + 0.2 * rng.uniform();
        y.push(cuts.iter().filter(|&&c| score > c).count());
        x.extend(row);
    }
    Dataset::new(
        Array2::from_shape_vec((n, f), x).unwrap(),
        Array1::from_vec(y),
        names("x", f),
        (0..n_classes).map(|k| format!("class_{}", k)).collect(),
    )
    .unwrap()
}

pub fn trainer_with(id: &str, dataset: Dataset) -> Arc<Trainer> {
    let store = Arc::new(DatasetStore::new());
    store.register(id, dataset).unwrap();
    Arc::new(Trainer::new(store))
}

fn yes_no(rng: &mut Lcg, p: f64) -> RawValue {
    RawValue::from(if rng.coin(p) { "Yes" } else { "No" })
}

/// A valid breast-cancer form submission.
pub fn breast_cancer_record(rng: &mut Lcg) -> RawRecord {
    let mut r = RawRecord::new();
    r.insert("age_at_diagnosis".into(), (25.0 + (60.0 * rng.uniform()).round()).into());
    r.insert("tumor_size_cm".into(), (0.5 + 6.0 * rng.uniform()).into());
    r.insert("tumor_grade".into(), rng.pick(&["1", "2", "3"]).into());
    r.insert("lymphovascular_invasion".into(), yes_no(rng, 0.3));
    r.insert("perineural_invasion".into(), yes_no(rng, 0.2));
    r.insert("metastasis".into(), RawValue::Bool(rng.coin(0.2)));
    r.insert("recurrence".into(), yes_no(rng, 0.15));
    r.insert("er_status".into(), rng.pick(&["Positive", "Negative"]).into());
    r.insert("pr_status".into(), rng.pick(&["Positive", "Negative"]).into());
    r.insert("her2_status".into(), rng.pick(&["0", "1"]).into());
    r.insert("tumor_type".into(), rng.pick(&["Ductal", "Lobular", "Mixed"]).into());
    r.insert("chemotherapy_type".into(), ((rng.uniform() * 3.0).floor()).into());
    r.insert("radiotherapy_type".into(), rng.pick(&["None", "External", "Internal"]).into());
    for flag in [
        "chemotherapy",
        "has_children",
        "breastfeeding",
        "physical_activity",
        "smoking",
        "alcohol_consumption",
    ] {
        let v = yes_no(rng, 0.5);
        r.insert(flag.into(), v);
    }
    r
}

/// Labelled records whose outcome depends on size, grade and metastasis.
pub fn breast_cancer_records(n: usize, seed: u64) -> Vec<RawRecord> {
    let mut rng = Lcg::new(seed);
    (0..n)
        .map(|_| {
            let mut r = breast_cancer_record(&mut rng);
            let size = match r["tumor_size_cm"] {
                RawValue::Number(v) => v,
                _ => 0.0,
            };
            let grade = match &r["tumor_grade"] {
                RawValue::Text(g) => g.parse::<f64>().unwrap_or(1.0),
                _ => 1.0,
            };
            let metastasis = r["metastasis"] == RawValue::Bool(true);
            let risk = size / 6.0 + grade / 6.0 + (if metastasis { 0.6 } else { 0.0 }) + 0.3 * rng.uniform();
            let status = if risk > 0.9 { "Deceased" } else { "Survived" };
            r.insert("survival_status".into(), status.into());
            r
        })
        .collect()
}

fn flag(rng: &mut Lcg, p: f64) -> RawValue {
    RawValue::from(if rng.coin(p) { "Y" } else { "N" })
}

fn lab(rng: &mut Lcg, lo: f64, hi: f64) -> RawValue {
    RawValue::Number(lo + (hi - lo) * rng.uniform())
}

/// A valid cirrhosis submission with typical lab values.
pub fn cirrhosis_record(rng: &mut Lcg) -> RawRecord {
    let mut r = RawRecord::new();
    r.insert("Drug".into(), rng.pick(&["Placebo", "D-penicillamine"]).into());
    r.insert("Age".into(), lab(rng, 9000.0, 28000.0));
    r.insert("Sex".into(), rng.pick(&["F", "F", "M"]).into());
    r.insert("Ascites".into(), flag(rng, 0.1));
    r.insert("Hepatomegaly".into(), flag(rng, 0.5));
    r.insert("Spiders".into(), flag(rng, 0.3));
    r.insert("Edema".into(), rng.pick(&["N", "S", "Y"]).into());
    r.insert("Bilirubin".into(), lab(rng, 0.3, 12.0));
    r.insert("Cholesterol".into(), lab(rng, 120.0, 600.0));
    r.insert("Albumin".into(), lab(rng, 2.0, 4.6));
    r.insert("Copper".into(), lab(rng, 4.0, 250.0));
    r.insert("Alk_Phos".into(), lab(rng, 300.0, 6000.0));
    r.insert("SGOT".into(), lab(rng, 30.0, 250.0));
    r.insert("Tryglicerides".into(), lab(rng, 40.0, 250.0));
    r.insert("Platelets".into(), lab(rng, 60.0, 450.0));
    r.insert("Prothrombin".into(), lab(rng, 9.0, 14.0));
    r.insert("Stage".into(), rng.pick(&["1", "2", "3", "4"]).into());
    r
}

fn number(r: &RawRecord, field: &str) -> f64 {
    match &r[field] {
        RawValue::Number(v) => *v,
        RawValue::Text(s) => s.parse().unwrap_or(0.0),
        RawValue::Bool(b) => f64::from(u8::from(*b)),
    }
}

/// Labelled cirrhosis records with all three outcomes (C, CL, D) present.
pub fn cirrhosis_records(n: usize, seed: u64) -> Vec<RawRecord> {
    let mut rng = Lcg::new(seed);
    (0..n)
        .map(|i| {
            let mut r = cirrhosis_record(&mut rng);
            let risk = number(&r, "Bilirubin") / 4.0 + number(&r, "Stage") / 2.0 + 0.5 * rng.uniform();
            let status = match i % 10 {
                0 => "CL",
                _ if risk > 2.6 => "D",
                _ => "C",
            };
            r.insert("Status".into(), status.into());
            r
        })
        .collect()
}
