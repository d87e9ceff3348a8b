use std::sync::Arc;

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use clinpred_classifiers::config::catalog;
use clinpred_classifiers::data_handling::{Dataset, DatasetStore};
use clinpred_classifiers::evaluation::evaluate;
use clinpred_classifiers::explain::{explain, AttributionArtifact, ExplainOptions, ExplainVariant};
use clinpred_classifiers::features::{FeaturePipeline, FeatureSchema, RawRecord, RawValue};
use clinpred_classifiers::inference::InferenceService;
use clinpred_classifiers::trainer::Trainer;

fn flag(rng: &mut StdRng, p: f64) -> RawValue {
    RawValue::from(if rng.gen_bool(p) { "Y" } else { "N" })
}

fn lab(rng: &mut StdRng, lo: f64, hi: f64) -> RawValue {
    RawValue::Number(rng.gen_range(lo..hi))
}

/// Cirrhosis-like patients whose outcome follows bilirubin, stage and age.
fn synthetic_patients(n: usize, rng: &mut StdRng) -> Vec<RawRecord> {
    (0..n)
        .map(|_| {
            let bilirubin: f64 = rng.gen_range(0.3..12.0);
            let stage = rng.gen_range(1..=4) as f64;
            let age_days: f64 = rng.gen_range(9000.0..28000.0);

            let mut r = RawRecord::new();
            r.insert("Drug".into(), (if rng.gen_bool(0.5) { "Placebo" } else { "D-penicillamine" }).into());
            r.insert("Age".into(), age_days.into());
            r.insert("Sex".into(), (if rng.gen_bool(0.9) { "F" } else { "M" }).into());
            r.insert("Ascites".into(), flag(rng, 0.1));
            r.insert("Hepatomegaly".into(), flag(rng, 0.5));
            r.insert("Spiders".into(), flag(rng, 0.3));
            r.insert("Edema".into(), (["N", "S", "Y"][rng.gen_range(0..3)]).into());
            r.insert("Bilirubin".into(), bilirubin.into());
            r.insert("Cholesterol".into(), lab(rng, 120.0, 600.0));
            r.insert("Albumin".into(), lab(rng, 2.0, 4.6));
            r.insert("Copper".into(), lab(rng, 4.0, 250.0));
            r.insert("Alk_Phos".into(), lab(rng, 300.0, 6000.0));
            r.insert("SGOT".into(), lab(rng, 30.0, 250.0));
            r.insert("Tryglicerides".into(), lab(rng, 40.0, 250.0));
            r.insert("Platelets".into(), lab(rng, 60.0, 450.0));
            r.insert("Prothrombin".into(), lab(rng, 9.0, 14.0));
            r.insert("Stage".into(), stage.into());

            let risk = bilirubin / 4.0 + stage / 2.0 + age_days / 20000.0 + rng.gen_range(-0.5..0.5);
            let status = if risk > 3.4 {
                "D"
            } else if risk > 3.0 {
                "CL"
            } else {
                "C"
            };
            r.insert("Status".into(), status.into());
            r
        })
        .collect()
}

fn main() -> Result<()> {
    env_logger::init();

    let mut rng = StdRng::seed_from_u64(2024);
    let pipeline = Arc::new(FeaturePipeline::new(FeatureSchema::cirrhosis())?);
    let records = synthetic_patients(400, &mut rng);
    let dataset = Dataset::from_records(&pipeline, &records)?;
    dataset.log_input_data_summary();

    let store = Arc::new(DatasetStore::new());
    store.register("cirrhosis", dataset)?;
    let trainer = Arc::new(Trainer::new(Arc::clone(&store)));
    let test = store.get("cirrhosis")?.test.clone();

    let options = ExplainOptions {
        top_n: Some(5),
        allow_model_agnostic: true,
        ..ExplainOptions::default()
    };
    for spec in catalog() {
        let fitted = trainer.train(&spec.id, "cirrhosis")?;
        let record = evaluate(&fitted, &store, "cirrhosis")?;
        println!("{} (fitted in {:.2?})", spec, fitted.fit_time);
        for row in &record.rows {
            match row.train {
                Some(train) => println!("  {:<10} train {:.4}  test {:.4}", row.metric, train, row.test),
                None => println!("  {:<10}              test {:.4}", row.metric, row.test),
            }
        }
        if let AttributionArtifact::Ranking { features } =
            explain(&fitted, &test.x, ExplainVariant::Ranking, &options)?
        {
            for f in features {
                println!("    {:<20} {:.4}", f.feature, f.mean_abs_shap);
            }
        }
    }

    let service = InferenceService::new(Arc::clone(&trainer), Arc::clone(&pipeline), "cirrhosis");
    let patient = synthetic_patients(1, &mut rng).remove(0);
    let response = service.predict("lightgbm", &patient)?;
    println!("predicted {} with {:?}", response.label, response.probabilities);
    Ok(())
}
