//! Raw clinical records to model feature vectors.
//!
//! A [`FeatureSchema`] declares the raw input fields (with their domains) and
//! the ordered list of model columns derived from them. Building a
//! [`FeaturePipeline`] checks the schema once. A record whose derived
//! columns overflow (a tiny positive denominator, a huge product) is rejected
//! like any other out-of-range input, so `transform` only ever returns finite
//! feature vectors.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, ValidationError};
use crate::math::Array2;

/// A single raw cell as it arrives from a form, a CSV row or a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl From<f64> for RawValue {
    fn from(value: f64) -> Self {
        RawValue::Number(value)
    }
}

impl From<&str> for RawValue {
    fn from(value: &str) -> Self {
        RawValue::Text(value.to_string())
    }
}

impl From<bool> for RawValue {
    fn from(value: bool) -> Self {
        RawValue::Bool(value)
    }
}

pub type RawRecord = BTreeMap<String, RawValue>;

/// One end of a numeric domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limit {
    pub value: f64,
    #[serde(default = "default_inclusive")]
    pub inclusive: bool,
}

fn default_inclusive() -> bool {
    true
}

impl Limit {
    pub fn inclusive(value: f64) -> Self {
        Self {
            value,
            inclusive: true,
        }
    }

    pub fn exclusive(value: f64) -> Self {
        Self {
            value,
            inclusive: false,
        }
    }

    /// True if every value admitted by this lower limit is strictly greater than `floor`.
    fn lower_exceeds(&self, floor: f64) -> bool {
        self.value > floor || (self.value == floor && !self.inclusive)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldKind {
    Numeric {
        #[serde(default)]
        min: Option<Limit>,
        #[serde(default)]
        max: Option<Limit>,
        /// Custom message used when the value falls outside the domain.
        #[serde(default)]
        message: Option<String>,
    },
    /// Yes/No style flag encoded as 1/0.
    YesNo,
    /// Two code groups encoded as 0 and 1.
    Binary { zero: Vec<String>, one: Vec<String> },
    Categorical { codes: BTreeMap<String, f64> },
}

impl FieldKind {
    fn numeric(min: Option<Limit>, max: Option<Limit>) -> Self {
        FieldKind::Numeric {
            min,
            max,
            message: None,
        }
    }

    fn binary(zero: &[&str], one: &[&str]) -> Self {
        FieldKind::Binary {
            zero: zero.iter().map(|s| s.to_string()).collect(),
            one: one.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Smallest value the field can take once encoded, with its inclusiveness.
    fn lower_limit(&self) -> Option<Limit> {
        match self {
            FieldKind::Numeric { min, .. } => *min,
            FieldKind::YesNo | FieldKind::Binary { .. } => Some(Limit::inclusive(0.0)),
            FieldKind::Categorical { codes } => codes
                .values()
                .copied()
                .fold(None, |acc: Option<f64>, v| Some(acc.map_or(v, |a| a.min(v))))
                .map(Limit::inclusive),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(flatten)]
    pub kind: FieldKind,
}

/// A condition counted by [`FeatureExpr::Count`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "test", rename_all = "snake_case")]
pub enum Condition {
    Above { field: String, threshold: f64 },
    Below { field: String, threshold: f64 },
    /// Satisfied when the encoded value is non-zero.
    Flag { field: String },
}

/// How a model column is computed. Operands name an input field or an
/// earlier output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FeatureExpr {
    Field { field: String },
    Scale { field: String, divisor: f64 },
    Log1p { field: String },
    Ratio { numerator: String, denominator: String },
    Product { fields: Vec<String> },
    Mean { fields: Vec<String> },
    Count { conditions: Vec<Condition> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(flatten)]
    pub expr: FeatureExpr,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub column: String,
    /// Class labels; a label's position is its class index.
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub name: String,
    pub inputs: Vec<FieldSpec>,
    pub outputs: Vec<OutputSpec>,
    pub target: TargetSpec,
}

fn field(name: &str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name: name.to_string(),
        kind,
    }
}

fn output(name: &str, expr: FeatureExpr) -> OutputSpec {
    OutputSpec {
        name: name.to_string(),
        expr,
    }
}

fn pass(name: &str) -> OutputSpec {
    output(
        name,
        FeatureExpr::Field {
            field: name.to_string(),
        },
    )
}

fn codes(pairs: &[(&str, f64)]) -> FieldKind {
    FieldKind::Categorical {
        codes: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

fn names(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

impl FeatureSchema {
    /// Built-in schema by name.
    pub fn preset(name: &str) -> Option<FeatureSchema> {
        match name.to_lowercase().replace('-', "_").as_str() {
            "cirrhosis" => Some(Self::cirrhosis()),
            "breast_cancer" | "bc" => Some(Self::breast_cancer()),
            _ => None,
        }
    }

    /// Multi-class cirrhosis outcome (Status C / CL / D) from raw lab values.
    pub fn cirrhosis() -> FeatureSchema {
        let positive = || FieldKind::numeric(Some(Limit::exclusive(0.0)), None);
        let non_negative = || FieldKind::numeric(Some(Limit::inclusive(0.0)), None);
        let yn = || FieldKind::binary(&["N"], &["Y"]);

        let inputs = vec![
            field("Drug", FieldKind::binary(&["Placebo"], &["D-penicillamine"])),
            field("Age", positive()),
            field("Sex", FieldKind::binary(&["F"], &["M"])),
            field("Ascites", yn()),
            field("Hepatomegaly", yn()),
            field("Spiders", yn()),
            field("Edema", FieldKind::binary(&["N"], &["S", "Y"])),
            field("Bilirubin", positive()),
            field("Cholesterol", non_negative()),
            field("Albumin", non_negative()),
            field("Copper", non_negative()),
            field("Alk_Phos", positive()),
            field("SGOT", non_negative()),
            field("Tryglicerides", non_negative()),
            field("Platelets", non_negative()),
            field("Prothrombin", non_negative()),
            field(
                "Stage",
                FieldKind::numeric(Some(Limit::inclusive(1.0)), Some(Limit::inclusive(4.0))),
            ),
        ];

        let outputs = vec![
            pass("Drug"),
            output(
                "Age_In_Years",
                FeatureExpr::Scale {
                    field: "Age".into(),
                    divisor: 365.25,
                },
            ),
            pass("Sex"),
            pass("Ascites"),
            pass("Hepatomegaly"),
            pass("Spiders"),
            pass("Edema"),
            output(
                "Bilirubin_log",
                FeatureExpr::Log1p {
                    field: "Bilirubin".into(),
                },
            ),
            output(
                "Cholesterol_log",
                FeatureExpr::Log1p {
                    field: "Cholesterol".into(),
                },
            ),
            pass("Albumin"),
            pass("Copper"),
            pass("Alk_Phos"),
            output(
                "SGOT_log",
                FeatureExpr::Log1p {
                    field: "SGOT".into(),
                },
            ),
            output(
                "Tryglicerides_log",
                FeatureExpr::Log1p {
                    field: "Tryglicerides".into(),
                },
            ),
            pass("Platelets"),
            pass("Prothrombin"),
            pass("Stage"),
            output(
                "Mean_Metrics",
                FeatureExpr::Mean {
                    fields: names(&["Ascites", "Hepatomegaly", "Spiders", "Edema"]),
                },
            ),
            output(
                "AST_ALT_Ratio",
                FeatureExpr::Ratio {
                    numerator: "SGOT".into(),
                    denominator: "Alk_Phos".into(),
                },
            ),
            output(
                "Albumin_Bilirubin_Ratio",
                FeatureExpr::Ratio {
                    numerator: "Albumin".into(),
                    denominator: "Bilirubin".into(),
                },
            ),
            output(
                "Age_Bilirubin",
                FeatureExpr::Product {
                    fields: names(&["Age_In_Years", "Bilirubin"]),
                },
            ),
            output(
                "Albumin_Platelets",
                FeatureExpr::Product {
                    fields: names(&["Albumin", "Platelets"]),
                },
            ),
            output(
                "Child_Pugh_Proxy",
                FeatureExpr::Count {
                    conditions: vec![
                        Condition::Above {
                            field: "Bilirubin".into(),
                            threshold: 2.0,
                        },
                        Condition::Below {
                            field: "Albumin".into(),
                            threshold: 2.8,
                        },
                        Condition::Flag {
                            field: "Ascites".into(),
                        },
                        Condition::Flag {
                            field: "Hepatomegaly".into(),
                        },
                    ],
                },
            ),
        ];

        FeatureSchema {
            name: "cirrhosis".into(),
            inputs,
            outputs,
            target: TargetSpec {
                column: "Status".into(),
                classes: names(&["C", "CL", "D"]),
            },
        }
    }

    /// Binary breast-cancer survival from the patient and tumor form.
    pub fn breast_cancer() -> FeatureSchema {
        let receptor = || FieldKind::binary(&["Negative", "0"], &["Positive", "1"]);
        let mut inputs = vec![
            field(
                "age_at_diagnosis",
                FieldKind::Numeric {
                    min: Some(Limit::inclusive(17.0)),
                    max: None,
                    message: Some("Age must be 17 or above.".into()),
                },
            ),
            field(
                "tumor_size_cm",
                FieldKind::numeric(Some(Limit::inclusive(0.0)), None),
            ),
            field("tumor_grade", codes(&[("1", 1.0), ("2", 2.0), ("3", 3.0)])),
        ];
        let flags = [
            "lymphovascular_invasion",
            "perineural_invasion",
            "metastasis",
            "recurrence",
        ];
        inputs.extend(flags.iter().map(|n| field(n, FieldKind::YesNo)));
        inputs.push(field("er_status", receptor()));
        inputs.push(field("pr_status", receptor()));
        inputs.push(field("her2_status", receptor()));
        inputs.push(field(
            "tumor_type",
            codes(&[
                ("Ductal", 0.0),
                ("Lobular", 1.0),
                ("Mixed", 2.0),
                ("0", 0.0),
                ("1", 1.0),
                ("2", 2.0),
            ]),
        ));
        inputs.push(field(
            "chemotherapy_type",
            codes(&[
                ("None", 0.0),
                ("Adjuvant", 1.0),
                ("Neoadjuvant", 2.0),
                ("0", 0.0),
                ("1", 1.0),
                ("2", 2.0),
            ]),
        ));
        inputs.push(field(
            "radiotherapy_type",
            codes(&[
                ("None", 0.0),
                ("External", 1.0),
                ("Internal", 2.0),
                ("0", 0.0),
                ("1", 1.0),
                ("2", 2.0),
            ]),
        ));
        let lifestyle = [
            "chemotherapy",
            "has_children",
            "breastfeeding",
            "physical_activity",
            "smoking",
            "alcohol_consumption",
        ];
        inputs.extend(lifestyle.iter().map(|n| field(n, FieldKind::YesNo)));

        let outputs = inputs.iter().map(|f| pass(&f.name)).collect();

        FeatureSchema {
            name: "breast_cancer".into(),
            inputs,
            outputs,
            target: TargetSpec {
                column: "survival_status".into(),
                classes: names(&["Deceased", "Survived"]),
            },
        }
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.outputs.iter().map(|o| o.name.clone()).collect()
    }
}

/// Index into the evaluation buffer: inputs first, then outputs in order.
type Slot = usize;

#[derive(Debug, Clone)]
enum Step {
    Copy(Slot),
    Scale(Slot, f64),
    Log1p(Slot),
    Ratio(Slot, Slot),
    Product(Vec<Slot>),
    Mean(Vec<Slot>),
    Count(Vec<(Slot, Test)>),
}

#[derive(Debug, Clone, Copy)]
enum Test {
    Above(f64),
    Below(f64),
    Flag,
}

/// Validates raw records against a [`FeatureSchema`] and encodes them.
#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    schema: FeatureSchema,
    feature_names: Vec<String>,
    steps: Vec<Step>,
}

impl FeaturePipeline {
    /// Check the schema and compile its outputs.
    ///
    /// Ratio denominators must reference an input whose domain is strictly
    /// positive and `log1p` inputs must be declared `> -1`.
    pub fn new(schema: FeatureSchema) -> Result<Self, ValidationError> {
        let invalid = |msg: String| ValidationError::InvalidSchema(msg);

        if schema.target.classes.len() < 2 {
            return Err(invalid("target must declare at least two classes".into()));
        }
        if schema.outputs.is_empty() {
            return Err(invalid("schema declares no output columns".into()));
        }

        let mut slots: HashMap<&str, Slot> = HashMap::new();
        for (i, f) in schema.inputs.iter().enumerate() {
            if slots.insert(f.name.as_str(), i).is_some() {
                return Err(invalid(format!("duplicate input field `{}`", f.name)));
            }
            if let FieldKind::Binary { zero, one } = &f.kind {
                if zero.iter().any(|z| one.iter().any(|o| o.eq_ignore_ascii_case(z))) {
                    return Err(invalid(format!(
                        "field `{}` maps a code to both 0 and 1",
                        f.name
                    )));
                }
            }
        }
        let n_inputs = schema.inputs.len();

        let input_kind = |name: &String| {
            schema
                .inputs
                .iter()
                .find(|f| &f.name == name)
                .map(|f| &f.kind)
        };

        let mut steps = Vec::with_capacity(schema.outputs.len());
        let mut out_names: Vec<&str> = Vec::new();
        for (j, out) in schema.outputs.iter().enumerate() {
            let lookup = |name: &String| -> Result<Slot, ValidationError> {
                slots
                    .get(name.as_str())
                    .copied()
                    .ok_or_else(|| invalid(format!("`{}` references unknown field `{}`", out.name, name)))
            };
            let step = match &out.expr {
                FeatureExpr::Field { field } => Step::Copy(lookup(field)?),
                FeatureExpr::Scale { field, divisor } => {
                    if !divisor.is_finite() || *divisor == 0.0 {
                        return Err(invalid(format!("`{}` has a zero divisor", out.name)));
                    }
                    Step::Scale(lookup(field)?, *divisor)
                }
                FeatureExpr::Log1p { field } => {
                    let safe = input_kind(field)
                        .and_then(FieldKind::lower_limit)
                        .map_or(false, |l| l.lower_exceeds(-1.0));
                    if !safe {
                        return Err(invalid(format!(
                            "`{}` takes log1p of `{}` which is not declared > -1",
                            out.name, field
                        )));
                    }
                    Step::Log1p(lookup(field)?)
                }
                FeatureExpr::Ratio {
                    numerator,
                    denominator,
                } => {
                    let safe = input_kind(denominator)
                        .and_then(FieldKind::lower_limit)
                        .map_or(false, |l| l.lower_exceeds(0.0));
                    if !safe {
                        return Err(invalid(format!(
                            "`{}` divides by `{}` which is not declared strictly positive",
                            out.name, denominator
                        )));
                    }
                    Step::Ratio(lookup(numerator)?, lookup(denominator)?)
                }
                FeatureExpr::Product { fields } | FeatureExpr::Mean { fields } => {
                    if fields.is_empty() {
                        return Err(invalid(format!("`{}` has no operands", out.name)));
                    }
                    let operands = fields.iter().map(|f| lookup(f)).collect::<Result<Vec<_>, _>>()?;
                    if matches!(out.expr, FeatureExpr::Product { .. }) {
                        Step::Product(operands)
                    } else {
                        Step::Mean(operands)
                    }
                }
                FeatureExpr::Count { conditions } => {
                    let mut tests = Vec::with_capacity(conditions.len());
                    for c in conditions {
                        let (name, test) = match c {
                            Condition::Above { field, threshold } => (field, Test::Above(*threshold)),
                            Condition::Below { field, threshold } => (field, Test::Below(*threshold)),
                            Condition::Flag { field } => (field, Test::Flag),
                        };
                        tests.push((lookup(name)?, test));
                    }
                    Step::Count(tests)
                }
            };
            steps.push(step);

            if out_names.contains(&out.name.as_str()) {
                return Err(invalid(format!("duplicate output column `{}`", out.name)));
            }
            out_names.push(out.name.as_str());
            // outputs may shadow an input name for later references
            slots.insert(out.name.as_str(), n_inputs + j);
        }

        let feature_names = schema.feature_names();
        Ok(Self {
            schema,
            feature_names,
            steps,
        })
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn class_labels(&self) -> &[String] {
        &self.schema.target.classes
    }

    /// Encode every declared input field, failing on the first invalid one.
    pub fn validate(&self, record: &RawRecord) -> Result<Vec<f64>, ValidationError> {
        self.schema
            .inputs
            .iter()
            .map(|spec| {
                let raw = record
                    .get(&spec.name)
                    .ok_or_else(|| ValidationError::MissingField(spec.name.clone()))?;
                encode_field(spec, raw)
            })
            .collect()
    }

    /// Validate then compute the model columns in schema order.
    pub fn transform(&self, record: &RawRecord) -> Result<Vec<f64>, ValidationError> {
        let mut buf = self.validate(record)?;
        let n_inputs = buf.len();
        buf.reserve(self.steps.len());
        for (step, name) in self.steps.iter().zip(&self.feature_names) {
            let v = match step {
                Step::Copy(s) => buf[*s],
                Step::Scale(s, d) => buf[*s] / d,
                Step::Log1p(s) => buf[*s].ln_1p(),
                Step::Ratio(n, d) => buf[*n] / buf[*d],
                Step::Product(ops) => ops.iter().map(|s| buf[*s]).product::<f64>(),
                Step::Mean(ops) => ops.iter().map(|s| buf[*s]).sum::<f64>() / ops.len() as f64,
                Step::Count(tests) => tests
                    .iter()
                    .filter(|(s, t)| match t {
                        Test::Above(th) => buf[*s] > *th,
                        Test::Below(th) => buf[*s] < *th,
                        Test::Flag => buf[*s] != 0.0,
                    })
                    .count() as f64,
            };
            // in-domain extremes can still overflow a ratio or product
            if !v.is_finite() {
                return Err(ValidationError::OutOfRange {
                    field: name.clone(),
                    message: format!("derived value {} is not finite", v),
                });
            }
            buf.push(v);
        }
        Ok(buf.split_off(n_inputs))
    }

    /// Class index of the record's target value.
    pub fn encode_target(&self, record: &RawRecord) -> Result<usize, ValidationError> {
        let target = &self.schema.target;
        let raw = record
            .get(&target.column)
            .ok_or_else(|| ValidationError::MissingField(target.column.clone()))?;
        let unknown = |code: String| ValidationError::UnknownCode {
            field: target.column.clone(),
            code,
        };
        match raw {
            RawValue::Text(s) => target
                .classes
                .iter()
                .position(|c| c.eq_ignore_ascii_case(s.trim()))
                .ok_or_else(|| unknown(s.clone())),
            RawValue::Number(v) => {
                if v.fract() == 0.0 && *v >= 0.0 && (*v as usize) < target.classes.len() {
                    Ok(*v as usize)
                } else {
                    Err(unknown(v.to_string()))
                }
            }
            RawValue::Bool(b) => {
                if target.classes.len() == 2 {
                    Ok(usize::from(*b))
                } else {
                    Err(unknown(b.to_string()))
                }
            }
        }
    }

    /// Feature matrix and labels for a batch of labelled records.
    pub fn transform_batch(
        &self,
        records: &[RawRecord],
    ) -> Result<(Array2<f64>, Vec<usize>), PipelineError> {
        let mut rows = Vec::with_capacity(records.len());
        let mut labels = Vec::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            let row = self
                .transform(record)
                .map_err(|e| PipelineError::InvalidInput(format!("record {}: {}", i, e)))?;
            let label = self
                .encode_target(record)
                .map_err(|e| PipelineError::InvalidInput(format!("record {}: {}", i, e)))?;
            rows.push(row);
            labels.push(label);
        }
        let x = Array2::from_rows(rows, self.feature_names.len())
            .map_err(|e| PipelineError::InvalidInput(e.to_string()))?;
        Ok((x, labels))
    }
}

fn encode_field(spec: &FieldSpec, raw: &RawValue) -> Result<f64, ValidationError> {
    let name = &spec.name;
    let wrong = |expected: &'static str| ValidationError::WrongType {
        field: name.clone(),
        expected,
    };
    let unknown = |code: String| ValidationError::UnknownCode {
        field: name.clone(),
        code,
    };

    match &spec.kind {
        FieldKind::Numeric { min, max, message } => {
            let v = match raw {
                RawValue::Number(v) => *v,
                RawValue::Text(s) => s.trim().parse::<f64>().map_err(|_| wrong("a number"))?,
                RawValue::Bool(_) => return Err(wrong("a number")),
            };
            if !v.is_finite() {
                return Err(ValidationError::OutOfRange {
                    field: name.clone(),
                    message: "value must be finite".into(),
                });
            }
            let below = min.map_or(false, |l| if l.inclusive { v < l.value } else { v <= l.value });
            let above = max.map_or(false, |l| if l.inclusive { v > l.value } else { v >= l.value });
            if below || above {
                let message = message.clone().unwrap_or_else(|| describe_domain(v, *min, *max));
                return Err(ValidationError::OutOfRange {
                    field: name.clone(),
                    message,
                });
            }
            Ok(v)
        }
        FieldKind::YesNo => match raw {
            RawValue::Bool(b) => Ok(f64::from(u8::from(*b))),
            RawValue::Number(v) if *v == 0.0 || *v == 1.0 => Ok(*v),
            RawValue::Number(v) => Err(unknown(v.to_string())),
            RawValue::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(1.0),
                "no" | "n" | "false" | "0" => Ok(0.0),
                _ => Err(unknown(s.clone())),
            },
        },
        FieldKind::Binary { zero, one } => {
            let code = code_text(raw).ok_or_else(|| wrong("a code"))?;
            if zero.iter().any(|z| z.eq_ignore_ascii_case(&code)) {
                Ok(0.0)
            } else if one.iter().any(|o| o.eq_ignore_ascii_case(&code)) {
                Ok(1.0)
            } else {
                Err(unknown(code))
            }
        }
        FieldKind::Categorical { codes } => {
            let code = code_text(raw).ok_or_else(|| wrong("a code"))?;
            codes
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&code))
                .map(|(_, v)| *v)
                .ok_or_else(|| unknown(code))
        }
    }
}

/// Text form of a coded value; integral numbers print without a fraction.
fn code_text(raw: &RawValue) -> Option<String> {
    match raw {
        RawValue::Text(s) => Some(s.trim().to_string()),
        RawValue::Number(v) if v.is_finite() && v.fract() == 0.0 => Some(format!("{}", *v as i64)),
        RawValue::Number(v) => Some(v.to_string()),
        RawValue::Bool(_) => None,
    }
}

fn describe_domain(v: f64, min: Option<Limit>, max: Option<Limit>) -> String {
    let mut parts = Vec::new();
    if let Some(l) = min {
        parts.push(format!("{} {}", if l.inclusive { ">=" } else { ">" }, l.value));
    }
    if let Some(l) = max {
        parts.push(format!("{} {}", if l.inclusive { "<=" } else { "<" }, l.value));
    }
    format!("{} is not {}", v, parts.join(" and "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cirrhosis_record() -> RawRecord {
        let mut r = RawRecord::new();
        r.insert("Drug".into(), "D-penicillamine".into());
        r.insert("Age".into(), 21464.0.into());
        r.insert("Sex".into(), "F".into());
        r.insert("Ascites".into(), "N".into());
        r.insert("Hepatomegaly".into(), "Y".into());
        r.insert("Spiders".into(), "N".into());
        r.insert("Edema".into(), "S".into());
        r.insert("Bilirubin".into(), 3.0.into());
        r.insert("Cholesterol".into(), 280.0.into());
        r.insert("Albumin".into(), 2.5.into());
        r.insert("Copper".into(), 52.0.into());
        r.insert("Alk_Phos".into(), 1200.0.into());
        r.insert("SGOT".into(), 120.0.into());
        r.insert("Tryglicerides".into(), 90.0.into());
        r.insert("Platelets".into(), 200.0.into());
        r.insert("Prothrombin".into(), 10.5.into());
        r.insert("Stage".into(), 3.0.into());
        r.insert("Status".into(), "CL".into());
        r
    }

    #[test]
    fn cirrhosis_columns_match_model_layout() {
        let pipeline = FeaturePipeline::new(FeatureSchema::cirrhosis()).unwrap();
        assert_eq!(pipeline.feature_names().len(), 23);
        assert_eq!(pipeline.feature_names()[1], "Age_In_Years");
        assert_eq!(pipeline.feature_names()[22], "Child_Pugh_Proxy");
    }

    #[test]
    fn cirrhosis_transform_derives_features() {
        let pipeline = FeaturePipeline::new(FeatureSchema::cirrhosis()).unwrap();
        let record = cirrhosis_record();
        let v = pipeline.transform(&record).unwrap();
        let col = |name: &str| {
            let idx = pipeline.feature_names().iter().position(|n| n == name).unwrap();
            v[idx]
        };

        assert_eq!(col("Drug"), 1.0);
        assert!((col("Age_In_Years") - 21464.0 / 365.25).abs() < 1e-12);
        assert_eq!(col("Edema"), 1.0);
        assert!((col("Bilirubin_log") - 4.0f64.ln()).abs() < 1e-12);
        assert_eq!(col("Mean_Metrics"), 0.5);
        assert!((col("AST_ALT_Ratio") - 0.1).abs() < 1e-12);
        assert!((col("Age_Bilirubin") - 3.0 * 21464.0 / 365.25).abs() < 1e-9);
        // bilirubin > 2, albumin < 2.8, hepatomegaly
        assert_eq!(col("Child_Pugh_Proxy"), 3.0);
        assert_eq!(pipeline.encode_target(&record).unwrap(), 1);
    }

    #[test]
    fn missing_and_unknown_fields_fail_validation() {
        let pipeline = FeaturePipeline::new(FeatureSchema::cirrhosis()).unwrap();
        let mut record = cirrhosis_record();
        record.remove("Albumin");
        assert_eq!(
            pipeline.transform(&record),
            Err(ValidationError::MissingField("Albumin".into()))
        );

        let mut record = cirrhosis_record();
        record.insert("Sex".into(), "X".into());
        assert!(matches!(
            pipeline.transform(&record),
            Err(ValidationError::UnknownCode { .. })
        ));

        let mut record = cirrhosis_record();
        record.insert("Bilirubin".into(), 0.0.into());
        assert!(matches!(
            pipeline.transform(&record),
            Err(ValidationError::OutOfRange { .. })
        ));

        let mut record = cirrhosis_record();
        record.insert("Copper".into(), true.into());
        assert!(matches!(
            pipeline.transform(&record),
            Err(ValidationError::WrongType { .. })
        ));
    }

    #[test]
    fn overflowing_derived_columns_are_rejected() {
        let pipeline = FeaturePipeline::new(FeatureSchema::cirrhosis()).unwrap();

        let mut record = cirrhosis_record();
        record.insert("Bilirubin".into(), 1e-310.into());
        match pipeline.transform(&record) {
            Err(ValidationError::OutOfRange { field, .. }) => assert_eq!(field, "Albumin_Bilirubin_Ratio"),
            other => panic!("expected an out-of-range ratio, got {:?}", other),
        }

        let mut record = cirrhosis_record();
        record.insert("Age".into(), 1e306.into());
        record.insert("Bilirubin".into(), 1e10.into());
        match pipeline.transform(&record) {
            Err(ValidationError::OutOfRange { field, .. }) => assert_eq!(field, "Age_Bilirubin"),
            other => panic!("expected an out-of-range product, got {:?}", other),
        }
    }

    #[test]
    fn breast_cancer_age_floor_uses_form_message() {
        let pipeline = FeaturePipeline::new(FeatureSchema::breast_cancer()).unwrap();
        let mut record = RawRecord::new();
        record.insert("age_at_diagnosis".into(), 16.0.into());
        let err = pipeline.validate(&record).unwrap_err();
        assert_eq!(
            err,
            ValidationError::OutOfRange {
                field: "age_at_diagnosis".into(),
                message: "Age must be 17 or above.".into()
            }
        );
    }

    #[test]
    fn schema_rejects_unsafe_ratio_and_log() {
        let mut schema = FeatureSchema::cirrhosis();
        schema.outputs.push(output(
            "Copper_per_Albumin",
            FeatureExpr::Ratio {
                numerator: "Copper".into(),
                denominator: "Albumin".into(),
            },
        ));
        assert!(matches!(
            FeaturePipeline::new(schema),
            Err(ValidationError::InvalidSchema(_))
        ));

        let mut schema = FeatureSchema::cirrhosis();
        schema.inputs.push(field("Delta", FieldKind::numeric(None, None)));
        schema.outputs.push(output(
            "Delta_log",
            FeatureExpr::Log1p {
                field: "Delta".into(),
            },
        ));
        assert!(FeaturePipeline::new(schema).is_err());
    }

    #[test]
    fn schema_round_trips_through_json() {
        let schema = FeatureSchema::cirrhosis();
        let json = serde_json::to_string(&schema).unwrap();
        let back: FeatureSchema = serde_json::from_str(&json).unwrap();
        assert_eq!(schema, back);
    }
}
