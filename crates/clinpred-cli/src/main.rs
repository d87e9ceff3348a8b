use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command, ValueHint};
use log::LevelFilter;
use std::path::PathBuf;

use clinpred_classifiers::explain::ExplainVariant;
use clinpred_classifiers::io::read_record_json;
use clinpred_cli::dashboard::config::DashboardConfig;
use clinpred_cli::dashboard::output::write_json;
use clinpred_cli::dashboard::run::{run_evaluate, run_explain, run_predict, run_variants};
use clinpred_cli::dashboard::util::validate_json_file;

fn config_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("config")
            .help("Path to the dashboard JSON configuration file")
            .required(false)
            .value_parser(clap::value_parser!(PathBuf))
            .value_hint(ValueHint::FilePath),
    )
    .arg(
        Arg::new("data")
            .short('d')
            .long("data")
            .value_parser(clap::builder::NonEmptyStringValueParser::new())
            .help("Path to the labelled data table. Overrides the dataset in the configuration file.")
            .value_hint(ValueHint::FilePath),
    )
    .arg(
        Arg::new("model")
            .short('m')
            .long("model")
            .value_parser(clap::builder::NonEmptyStringValueParser::new())
            .help("Model variant (lightgbm, xgboost, random_forest, logistic_regression or an alias).")
            .value_hint(ValueHint::Other),
    )
    .arg(
        Arg::new("output")
            .short('o')
            .long("output")
            .value_parser(clap::builder::NonEmptyStringValueParser::new())
            .help("Write the JSON result to this file instead of stdout.")
            .value_hint(ValueHint::FilePath),
    )
    .arg(
        Arg::new("top_n")
            .long("top-n")
            .value_parser(clap::value_parser!(usize))
            .help("Keep only the N most important features in explanations."),
    )
    .arg(
        Arg::new("allow_model_agnostic")
            .long("allow-model-agnostic")
            .help("Explain models without tree structure with the sampling estimator.")
            .action(ArgAction::SetTrue),
    )
}

fn main() -> Result<()> {
    env_logger::Builder::default()
        .filter_level(LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("CLINPRED_LOG", "error,clinpred=info"))
        .init();

    let matches = Command::new("clinpred")
        .version(clap::crate_version!())
        .about("Train, evaluate and explain clinical outcome classifiers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(Command::new("variants").about("List the registered model variants"))
        .subcommand(config_args(
            Command::new("evaluate").about("Train (memoized) and evaluate a model on the test partition"),
        ))
        .subcommand(
            config_args(Command::new("explain").about("Shapley explanation of a model on the test partition"))
                .arg(
                    Arg::new("variant")
                        .long("variant")
                        .help("Explanation view to produce.")
                        .value_parser(["ranking", "distribution", "decision-path", "waterfall"])
                        .default_value("ranking"),
                )
                .arg(
                    Arg::new("instance")
                        .long("instance")
                        .help("Test row to explain with the waterfall view.")
                        .value_parser(clap::value_parser!(usize))
                        .default_value("0"),
                ),
        )
        .subcommand(
            config_args(Command::new("predict").about("Predict the outcome of a single patient record"))
                .arg(
                    Arg::new("record")
                        .short('r')
                        .long("record")
                        .help("Path to the patient record (*.json)")
                        .required(true)
                        .value_parser(clap::value_parser!(PathBuf))
                        .value_hint(ValueHint::FilePath),
                )
                .arg(
                    Arg::new("waterfall")
                        .long("waterfall")
                        .help("Also explain the prediction with a waterfall view.")
                        .action(ArgAction::SetTrue),
                ),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    match matches.subcommand() {
        Some(("variants", _)) => write_json(&run_variants(), None),
        Some(("evaluate", sub_m)) => handle_evaluate(sub_m),
        Some(("explain", sub_m)) => handle_explain(sub_m),
        Some(("predict", sub_m)) => handle_predict(sub_m),
        _ => unreachable!("Subcommand is required by CLI configuration"),
    }
}

/// Parse the config, or print a template when none was given.
fn load_config(matches: &ArgMatches) -> Result<Option<DashboardConfig>> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => {
            log::info!("[clinpred] Using config: {:?}", path);
            Ok(Some(DashboardConfig::from_arguments(path, matches)?))
        }
        None => {
            eprintln!("[clinpred] No config file provided; printing a template.");
            write_json(&DashboardConfig::default(), None)?;
            Ok(None)
        }
    }
}

fn fail(what: &str, e: anyhow::Error) -> ! {
    log::error!("{} failed: {:#}", what, e);
    eprintln!("Error: {:#}", e);
    std::process::exit(1)
}

fn handle_evaluate(matches: &ArgMatches) -> Result<()> {
    let Some(config) = load_config(matches)? else {
        return Ok(());
    };
    match run_evaluate(&config) {
        Ok(record) => write_json(&record, config.output_path()),
        Err(e) => fail("Evaluation", e),
    }
}

fn handle_explain(matches: &ArgMatches) -> Result<()> {
    let Some(config) = load_config(matches)? else {
        return Ok(());
    };
    let name: &String = matches
        .get_one("variant")
        .expect("--variant has a default value");
    let variant = match name.parse::<ExplainVariant>()? {
        ExplainVariant::Waterfall { .. } => ExplainVariant::Waterfall {
            instance: *matches
                .get_one::<usize>("instance")
                .expect("--instance has a default value"),
        },
        other => other,
    };
    match run_explain(&config, variant) {
        Ok(artifact) => write_json(&artifact, config.output_path()),
        Err(e) => fail("Explanation", e),
    }
}

fn handle_predict(matches: &ArgMatches) -> Result<()> {
    let Some(config) = load_config(matches)? else {
        return Ok(());
    };
    let record_path: &PathBuf = matches
        .get_one("record")
        .expect("--record is a required argument");
    validate_json_file(record_path)?;
    let record = read_record_json(record_path)?;

    match run_predict(&config, record, matches.get_flag("waterfall")) {
        Ok(report) => write_json(&report, config.output_path()),
        Err(e) => fail("Prediction", e),
    }
}
