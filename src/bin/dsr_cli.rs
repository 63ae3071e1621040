#[macro_use]
extern crate slog;
extern crate mesh_dsr;

use clap::{App, Arg, ArgMatches};
use mesh_dsr::config::SimulationConfig;
use mesh_dsr::{logging, simulation};
use mesh_dsr::{DsrError, DsrErrorKind};
use std::env;
use std::fs;

const ARG_CONFIG: &str = "config";
const ARG_WORK_DIR: &str = "work_dir";
const ARG_TERMINAL_LOG: &str = "term_log";
const ARG_DURATION: &str = "duration";
const VERSION: &str = env!("CARGO_PKG_VERSION");
const CONFIG_FILE_NAME: &str = "scenario.toml";
const ERROR_EXECUTION_FAILURE: i32 = 1;
const ERROR_INITIALIZATION: i32 = 2;

fn run(config: SimulationConfig) -> Result<(), DsrError> {
    let work_dir = config.work_dir.clone().unwrap_or_else(|| String::from("."));
    let log_file_name = format!(
        "{}{}{}{}{}",
        &work_dir,
        std::path::MAIN_SEPARATOR,
        logging::LOG_DIR_NAME,
        std::path::MAIN_SEPARATOR,
        logging::DEFAULT_LOG_FILE
    );
    let logger = logging::create_logger(&log_file_name, config.term_log.unwrap_or(false))
        .unwrap_or_else(|e| {
            println!("dsr_cli failed with the following error: {}", e);
            ::std::process::exit(ERROR_INITIALIZATION);
        });

    info!(logger, "Scenario: {:?}", &config);
    let report = simulation::run_simulation(&config, logger)?;
    println!("{}", report);
    Ok(())
}

fn get_cli_parameters<'a>() -> ArgMatches<'a> {
    App::new("dsr_cli").version(VERSION)
                       .about("Runs a DSR scenario over a simulated network and reports the delivery results")
                       .arg(Arg::with_name(ARG_CONFIG)
                             .short("c")
                             .long("config")
                             .value_name("FILE")
                             .help("Scenario file describing the nodes, links, traffic and protocol parameters.")
                             .takes_value(true))
                       .arg(Arg::with_name(ARG_WORK_DIR)
                             .short("d")
                             .long("work_dir")
                             .value_name("DIR")
                             .help("Operating directory for the program, where logs will be placed.")
                             .takes_value(true))
                       .arg(Arg::with_name(ARG_DURATION)
                             .short("t")
                             .long("duration")
                             .value_name("MILLISECONDS")
                             .help("Overrides the length of the run set in the scenario file.")
                             .takes_value(true))
                       .arg(Arg::with_name(ARG_TERMINAL_LOG)
                             .short("l")
                             .long("log_to_terminal")
                             .value_name("true/false")
                             .help("Should the run log operations to the terminal as well")
                             .takes_value(true))
                       .get_matches()
}

fn validate_config(config: &mut SimulationConfig, matches: &ArgMatches) -> Result<(), DsrError> {
    //work_dir
    let work_dir = matches
        .value_of(ARG_WORK_DIR)
        .map(String::from)
        .or_else(|| config.work_dir.clone())
        .unwrap_or_else(|| String::from("."));
    let dir_info = fs::metadata(std::path::Path::new(work_dir.as_str())).map_err(|e| {
        let err_msg = String::from("work_dir is not a valid directory or it's not writable");
        DsrError {
            kind: DsrErrorKind::Configuration(err_msg),
            cause: Some(Box::new(e)),
        }
    })?;
    if !dir_info.is_dir() || dir_info.permissions().readonly() {
        let err_msg = String::from("work_dir is not a valid directory or it's not writable");
        return Err(DsrError::from(DsrErrorKind::Configuration(err_msg)));
    }
    config.work_dir = Some(work_dir);

    // Duration
    if let Some(value) = matches.value_of(ARG_DURATION) {
        config.duration = value.parse::<i64>().map_err(|e| {
            let err_msg = String::from("duration must be a number of milliseconds");
            DsrError {
                kind: DsrErrorKind::Configuration(err_msg),
                cause: Some(Box::new(e)),
            }
        })?;
    }

    // Log to terminal
    config.term_log = matches
        .value_of(ARG_TERMINAL_LOG)
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .or(config.term_log);

    config.validate()
}

/// Reads the scenario file and applies the command line overrides.
fn init(matches: &ArgMatches) -> Result<SimulationConfig, DsrError> {
    let config_file_path = match matches.value_of(ARG_CONFIG) {
        Some(path) => std::path::PathBuf::from(path),
        None => {
            //No configuration file was passed. Look for default option: current_dir + default name.
            let mut current_dir = env::current_dir().map_err(|e| {
                let err_msg = String::from("Failed to read current directory");
                DsrError {
                    kind: DsrErrorKind::Configuration(err_msg),
                    cause: Some(Box::new(e)),
                }
            })?;
            current_dir.push(CONFIG_FILE_NAME);
            current_dir
        }
    };
    let mut configuration = SimulationConfig::from_file(&config_file_path)?;
    validate_config(&mut configuration, &matches)?;

    Ok(configuration)
}

fn main() {
    //Enable the a more readable version of backtraces
    color_backtrace::install();

    //Get the CLI parameters
    let matches = get_cli_parameters();

    //Initialization
    let config = init(&matches).unwrap_or_else(|e| {
        println!("dsr_cli failed with the following error: {}", e);
        std::process::exit(ERROR_INITIALIZATION);
    });

    if let Err(ref e) = run(config) {
        eprintln!("dsr_cli failed with the following error: {}", e);
        std::process::exit(ERROR_EXECUTION_FAILURE);
    }
}
