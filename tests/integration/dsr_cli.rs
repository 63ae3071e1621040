use super::super::*;
use mesh_dsr::logging::{get_received_message_records, DEFAULT_LOG_FILE, LOG_DIR_NAME};

fn get_cli_path() -> String {
    String::from(env!("CARGO_BIN_EXE_dsr_cli"))
}

#[test]
fn test_cli_runs_a_scenario_file() {
    let work_dir = create_test_dir("dsr_cli");
    let mut scenario = SimulationConfig::new();
    scenario.work_dir = Some(work_dir.clone());
    let scenario_file = format!("{}{}scenario.toml", &work_dir, std::path::MAIN_SEPARATOR);
    scenario
        .write_to_file(&scenario_file)
        .expect("Could not write scenario file");

    assert_cli::Assert::command(&[&get_cli_path()])
        .with_args(&["-c", &scenario_file, "-d", &work_dir])
        .succeeds()
        .and()
        .stdout()
        .contains("Packets delivered: 1")
        .unwrap();

    let log_file = format!(
        "{}{}{}{}{}",
        &work_dir,
        std::path::MAIN_SEPARATOR,
        LOG_DIR_NAME,
        std::path::MAIN_SEPARATOR,
        DEFAULT_LOG_FILE
    );
    let records = get_received_message_records(&log_file).expect("Could not read the log file");
    let accepted = records
        .iter()
        .filter(|r| r.msg_type == "DATA" && r.status == "ACCEPTED")
        .count();
    assert_eq!(accepted, 1);
}

#[test]
fn test_cli_rejects_a_missing_scenario_file() {
    let work_dir = create_test_dir("dsr_cli_missing");
    let scenario_file = format!("{}{}nothing.toml", &work_dir, std::path::MAIN_SEPARATOR);

    assert_cli::Assert::command(&[&get_cli_path()])
        .with_args(&["-c", &scenario_file, "-d", &work_dir])
        .fails_with(2)
        .unwrap();
}
