use assert_cmd::Command;
use predicates::str::contains;
use tempfile::TempDir;

fn cmd(data: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("ballot-scraper").unwrap();
    cmd.current_dir(data.path())
        .env("DATA_DIR", data.path().join("data"))
        .env(
            "DATABASE_URL",
            format!(
                "sqlite://{}?mode=rwc",
                data.path().join("data/ballot_measures.db").display()
            ),
        )
        .env("RUST_LOG", "warn");
    cmd
}

#[test]
fn help_lists_commands() {
    let data = TempDir::new().unwrap();
    cmd(&data)
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("scrape"))
        .stdout(contains("ingest"))
        .stdout(contains("export"));
}

#[test]
fn bad_level_is_rejected() {
    let data = TempDir::new().unwrap();
    cmd(&data)
        .args(["scrape", "--level", "federal"])
        .assert()
        .failure()
        .stderr(contains("invalid value"));
}

#[test]
fn stats_on_empty_database() {
    let data = TempDir::new().unwrap();
    cmd(&data)
        .arg("stats")
        .assert()
        .success()
        .stdout(contains("Total measures: 0"));
}

#[test]
fn county_scrape_writes_output() {
    let data = TempDir::new().unwrap();
    let output = data.path().join("out/county.json");
    cmd(&data)
        .args(["scrape", "--level", "county", "--output"])
        .arg(&output)
        .assert()
        .success()
        .stdout(contains("Scraping completed"))
        .stdout(contains("Found 0 items"));

    let saved: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    assert_eq!(saved["level"], "county");
}

#[test]
fn ingest_without_files_reports_failures() {
    let data = TempDir::new().unwrap();
    cmd(&data)
        .args(["ingest", "ncsl", "icpsr"])
        .assert()
        .failure()
        .stdout(contains("❌ NCSL"))
        .stderr(contains("❌ Error: All 2 sources failed"));
}

#[test]
fn export_csv_and_backup() {
    let data = TempDir::new().unwrap();
    let export = data.path().join("measures.csv");
    cmd(&data)
        .args(["export", "--format", "csv", "--output"])
        .arg(&export)
        .assert()
        .success()
        .stdout(contains("Exported 0 measures"));
    let csv = std::fs::read_to_string(&export).unwrap();
    assert!(csv.starts_with("id,year,measure_id,"));
    assert_eq!(csv.lines().count(), 1);

    let backup = data.path().join("backup.db");
    cmd(&data)
        .args(["backup", "--path"])
        .arg(&backup)
        .assert()
        .success();
    assert!(backup.exists());

    cmd(&data)
        .args(["backup", "--path"])
        .arg(&backup)
        .assert()
        .failure()
        .stderr(contains("already exists"));
}
