//! CLI integration tests for cairn
//!
//! Every test runs against its own config directory (and so its own
//! database) with no API key, so nothing reaches the network.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A command isolated in `home`
#[allow(deprecated)]
fn cairn_cmd(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cairn").unwrap();
    cmd.current_dir(home.path())
        .env("CAIRN_CONFIG_DIR", home.path())
        .env_remove("CAIRN_API_KEY")
        .env_remove("OPENROUTER_API_KEY")
        .env_remove("RUST_LOG");
    cmd
}

fn add_entity(home: &TempDir, title: &str) {
    cairn_cmd(home)
        .args(["entity", "add", title])
        .assert()
        .success();
}

fn connect(home: &TempDir, source: &str, target: &str) {
    cairn_cmd(home)
        .args(["relation", "add", source, target])
        .assert()
        .success();
}

fn triangle(home: &TempDir) {
    for title in ["Ownership", "Borrowing", "Lifetimes"] {
        add_entity(home, title);
    }
    connect(home, "Ownership", "Borrowing");
    connect(home, "Borrowing", "Lifetimes");
    connect(home, "Lifetimes", "Ownership");
}

fn stats_json(home: &TempDir) -> serde_json::Value {
    let output = cairn_cmd(home)
        .args(["communities", "stats", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help_command() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("communities"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_output() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cairn"));
}

#[test]
fn test_config_path_honors_config_dir() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"))
        .stdout(predicate::str::contains(
            home.path().to_string_lossy().to_string(),
        ));
}

#[test]
fn test_config_set_then_get() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["config", "set", "communities.algorithm", "leiden"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Set communities.algorithm = leiden"));

    cairn_cmd(&home)
        .args(["config", "get", "communities.algorithm"])
        .assert()
        .success()
        .stdout("leiden\n");

    assert!(home.path().join("config.toml").exists());
}

#[test]
fn test_config_rejects_invalid_values() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["config", "set", "communities.min_cluster_size", "0"])
        .assert()
        .failure();

    cairn_cmd(&home)
        .args(["config", "set", "llm.api_key", "sk-secret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("environment variable"));

    cairn_cmd(&home)
        .args(["config", "get", "no.such.key"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown configuration key"));
}

#[test]
fn test_config_reset_restores_defaults() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["-q", "config", "set", "communities.resolution", "2.5"])
        .assert()
        .success()
        .stdout("");

    cairn_cmd(&home).args(["config", "reset"]).assert().success();

    cairn_cmd(&home)
        .args(["config", "get", "communities.resolution"])
        .assert()
        .success()
        .stdout("1\n");
}

#[test]
fn test_config_list_shows_community_keys() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("communities.max_cluster_size = 50"))
        .stdout(predicate::str::contains("communities.global_query.enabled = true"));
}

#[test]
fn test_entities_and_relations() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["entity", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No entities found."));

    add_entity(&home, "Ownership");
    add_entity(&home, "Borrowing");

    cairn_cmd(&home)
        .args(["entity", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Ownership"))
        .stdout(predicate::str::contains("Borrowing"));

    cairn_cmd(&home)
        .args(["relation", "add", "Ownership", "Borrowing", "--label", "enables"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Connected 'Ownership' -> 'Borrowing'"));

    cairn_cmd(&home)
        .args(["relation", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("-[enables]->"));
}

#[test]
fn test_relation_to_unknown_entity_fails() {
    let home = TempDir::new().unwrap();
    add_entity(&home, "Ownership");

    cairn_cmd(&home)
        .args(["relation", "add", "Ownership", "Nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Entity 'Nowhere' not found"));

    cairn_cmd(&home)
        .args(["relation", "add", "Ownership", "Ownership"])
        .assert()
        .failure();
}

#[test]
fn test_detect_on_tiny_graph_gives_empty_hierarchy() {
    let home = TempDir::new().unwrap();
    add_entity(&home, "Ownership");
    add_entity(&home, "Borrowing");
    connect(&home, "Ownership", "Borrowing");

    cairn_cmd(&home)
        .args(["communities", "detect"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Not enough connected entities"));

    let stats = stats_json(&home);
    assert_eq!(stats["total_communities"], 0);
    assert!(stats["last_detected_at"].is_string());
}

#[test]
fn test_detect_without_api_key_still_clusters() {
    let home = TempDir::new().unwrap();
    triangle(&home);

    cairn_cmd(&home)
        .args(["communities", "detect"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Detected"))
        .stdout(predicate::str::contains("Level 0"))
        .stderr(predicate::str::contains("No API key set"));

    cairn_cmd(&home)
        .args(["communities", "hierarchy", "--check"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Hierarchy OK"));

    cairn_cmd(&home)
        .args(["communities", "hierarchy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("L0"))
        .stdout(predicate::str::contains("(no summary)"));

    let stats = stats_json(&home);
    assert!(stats["total_communities"].as_u64().unwrap() >= 1);
    assert_eq!(stats["stale_count"], 0);
    assert_eq!(stats["changes_since_detection"], 0);
}

#[test]
fn test_detect_json_partitions_every_entity() {
    let home = TempDir::new().unwrap();
    triangle(&home);

    let output = cairn_cmd(&home)
        .args(["communities", "detect", "--format", "json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let hierarchy: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let leaves = hierarchy["levels"]["0"].as_array().unwrap();
    let members: usize = leaves
        .iter()
        .map(|c| c["member_entity_ids"].as_array().unwrap().len())
        .sum();
    assert_eq!(members, 3);
    assert!(
        leaves
            .iter()
            .all(|c| c["color"].as_str().unwrap().starts_with('#'))
    );
}

#[test]
fn test_mutations_after_detection_mark_communities_stale() {
    let home = TempDir::new().unwrap();

    cairn_cmd(&home)
        .args(["communities", "invalidate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to invalidate."));

    triangle(&home);
    cairn_cmd(&home)
        .args(["communities", "detect"])
        .assert()
        .success();

    add_entity(&home, "Traits");

    let stats = stats_json(&home);
    assert_eq!(stats["changes_since_detection"], 1);
    assert_eq!(stats["stale_count"], stats["total_communities"]);

    cairn_cmd(&home)
        .args(["communities", "invalidate", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"invalidated\": true"));
    assert_eq!(stats_json(&home)["changes_since_detection"], 2);
}

#[test]
fn test_auto_invalidate_off_leaves_communities_fresh() {
    let home = TempDir::new().unwrap();
    triangle(&home);
    cairn_cmd(&home)
        .args(["communities", "detect"])
        .assert()
        .success();
    cairn_cmd(&home)
        .args(["config", "set", "communities.auto_invalidate", "false"])
        .assert()
        .success();

    add_entity(&home, "Traits");

    let stats = stats_json(&home);
    assert_eq!(stats["changes_since_detection"], 0);
    assert_eq!(stats["stale_count"], 0);
}

#[test]
fn test_detect_when_disabled_fails() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["config", "set", "communities.enabled", "false"])
        .assert()
        .success();

    cairn_cmd(&home)
        .args(["communities", "detect"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("disabled"));
}

#[test]
fn test_detect_with_unknown_algorithm_fails() {
    let home = TempDir::new().unwrap();
    triangle(&home);
    cairn_cmd(&home)
        .args(["config", "set", "communities.algorithm", "spectral"])
        .assert()
        .success();

    cairn_cmd(&home)
        .args(["communities", "detect"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown clustering algorithm 'spectral'"));
}

#[test]
fn test_search_requires_api_key() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["communities", "search", "ownership"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key set"));
}

#[test]
fn test_ask_declines_local_questions_without_force() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["communities", "ask", "What did I write about tokio?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--force"));

    cairn_cmd(&home)
        .args(["communities", "ask", "What are the main themes?"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No API key set"));
}

#[test]
fn test_hierarchy_before_detection() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .args(["communities", "hierarchy"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No communities yet."));
}

#[test]
fn test_doctor_command() {
    let home = TempDir::new().unwrap();
    cairn_cmd(&home)
        .arg("doctor")
        .assert()
        .success()
        .stdout(predicate::str::contains("[OK] Configuration: Valid"))
        .stdout(predicate::str::contains("[!!] API Key: Not configured"))
        .stdout(predicate::str::contains("[OK] Database:"))
        .stdout(predicate::str::contains("Some checks need attention."));

    assert!(home.path().join("cairn.db").exists());
}
