//! End-to-end tests for the keystone binary.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const SECRET: &str = "https://example.com/attr/classification/value/secret";
const PUBLIC: &str = "https://example.com/attr/classification/value/public";
const WATERMARK: &str = "https://example.com/obl/drm/value/watermark";

const POLICY: &str = r#"{
    "attributes": [{
        "fqn": "https://example.com/attr/classification",
        "rule": "HIERARCHY",
        "values": [
            { "value": "secret", "fqn": "https://example.com/attr/classification/value/secret" },
            { "value": "public", "fqn": "https://example.com/attr/classification/value/public" }
        ]
    }],
    "subjectMappings": [{
        "attributeValue": { "fqn": "https://example.com/attr/classification/value/secret" },
        "subjectConditionSet": { "subjectSets": [{ "conditionGroups": [{
            "booleanOperator": "AND",
            "conditions": [{ "subjectExternalSelectorValue": ".clearance", "operator": "IN", "subjectExternalValues": ["secret"] }]
        }]}]},
        "actions": [{ "name": "read" }]
    }],
    "obligations": [{
        "name": "drm",
        "values": [{
            "fqn": "https://example.com/obl/drm/value/watermark",
            "triggers": [{
                "action": { "name": "read" },
                "target": { "attributeValue": "https://example.com/attr/classification/value/secret" }
            }]
        }]
    }]
}"#;

struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("policy.json"), POLICY).unwrap();
        fs::write(dir.path().join("alice.json"), r#"{ "clearance": "secret" }"#).unwrap();
        fs::write(dir.path().join("bob.json"), r#"{ "clearance": "public" }"#).unwrap();
        Self { dir }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn keystone(&self) -> Command {
        let mut cmd = Command::cargo_bin("keystone").unwrap();
        cmd.current_dir(self.dir.path())
            .env_remove("RUST_LOG")
            .arg("--no-color");
        cmd
    }
}

// ============================================================================
// Basics
// ============================================================================

#[test]
fn version_command_succeeds() {
    Workspace::new()
        .keystone()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("keystone-cli"));
}

#[test]
fn decide_requires_an_entity_or_token() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["decide", "--action", "read", "--resource", SECRET])
        .assert()
        .failure()
        .stderr(predicate::str::contains("required"));
}

#[test]
fn missing_policy_is_reported() {
    let ws = Workspace::new();
    ws.keystone()
        .arg("validate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--policy"));
}

// ============================================================================
// Validate
// ============================================================================

#[test]
fn validate_accepts_a_policy() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["validate", "--policy"])
        .arg(ws.path("policy.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("valid policy"));
}

#[test]
fn validate_uses_configured_fixture() {
    let ws = Workspace::new();
    fs::write(ws.path("keystone.toml"), "[policy]\nfixture = \"policy.json\"\n").unwrap();
    ws.keystone()
        .args(["validate", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"));
}

#[test]
fn validate_rejects_a_broken_policy() {
    let ws = Workspace::new();
    fs::write(
        ws.path("broken.json"),
        r#"{ "attributes": [{ "fqn": "https://example.com/attr/x", "values": [] }] }"#,
    )
    .unwrap();
    ws.keystone()
        .args(["validate", "--policy"])
        .arg(ws.path("broken.json"))
        .assert()
        .failure();
}

// ============================================================================
// Decisions
// ============================================================================

#[test]
fn decide_permits_with_fulfilled_obligation() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["decide", "--json", "--action", "read", "--resource", SECRET, "--fulfill", WATERMARK])
        .arg("--policy")
        .arg(ws.path("policy.json"))
        .arg("--entity")
        .arg(ws.path("alice.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"access\": true"))
        .stdout(predicate::str::contains(WATERMARK));
}

#[test]
fn decide_denies_without_fulfilment() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["decide", "--action", "read", "--resource", SECRET])
        .arg("--policy")
        .arg(ws.path("policy.json"))
        .arg("--entity")
        .arg(ws.path("alice.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("DENY"));
}

#[test]
fn decide_succeeds_with_cache_enabled() {
    let ws = Workspace::new();
    fs::write(
        ws.path("keystone.toml"),
        "[policy]\nfixture = \"policy.json\"\n\n[cache]\nenabled = true\nrefresh_interval_secs = 1\n",
    )
    .unwrap();
    ws.keystone()
        .args(["decide", "--json", "--action", "read", "--resource", SECRET, "--fulfill", WATERMARK])
        .arg("--entity")
        .arg(ws.path("alice.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"access\": true"));
}

#[test]
fn decide_denies_lower_clearance() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["decide", "--json", "--action", "read", "--resource", SECRET, "--fulfill", WATERMARK])
        .arg("--policy")
        .arg(ws.path("policy.json"))
        .arg("--entity")
        .arg(ws.path("bob.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"access\": false"));
}

#[test]
fn decide_rejects_blank_action() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["decide", "--action", " ", "--resource", PUBLIC])
        .arg("--policy")
        .arg(ws.path("policy.json"))
        .arg("--entity")
        .arg(ws.path("alice.json"))
        .assert()
        .failure();
}

// ============================================================================
// Entitlements and obligations
// ============================================================================

#[test]
fn comprehensive_entitlements_include_lower_values() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["entitlements", "--json", "--comprehensive"])
        .arg("--policy")
        .arg(ws.path("policy.json"))
        .arg("--entity")
        .arg(ws.path("alice.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains(SECRET))
        .stdout(predicate::str::contains(PUBLIC));
}

#[test]
fn obligations_lists_triggered_values() {
    let ws = Workspace::new();
    ws.keystone()
        .args(["obligations", "--json", "--action", "read", "--resource", SECRET])
        .arg("--policy")
        .arg(ws.path("policy.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("\"allFulfilled\": false"))
        .stdout(predicate::str::contains(WATERMARK));
}
