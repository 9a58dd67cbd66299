//! Integration test: drive the `a3s-ocm` binary against a transport
//! directory and a local snapshot cache.
//!
//! No registry is contacted: components live in a transport directory and
//! `cache.local_dir` selects the filesystem cache.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Output};

use a3s_ocm_core::descriptor::ComponentReference;
use a3s_ocm_core::{AccessSpec, ComponentDescriptor, Resource};
use a3s_ocm_runtime::mutate::archive;
use a3s_ocm_runtime::resolver::LocalBlob;
use a3s_ocm_runtime::{ComponentRepository, DirComponentRepository};
use serde_json::Value;
use tempfile::TempDir;

const COMPONENT: &str = "acme.org/app";
const VERSION: &str = "1.0.0";

const CONFIGMAP: &str = "kind: ConfigMap\ndata:\n  MSG: placeholder\nspec:\n  image: placeholder\n";

const LOCALIZATION: &str = r#"
kind: ConfigData
localization:
  - resource:
      name: web-server
    file: configmap.yaml
    image: spec.image
"#;

const CONFIGURATION: &str = r#"
kind: ConfigData
configuration:
  defaults:
    message: hello
  rules:
    - value: (( message ))
      file: configmap.yaml
      path: data.MSG
"#;

struct Env {
    root: TempDir,
    repo: String,
    config: String,
}

impl Env {
    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_a3s-ocm"))
            .arg("--config")
            .arg(&self.config)
            .args(args)
            .env("HOME", self.root.path())
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to run a3s-ocm")
    }

    fn json(&self, args: &[&str]) -> Value {
        let output = self.run(args);
        assert!(
            output.status.success(),
            "a3s-ocm {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
    }

    fn write(&self, name: &str, content: &str) -> String {
        let path = self.root.path().join(name);
        std::fs::write(&path, content).unwrap();
        path.display().to_string()
    }
}

fn local_blob(name: &str, digest: &str) -> Resource {
    Resource {
        name: name.to_string(),
        version: VERSION.to_string(),
        resource_type: "blob".to_string(),
        extra_identity: BTreeMap::new(),
        relation: Some("local".to_string()),
        access: AccessSpec::local_blob(digest, "application/octet-stream"),
        labels: Vec::new(),
        digest: None,
    }
}

async fn seed(root: &Path) {
    let manifests = TempDir::new().unwrap();
    std::fs::write(manifests.path().join("configmap.yaml"), CONFIGMAP).unwrap();

    let mut app = ComponentDescriptor::new(COMPONENT, VERSION);
    app.component.component_references.push(ComponentReference {
        name: "backend".to_string(),
        component_name: "acme.org/b".to_string(),
        version: VERSION.to_string(),
        extra_identity: BTreeMap::new(),
        labels: Vec::new(),
        digest: None,
    });
    let mut blobs = Vec::new();
    for (name, digest, data) in [
        ("manifests", "sha256:0a", archive::pack(manifests.path()).unwrap()),
        ("localization", "sha256:0b", LOCALIZATION.as_bytes().to_vec()),
        ("configuration", "sha256:0c", CONFIGURATION.as_bytes().to_vec()),
    ] {
        app.component.resources.push(local_blob(name, digest));
        blobs.push(LocalBlob {
            local_reference: digest.to_string(),
            media_type: "application/octet-stream".to_string(),
            data,
        });
    }
    app.component.resources.push(Resource {
        name: "web-server".to_string(),
        version: "1.23.3".to_string(),
        resource_type: "ociImage".to_string(),
        extra_identity: BTreeMap::new(),
        relation: Some("external".to_string()),
        access: AccessSpec::oci_artifact("nginx:1.23-3-alpine"),
        labels: Vec::new(),
        digest: None,
    });

    let repo = DirComponentRepository::new(root.to_path_buf());
    repo.put(&app, blobs).await.unwrap();
    repo.put(&ComponentDescriptor::new("acme.org/b", VERSION), Vec::new())
        .await
        .unwrap();
}

async fn env() -> Env {
    let root = TempDir::new().unwrap();
    let repo = root.path().join("repo");
    let cache = root.path().join("cache");
    let work = root.path().join("work");
    std::fs::create_dir_all(&work).unwrap();
    seed(&repo).await;

    let config = root.path().join("config.yaml");
    std::fs::write(
        &config,
        format!(
            "cache:\n  local_dir: {}\nwork_dir: {}\noperation_timeout_secs: 60\n",
            cache.display(),
            work.display()
        ),
    )
    .unwrap();

    Env {
        repo: repo.display().to_string(),
        config: config.display().to_string(),
        root,
    }
}

#[tokio::test]
async fn test_version() {
    let env = env().await;
    let output = env.run(&["version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("a3s-ocm version "));
}

#[tokio::test]
async fn test_resolve_json() {
    let env = env().await;
    let resolved = env.json(&["resolve", COMPONENT, "-r", &env.repo, "--version", VERSION, "--json"]);

    assert_eq!(resolved["component"], COMPONENT);
    assert_eq!(resolved["verified"], false);
    assert_eq!(resolved["depth"], 1);
    assert_eq!(resolved["references"][0]["componentName"], "acme.org/b");
}

#[tokio::test]
async fn test_resolve_by_constraint_table() {
    let env = env().await;
    let output = env.run(&["resolve", COMPONENT, "-r", &env.repo, "--constraint", "^1"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("acme.org/app:1.0.0"));
    assert!(stdout.contains("backend"));
}

#[tokio::test]
async fn test_resource_shows_pull_reference() {
    let env = env().await;
    let resource = env.json(&[
        "resource",
        COMPONENT,
        "-r",
        &env.repo,
        "--version",
        VERSION,
        "--resource",
        "web-server",
    ]);
    assert_eq!(resource["pullReference"], "nginx:1.23-3-alpine");
    assert_eq!(resource["identity"]["resource-version"], "1.23.3");
}

#[tokio::test]
async fn test_cache_resource_then_localize_snapshot() {
    let env = env().await;
    let snapshot = env.json(&[
        "cache-resource",
        COMPONENT,
        "-r",
        &env.repo,
        "--version",
        VERSION,
        "--resource",
        "manifests",
    ]);
    assert!(snapshot["digest"].as_str().unwrap().starts_with("sha256:"));
    let snapshot_file = env.write("snapshot.json", &snapshot.to_string());

    let outcome = env.json(&[
        "mutate",
        COMPONENT,
        "-r",
        &env.repo,
        "--version",
        VERSION,
        "--snapshot",
        &snapshot_file,
        "--config-resource",
        "localization",
    ]);
    assert_eq!(outcome["substitutions"][0]["path"], "spec.image");
    assert_eq!(outcome["substitutions"][0]["value"], "nginx:1.23-3-alpine");
    assert_eq!(outcome["snapshot"]["identity"]["mutation"], "localization");
    assert_ne!(outcome["snapshot"]["digest"], snapshot["digest"]);
}

#[tokio::test]
async fn test_configure_with_values() {
    let env = env().await;
    let values = env.write("values.yaml", "message: hi there\n");
    let outcome = env.json(&[
        "mutate",
        COMPONENT,
        "-r",
        &env.repo,
        "--version",
        VERSION,
        "--source",
        "manifests",
        "--config-resource",
        "configuration",
        "--values",
        &values,
        "--identity",
        "env=prod",
    ]);
    assert_eq!(outcome["substitutions"][0]["value"], "hi there");
    assert_eq!(outcome["snapshot"]["identity"]["mutation"], "configuration");
    assert_eq!(outcome["snapshot"]["identity"]["env"], "prod");
}

#[tokio::test]
async fn test_cache_push_fetch_rm() {
    let env = env().await;
    let input = env.write("payload.txt", "cached bytes");
    let snapshot = env.json(&["cache", "push", &input, "--identity", "name=payload"]);
    assert_eq!(snapshot["tag"], "latest");

    let name = String::from_utf8(env.run(&["cache", "name", "name=payload"]).stdout).unwrap();
    let (name, tag) = name.trim().split_once(':').unwrap();
    assert_eq!(tag, "latest");

    let fetched = env.run(&["cache", "fetch", name, "--tag", "latest"]);
    assert!(fetched.status.success());
    assert_eq!(fetched.stdout, b"cached bytes");

    assert!(env.run(&["cache", "rm", name, "latest"]).status.success());
    assert!(!env.run(&["cache", "fetch", name, "--tag", "latest"]).status.success());
}

#[tokio::test]
async fn test_errors_exit_nonzero() {
    let env = env().await;
    let output = env.run(&["resolve", "acme.org/none", "-r", &env.repo, "--version", VERSION]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error: "));
}
