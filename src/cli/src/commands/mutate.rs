//! `a3s-ocm mutate` command — Render a localized or configured snapshot.
//!
//! Without `--values` the ConfigData localization rules are applied; with
//! `--values` the configuration rules are evaluated against the defaults
//! merged with those values.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use a3s_ocm_core::{ResourceSelector, Snapshot};
use a3s_ocm_runtime::{DirPatchSource, MutationRequest, PatchSpec, ResourceRef, SourceSpec};
use clap::Args;
use serde_json::Value;

use super::{parse_pairs, print_json, ComponentArgs};
use crate::context::Context;

#[derive(Args)]
pub struct MutateArgs {
    #[command(flatten)]
    pub component: ComponentArgs,

    /// Resource holding the manifests to mutate
    #[arg(long, conflicts_with = "snapshot", required_unless_present = "snapshot")]
    pub source: Option<String>,

    /// Reference path of the component owning the source resource
    #[arg(long, default_value = "")]
    pub source_path: String,

    /// Snapshot JSON file (as printed by `cache-resource`) to mutate instead
    #[arg(long, value_name = "FILE")]
    pub snapshot: Option<PathBuf>,

    /// Resource holding the ConfigData document
    #[arg(long)]
    pub config_resource: String,

    /// Reference path of the component owning the ConfigData resource
    #[arg(long, default_value = "")]
    pub config_path: String,

    /// YAML file with configuration values; selects configuration mode
    #[arg(long, value_name = "FILE")]
    pub values: Option<PathBuf>,

    /// Directory strategic merge patches are read from
    #[arg(long, requires_all = ["patch", "patch_target"])]
    pub patch_dir: Option<PathBuf>,

    /// Patch document inside --patch-dir
    #[arg(long, requires = "patch_dir")]
    pub patch: Option<String>,

    /// File in the source tree the patch is merged onto
    #[arg(long, requires = "patch_dir")]
    pub patch_target: Option<String>,

    /// Extra attribute for the output identity, KEY=VALUE
    #[arg(long = "identity", value_name = "KEY=VALUE")]
    pub identity: Vec<String>,
}

fn read_values(path: &Path) -> Result<BTreeMap<String, Value>, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read values {}: {e}", path.display()))?;
    let values: Option<BTreeMap<String, Value>> = serde_yaml::from_str(&data)
        .map_err(|e| format!("Invalid values file {}: {e}", path.display()))?;
    Ok(values.unwrap_or_default())
}

fn read_snapshot(path: &Path) -> Result<Snapshot, Box<dyn std::error::Error>> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read snapshot {}: {e}", path.display()))?;
    Ok(serde_json::from_str(&data)
        .map_err(|e| format!("Invalid snapshot file {}: {e}", path.display()))?)
}

pub async fn execute(args: MutateArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let request = args.component.request(ctx)?;
    let values = args.values.as_deref().map(read_values).transpose()?;
    let snapshot = args.snapshot.as_deref().map(read_snapshot).transpose()?;
    let output_identity_hint = parse_pairs(&args.identity)?;
    let patch = match (args.patch_dir, args.patch, args.patch_target) {
        (Some(dir), Some(path), Some(target)) => Some(PatchSpec {
            source: Arc::new(DirPatchSource::new(dir)),
            path,
            target,
        }),
        _ => None,
    };
    let source_selector = args.source.map(|name| ResourceSelector {
        name,
        reference_path: args.source_path,
        ..Default::default()
    });
    let config_selector = ResourceSelector {
        name: args.config_resource,
        reference_path: args.config_path,
        ..Default::default()
    };

    let resolver = ctx.resolver()?;
    let engine = ctx.engine(resolver.clone(), ctx.cache()?);

    let outcome = ctx
        .run(|cancel| async move {
            let component = Arc::new(resolver.resolve_component_version(&request, &cancel).await?);
            let source = match (snapshot, source_selector) {
                (Some(snapshot), _) => SourceSpec::snapshot(snapshot),
                (None, Some(selector)) => {
                    SourceSpec::resource(ResourceRef::new(component.clone(), selector))
                }
                (None, None) => SourceSpec::default(),
            };
            let request = MutationRequest {
                source,
                config: ResourceRef::new(component, config_selector),
                values,
                patch,
                output_identity_hint,
            };
            engine.mutate(&request, &cancel).await
        })
        .await?;

    print_json(&serde_json::json!({
        "snapshot": outcome.snapshot,
        "substitutions": outcome.substitutions,
    }))
}
