//! CLI command definitions and dispatch.

mod cache;
mod cache_resource;
mod login;
mod logout;
mod mutate;
mod resolve;
mod resource;
mod version;

use std::collections::BTreeMap;
use std::path::PathBuf;

use a3s_ocm_core::{LogLevel, ResourceSelector};
use a3s_ocm_runtime::{ResolveRequest, SignatureKey, VersionSelector};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::context::{load_config, Context};

/// A3S OCM — resolve, cache and render OCM component versions.
#[derive(Parser)]
#[command(name = "a3s-ocm", version, about)]
pub struct Cli {
    /// Configuration file (default: ~/.a3s/ocm/config.yaml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level, overrides RUST_LOG and the configuration
    #[arg(long, global = true, value_parser = ["debug", "info", "warn", "error"])]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Resolve a component version and its reference tree
    Resolve(resolve::ResolveArgs),
    /// Show a resource of a component version
    Resource(resource::ResourceArgs),
    /// Store a resource in the snapshot cache
    CacheResource(cache_resource::CacheResourceArgs),
    /// Localize or configure a resource and cache the result
    Mutate(mutate::MutateArgs),
    /// Operate on the snapshot cache directly
    Cache(cache::CacheArgs),
    /// Log in to a registry
    Login(login::LoginArgs),
    /// Log out from a registry
    Logout(logout::LogoutArgs),
    /// Show version information
    Version(version::VersionArgs),
}

/// Log filter for the subscriber.
///
/// `--log-level` wins, then `RUST_LOG`, then the configured `log_level`.
pub fn log_filter(cli: &Cli) -> EnvFilter {
    if let Some(level) = &cli.log_level {
        return EnvFilter::new(level);
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = load_config(cli.config.as_deref())
            .map(|c| c.log_level)
            .unwrap_or(LogLevel::Warn);
        EnvFilter::new(tracing::Level::from(level).to_string().to_lowercase())
    })
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.config;
    match cli.command {
        Command::Resolve(args) => resolve::execute(args, &Context::load(config.as_deref())?).await,
        Command::Resource(args) => {
            resource::execute(args, &Context::load(config.as_deref())?).await
        }
        Command::CacheResource(args) => {
            cache_resource::execute(args, &Context::load(config.as_deref())?).await
        }
        Command::Mutate(args) => mutate::execute(args, &Context::load(config.as_deref())?).await,
        Command::Cache(args) => cache::execute(args, &Context::load(config.as_deref())?).await,
        Command::Login(args) => login::execute(args).await,
        Command::Logout(args) => logout::execute(args).await,
        Command::Version(args) => version::execute(args).await,
    }
}

/// Arguments selecting a component version.
#[derive(Args, Debug, Clone)]
pub struct ComponentArgs {
    /// Component name
    pub component: String,

    /// Repository holding the component: a registry location or a transport directory
    #[arg(short, long)]
    pub repository: String,

    /// Exact component version
    #[arg(long, conflicts_with = "constraint", required_unless_present = "constraint")]
    pub version: Option<String>,

    /// Semver constraint; the highest matching version is used
    #[arg(long)]
    pub constraint: Option<String>,

    /// Require a valid signature, given as NAME=PUBLIC_KEY_PEM_FILE
    #[arg(long = "verify", value_name = "NAME=FILE")]
    pub verify: Vec<String>,

    /// Transfer the component and its references here before resolving
    #[arg(long)]
    pub destination: Option<String>,
}

impl ComponentArgs {
    pub fn request(&self, ctx: &Context) -> Result<ResolveRequest, Box<dyn std::error::Error>> {
        let version = match (&self.version, &self.constraint) {
            (Some(version), _) => VersionSelector::Exact(version.clone()),
            (None, Some(constraint)) => VersionSelector::Constraint(constraint.clone()),
            (None, None) => return Err("Either --version or --constraint is required".into()),
        };

        let mut signatures = Vec::new();
        for entry in &self.verify {
            let (name, path) = entry
                .split_once('=')
                .ok_or_else(|| format!("Invalid --verify '{entry}', expected NAME=FILE"))?;
            let public_key = std::fs::read_to_string(path)
                .map_err(|e| format!("Failed to read public key {path}: {e}"))?;
            signatures.push(SignatureKey {
                name: name.to_string(),
                public_key,
            });
        }

        Ok(ResolveRequest {
            repository_url: self.repository.clone(),
            name: self.component.clone(),
            version,
            signatures,
            destination_url: self
                .destination
                .clone()
                .or_else(|| ctx.config.resolver.destination_url.clone()),
        })
    }
}

/// Arguments selecting one resource of a resolved component.
#[derive(Args, Debug, Clone)]
pub struct SelectorArgs {
    /// Resource name
    #[arg(long)]
    pub resource: String,

    /// Extra identity attribute of the resource, KEY=VALUE
    #[arg(long = "extra", value_name = "KEY=VALUE")]
    pub extra: Vec<String>,

    /// Dotted reference path to the component owning the resource
    #[arg(long, default_value = "")]
    pub reference_path: String,
}

impl SelectorArgs {
    pub fn selector(&self) -> Result<ResourceSelector, String> {
        Ok(ResourceSelector {
            name: self.resource.clone(),
            extra_identity: parse_pairs(&self.extra)?,
            reference_path: self.reference_path.clone(),
        })
    }
}

/// Parse `KEY=VALUE` arguments.
pub(crate) fn parse_pairs(pairs: &[String]) -> Result<BTreeMap<String, String>, String> {
    let mut out = BTreeMap::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => {
                out.insert(key.to_string(), value.to_string());
            }
            _ => return Err(format!("Invalid attribute '{pair}', expected KEY=VALUE")),
        }
    }
    Ok(out)
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
