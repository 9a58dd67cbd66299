//! `a3s-ocm cache` command — Direct access to the snapshot cache.

use std::path::PathBuf;

use a3s_ocm_core::Identity;
use a3s_ocm_runtime::cache::FALLBACK_TAG;
use a3s_ocm_runtime::{write_snapshot, BlobReader};
use clap::{Args, Subcommand};
use tokio::io::AsyncWriteExt;

use super::{parse_pairs, print_json};
use crate::context::Context;
use crate::output;

#[derive(Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// Print the cache name and tag derived from an identity
    Name(NameArgs),
    /// Store a file as a snapshot
    Push(PushArgs),
    /// Read a cached blob
    Fetch(FetchArgs),
    /// Remove a cached tag
    Rm(RmArgs),
    /// Evict least recently used entries from a local cache
    Prune(PruneArgs),
}

#[derive(Args)]
pub struct NameArgs {
    /// Identity attributes, KEY=VALUE
    #[arg(required = true, value_name = "KEY=VALUE")]
    pub identity: Vec<String>,
}

#[derive(Args)]
pub struct PushArgs {
    /// File to store
    pub file: PathBuf,

    /// Identity attribute of the snapshot, KEY=VALUE
    #[arg(long = "identity", required = true, value_name = "KEY=VALUE")]
    pub identity: Vec<String>,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Cache name
    pub name: String,

    /// Tag to read
    #[arg(long, conflicts_with = "digest", required_unless_present = "digest")]
    pub tag: Option<String>,

    /// Digest to read
    #[arg(long)]
    pub digest: Option<String>,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct RmArgs {
    /// Cache name
    pub name: String,

    /// Tag to remove
    pub tag: String,
}

#[derive(Args)]
pub struct PruneArgs {
    /// Size the cache is reduced to (e.g. 500m, 10g)
    #[arg(long)]
    pub max_size: String,
}

pub async fn execute(args: CacheArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        CacheCommand::Name(args) => name(args),
        CacheCommand::Push(args) => push(args, ctx).await,
        CacheCommand::Fetch(args) => fetch(args, ctx).await,
        CacheCommand::Rm(args) => rm(args, ctx).await,
        CacheCommand::Prune(args) => prune(args, ctx),
    }
}

fn identity(pairs: &[String]) -> Result<Identity, String> {
    let mut identity = Identity::new();
    for (key, value) in parse_pairs(pairs)? {
        identity.insert(key, value);
    }
    Ok(identity)
}

fn name(args: NameArgs) -> Result<(), Box<dyn std::error::Error>> {
    let identity = identity(&args.identity)?;
    println!("{}:{}", identity.cache_name(), identity.snapshot_tag(FALLBACK_TAG));
    Ok(())
}

async fn push(args: PushArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let identity = identity(&args.identity)?;
    let file = tokio::fs::File::open(&args.file)
        .await
        .map_err(|e| format!("Failed to open {}: {e}", args.file.display()))?;
    let cache = ctx.cache()?;

    let snapshot = ctx
        .run(|_cancel| async move {
            let data: BlobReader = Box::new(file);
            write_snapshot(cache.as_ref(), &identity, data, FALLBACK_TAG).await
        })
        .await?;

    print_json(&snapshot)
}

async fn fetch(args: FetchArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let cache = ctx.cache()?;
    let FetchArgs {
        name,
        tag,
        digest,
        output,
    } = args;

    let mut reader = ctx
        .run(|_cancel| async move {
            match (digest, tag) {
                (Some(digest), _) => cache.fetch_by_digest(&name, &digest).await,
                (None, Some(tag)) => cache.fetch_by_tag(&name, &tag).await,
                (None, None) => cache.fetch_by_tag(&name, FALLBACK_TAG).await,
            }
        })
        .await?;

    let written = match &output {
        Some(path) => {
            let mut file = tokio::fs::File::create(path).await?;
            let written = tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            written
        }
        None => {
            let mut stdout = tokio::io::stdout();
            let written = tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
            written
        }
    };
    if let Some(path) = output {
        eprintln!("Wrote {} to {}", output::format_bytes(written), path.display());
    }
    Ok(())
}

async fn rm(args: RmArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let cache = ctx.cache()?;
    let RmArgs { name, tag } = args;
    ctx.run(|_cancel| {
        let (name, tag) = (name.clone(), tag.clone());
        async move { cache.delete(&name, &tag).await }
    })
    .await?;
    println!("Deleted {}:{}", name, tag);
    Ok(())
}

fn prune(args: PruneArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let max_bytes = output::parse_size_bytes(&args.max_size)?;
    let cache = ctx
        .dir_cache()?
        .ok_or("Pruning needs a local cache directory (cache.local_dir)")?;

    let removed = cache.prune(max_bytes)?;
    println!(
        "Removed {} entr{}, {} remaining",
        removed,
        if removed == 1 { "y" } else { "ies" },
        output::format_bytes(cache.total_size()?)
    );
    Ok(())
}
