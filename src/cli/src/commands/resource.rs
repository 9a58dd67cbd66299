//! `a3s-ocm resource` command — Show, and optionally download, one resource.

use std::path::PathBuf;

use clap::Args;
use serde_json::json;

use super::{print_json, ComponentArgs, SelectorArgs};
use crate::context::Context;

#[derive(Args)]
pub struct ResourceArgs {
    #[command(flatten)]
    pub component: ComponentArgs,

    #[command(flatten)]
    pub selector: SelectorArgs,

    /// Write the resource content to this file
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub async fn execute(args: ResourceArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let request = args.component.request(ctx)?;
    let selector = args.selector.selector()?;
    let resolver = ctx.resolver()?;
    let download = args.output.is_some();

    let (resolved, data) = ctx
        .run(|cancel| async move {
            let component = resolver.resolve_component_version(&request, &cancel).await?;
            let resource = resolver.get_resource(&component, &selector)?;
            let data = if download {
                Some(resolver.fetch_resource_data(&component, &resource).await?)
            } else {
                None
            };
            Ok((resource, data))
        })
        .await?;

    if let (Some(path), Some(data)) = (&args.output, &data) {
        tokio::fs::write(path, data).await?;
        eprintln!("Wrote {} bytes to {}", data.len(), path.display());
    }

    print_json(&json!({
        "component": resolved.owner.name(),
        "version": resolved.owner.version(),
        "identity": resolved.identity(),
        "pullReference": resolved.pull_reference,
        "resource": resolved.resource,
    }))
}
