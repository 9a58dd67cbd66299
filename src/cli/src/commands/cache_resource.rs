//! `a3s-ocm cache-resource` command — Store a resource in the snapshot cache.

use clap::Args;

use super::{print_json, ComponentArgs, SelectorArgs};
use crate::context::Context;

#[derive(Args)]
pub struct CacheResourceArgs {
    #[command(flatten)]
    pub component: ComponentArgs,

    #[command(flatten)]
    pub selector: SelectorArgs,
}

pub async fn execute(
    args: CacheResourceArgs,
    ctx: &Context,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = args.component.request(ctx)?;
    let selector = args.selector.selector()?;
    let resolver = ctx.resolver()?;
    let cache = ctx.cache()?;

    let snapshot = ctx
        .run(|cancel| async move {
            let component = resolver.resolve_component_version(&request, &cancel).await?;
            resolver
                .cache_resource(cache.as_ref(), &component, &selector)
                .await
        })
        .await?;

    print_json(&snapshot)
}
