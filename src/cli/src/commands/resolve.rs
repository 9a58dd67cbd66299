//! `a3s-ocm resolve` command — Resolve a component version and its references.

use a3s_ocm_runtime::resolver::ReferenceNode;
use a3s_ocm_runtime::ResolvedComponent;
use clap::Args;
use serde_json::{json, Value};

use super::{print_json, ComponentArgs};
use crate::context::Context;
use crate::output;

#[derive(Args)]
pub struct ResolveArgs {
    #[command(flatten)]
    pub component: ComponentArgs,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn execute(args: ResolveArgs, ctx: &Context) -> Result<(), Box<dyn std::error::Error>> {
    let request = args.component.request(ctx)?;
    let resolver = ctx.resolver()?;
    let resolved = ctx
        .run(|cancel| async move { resolver.resolve_component_version(&request, &cancel).await })
        .await?;

    if args.json {
        return print_json(&to_json(&resolved));
    }

    println!(
        "{}:{} from {}{}",
        resolved.component.name(),
        resolved.component.version(),
        resolved.component.repository_url,
        if resolved.verified { " (verified)" } else { "" }
    );
    if resolved.tree.references.is_empty() {
        println!("No component references.");
        return Ok(());
    }

    let mut table = output::new_table(&["REFERENCE", "COMPONENT", "VERSION", "RECORD"]);
    add_rows(&mut table, &resolved.tree.references, 0);
    println!("{table}");
    Ok(())
}

fn add_rows(table: &mut comfy_table::Table, nodes: &[ReferenceNode], depth: usize) {
    for node in nodes {
        table.add_row([
            format!("{}{}", "  ".repeat(depth), node.name),
            node.component_name.clone(),
            node.version.clone(),
            node.record.clone(),
        ]);
        add_rows(table, &node.references, depth + 1);
    }
}

fn node_json(node: &ReferenceNode) -> Value {
    json!({
        "name": node.name,
        "componentName": node.component_name,
        "version": node.version,
        "extraIdentity": node.extra_identity,
        "record": node.record,
        "references": node.references.iter().map(node_json).collect::<Vec<_>>(),
    })
}

fn to_json(resolved: &ResolvedComponent) -> Value {
    json!({
        "component": resolved.component.name(),
        "version": resolved.component.version(),
        "repository": resolved.component.repository_url,
        "verified": resolved.verified,
        "root": resolved.tree.root,
        "depth": resolved.tree.depth(),
        "references": resolved.tree.references.iter().map(node_json).collect::<Vec<_>>(),
    })
}
