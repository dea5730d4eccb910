//! Administrative CLI for in-process replication trees

use anyhow::Context;
use clap::{Parser, Subcommand};
use replkit::resource::RouteOperation;
use replkit::{ResourceTree, Session, TopologyConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "replctl")]
#[command(about = "replkit replication tree CLI")]
#[command(version)]
struct Cli {
    /// Topology file (TOML)
    #[arg(long, default_value = "./topology.toml")]
    topology: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the storage tree
    Tree,

    /// Resolve the hierarchy a request would use
    Route {
        /// Logical object path
        path: String,

        /// Operation to route (create, open, write, unlink)
        #[arg(long, default_value = "create")]
        operation: RouteOperation,

        /// Client host
        #[arg(long, default_value = "localhost")]
        host: String,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Heal replicas missing from a replication node's children
    Rebalance {
        /// Replication node (the root if omitted)
        #[arg(long)]
        node: Option<String>,

        /// Objects fetched per catalog page (configured value if omitted)
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = TopologyConfig::load(&cli.topology)
        .with_context(|| format!("loading topology from {}", cli.topology.display()))?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let tree = ResourceTree::build(&config)?;

    match cli.command {
        Commands::Tree => {
            print!("{}", tree.render());
        }
        Commands::Route {
            path,
            operation,
            host,
            json,
        } => {
            let session = Arc::new(Session::new(host.clone(), "replctl"));
            let vote = tree.route(session.clone(), &path, operation, &host).await?;
            let root = tree.root();
            let siblings = match tree.repl(root.name()) {
                Ok(repl) => repl.sibling_list(&session)?.unwrap_or_default(),
                Err(_) => Vec::new(),
            };

            if json {
                let out = serde_json::json!({
                    "object": path,
                    "operation": operation,
                    "hierarchy": vote.hierarchy,
                    "vote": vote.score,
                    "siblings": siblings,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("Route for {} ({}):", path, operation);
                println!("  Hierarchy: {}", vote.hierarchy);
                println!("  Vote: {}", vote.score);
                for sibling in siblings {
                    println!("  Sibling: {}", sibling);
                }
            }
        }
        Commands::Rebalance { node, limit } => {
            let name = match node {
                Some(name) => name,
                None => tree.root().name().to_string(),
            };
            let repl = tree
                .repl(&name)
                .with_context(|| format!("{} is not a replication node", name))?;
            let report = match limit {
                Some(limit) => repl.rebalance_with_limit(limit).await?,
                None => repl.rebalance().await?,
            };
            println!("Rebalance report for {}:", name);
            println!("  Pages: {}", report.pages);
            println!("  Objects checked: {}", report.objects_checked);
            println!("  Replicas created: {}", report.replicas_created);
        }
    }

    Ok(())
}
