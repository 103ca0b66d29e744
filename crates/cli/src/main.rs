use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing::info;

use deck_client::{DashApi, HttpApi};
use deck_core::ALL_NAMESPACES;
use deck_store::Workspace;

#[derive(Parser, Debug)]
#[command(name = "deckctl", version, about = "Deck dashboard CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Dashboard backend base URL
    #[arg(long = "server", global = true, env = "DECK_SERVER", default_value = "http://127.0.0.1:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show cluster connection status
    Status,
    /// List pods
    Pods {
        /// Restrict to one namespace (default: the saved workspace selection)
        #[arg(long = "ns")]
        namespace: Option<String>,
    },
    /// List services
    Services,
    /// List nodes
    Nodes,
    /// List namespaces
    Namespaces,
    /// List kubeconfig contexts
    Contexts,
    /// Switch the active kubeconfig context
    Switch {
        /// Context name as reported by `contexts`
        name: String,
    },
    /// Set the persisted namespace selection
    Ns {
        /// Namespace names; omit together with --all to clear the selection
        names: Vec<String>,
        /// Select all namespaces
        #[arg(long = "all", action = ArgAction::SetTrue)]
        all: bool,
    },
    /// Reset the workspace context to defaults
    Reset,
}

fn init_tracing() {
    let env = std::env::var("DECK_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let client = HttpApi::new(cli.server.clone());

    match cli.command {
        Commands::Status => {
            let status = client.status().await?;
            match cli.output {
                Output::Human => {
                    let state = if status.connected { "connected" } else { "disconnected" };
                    println!("{state} • {} • {}", status.context, status.server);
                    println!("namespace: {}", status.namespace);
                    println!("nodes: {}  pods: {}", status.node_count, status.pod_count);
                    println!("cpu: {:.1}%  memory: {:.1}%", status.cpu_usage, status.memory_usage);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            }
        }
        Commands::Pods { namespace } => {
            let ns = match namespace {
                Some(ns) => Some(ns),
                None => {
                    // Fall back to the selection saved on the server.
                    let ctx = client.workspace_context().await?;
                    match ctx.selected_namespaces.as_slice() {
                        [only] if only != ALL_NAMESPACES => Some(only.clone()),
                        _ => None,
                    }
                }
            };
            info!(ns = ?ns, "listing pods");
            let pods = client.pods(ns.as_deref()).await?;
            match cli.output {
                Output::Human => {
                    println!("{:<20} {:<32} {:<12} {:>8}", "NAMESPACE", "NAME", "STATUS", "RESTARTS");
                    for p in pods {
                        println!("{:<20} {:<32} {:<12} {:>8}", p.namespace, p.name, p.status, p.restarts);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&pods)?),
            }
        }
        Commands::Services => {
            let services = client.services().await?;
            match cli.output {
                Output::Human => {
                    println!("{:<20} {:<32} {:<14} {}", "NAMESPACE", "NAME", "TYPE", "CLUSTER-IP");
                    for s in services {
                        println!("{:<20} {:<32} {:<14} {}", s.namespace, s.name, s.service_type, s.cluster_ip);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&services)?),
            }
        }
        Commands::Nodes => {
            let nodes = client.nodes().await?;
            match cli.output {
                Output::Human => {
                    println!("{:<32} {:<12} {}", "NAME", "STATUS", "VERSION");
                    for n in nodes {
                        println!("{:<32} {:<12} {}", n.name, n.status, n.version);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&nodes)?),
            }
        }
        Commands::Namespaces => {
            let namespaces = client.namespaces().await?;
            match cli.output {
                Output::Human => {
                    for ns in namespaces {
                        println!("{ns}");
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&namespaces)?),
            }
        }
        Commands::Contexts => {
            let contexts = client.contexts().await?;
            match cli.output {
                Output::Human => {
                    for c in contexts {
                        let marker = if c.current { "*" } else { " " };
                        println!("{marker} {:<32} {}", c.name, c.cluster);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&contexts)?),
            }
        }
        Commands::Switch { name } => {
            let ws = Workspace::init(Arc::new(client)).await;
            match ws.switcher.switch_context(&name).await {
                Ok(()) => println!("{}", ws.switcher.message()),
                Err(e) => {
                    eprintln!("{}", ws.switcher.message());
                    ws.dispose();
                    return Err(e.into());
                }
            }
            ws.dispose();
        }
        Commands::Ns { names, all } => {
            let ws = Workspace::init(Arc::new(client)).await;
            let res = if all {
                ws.store.set_namespace(ALL_NAMESPACES).await
            } else {
                ws.store.set_selected_namespaces(&names, None).await
            };
            match res {
                Ok(()) => println!("{}", ws.store.label()),
                Err(e) => {
                    ws.dispose();
                    return Err(e.into());
                }
            }
            ws.dispose();
        }
        Commands::Reset => {
            let ws = Workspace::init(Arc::new(client)).await;
            let res = ws.store.reset().await;
            ws.dispose();
            res?;
            println!("workspace context reset");
        }
    }

    Ok(())
}
