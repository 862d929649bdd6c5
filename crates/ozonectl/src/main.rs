use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use common::config::OzoneConfig;
use common::{NodeState, ReplicationFactor, ReplicationType};
use protocol::client::ScmClient;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .compact()
        .init();
}

#[derive(Parser)]
#[command(name = "ozonectl")]
#[command(about = "Ozone cluster administration utility", long_about = None)]
struct Cli {
    /// SCM client address; defaults to the configured/environment address.
    #[arg(long)]
    scm: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReplicationArg {
    Standalone,
    Ratis,
}

impl From<ReplicationArg> for ReplicationType {
    fn from(value: ReplicationArg) -> Self {
        match value {
            ReplicationArg::Standalone => ReplicationType::Standalone,
            ReplicationArg::Ratis => ReplicationType::Ratis,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FactorArg {
    One,
    Three,
}

impl From<FactorArg> for ReplicationFactor {
    fn from(value: FactorArg) -> Self {
        match value {
            FactorArg::One => ReplicationFactor::One,
            FactorArg::Three => ReplicationFactor::Three,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StateArg {
    Healthy,
    Stale,
    Dead,
    Decommissioning,
    Decommissioned,
}

impl From<StateArg> for NodeState {
    fn from(value: StateArg) -> Self {
        match value {
            StateArg::Healthy => NodeState::Healthy,
            StateArg::Stale => NodeState::Stale,
            StateArg::Dead => NodeState::Dead,
            StateArg::Decommissioning => NodeState::Decommissioning,
            StateArg::Decommissioned => NodeState::Decommissioned,
        }
    }
}

#[derive(Subcommand)]
enum ContainerCommands {
    /// Allocate a container on the cluster
    Create {
        name: String,
        #[arg(long, value_enum, default_value = "standalone")]
        replication: ReplicationArg,
        #[arg(long, value_enum, default_value = "one")]
        factor: FactorArg,
    },
    /// Delete a container
    Delete { name: String },
    /// Show a container's pipeline
    Info { name: String },
}

#[derive(Subcommand)]
enum NodeCommands {
    /// List datanodes known to SCM
    List {
        #[arg(long, value_enum)]
        state: Option<StateArg>,
    },
}

#[derive(Subcommand)]
enum Commands {
    /// Container administration
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },
    /// Datanode reports
    Node {
        #[command(subcommand)]
        command: NodeCommands,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let config = OzoneConfig::from_env();
    let addr = cli.scm.unwrap_or_else(|| config.scm_address.clone());
    let mut client = ScmClient::connect(&addr, config.rpc_timeout()).await?;

    match cli.command {
        Commands::Container { command } => match command {
            ContainerCommands::Create {
                name,
                replication,
                factor,
            } => {
                let pipeline = client
                    .allocate_container(&name, replication.into(), factor.into())
                    .await?;
                println!("{}", serde_json::to_string_pretty(&pipeline)?);
            }
            ContainerCommands::Delete { name } => {
                client.delete_container(&name).await?;
                println!("deleted {}", name);
            }
            ContainerCommands::Info { name } => {
                let pipeline = client.get_container(&name).await?;
                println!("{}", serde_json::to_string_pretty(&pipeline)?);
            }
        },
        Commands::Node { command } => match command {
            NodeCommands::List { state } => {
                let nodes = client.get_node_report(state.map(Into::into)).await?;
                for node in nodes {
                    println!(
                        "{}\t{}\t{:?}\t{}/{} bytes used",
                        node.details.id,
                        node.details.container_addr(),
                        node.state,
                        node.stat.used,
                        node.stat.capacity
                    );
                }
            }
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }
}
