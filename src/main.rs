//! Wallet Client CLI Application
//!
//! A command-line interface for managing wallets and running the local
//! wallet service.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wallet_core::cli;
use wallet_core::config::{ClientConfig, DEFAULT_CONFIG_FILE};
use wallet_core::service::WalletClient;

#[derive(Parser)]
#[command(name = "wallet-client")]
#[command(author = "wallet-core contributors")]
#[command(version = "0.1.0")]
#[command(about = "Wallet custody and transaction client", long_about = None)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory holding the wallet files
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Node API base URL
    #[arg(long)]
    node_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST API and background node tracking
    Serve {
        /// Port to listen on for the REST API
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Wallet operations
    Wallet {
        #[command(subcommand)]
        action: WalletCommands,
    },

    /// Show node status
    Status,
}

#[derive(Subcommand)]
enum WalletCommands {
    /// Create a new wallet
    Create {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        password: String,
    },

    /// List all wallets
    List,

    /// Generate or import an account
    AddAccount {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        password: String,

        /// Hex private key to import instead of generating one
        #[arg(long)]
        private_key: Option<String>,

        /// Optional label for the account
        #[arg(short, long)]
        label: Option<String>,
    },

    /// Make an account the primary account
    SetPrimary {
        #[arg(short, long)]
        name: String,

        #[arg(short, long)]
        password: String,

        #[arg(short, long)]
        address: String,
    },

    /// Rename a wallet
    Rename {
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        new_name: String,

        #[arg(short, long)]
        password: String,
    },

    /// Change a wallet's password
    ChangePassword {
        #[arg(short, long)]
        name: String,

        #[arg(long)]
        old_password: String,

        #[arg(long)]
        new_password: String,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let mut config = ClientConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(node_url) = cli.node_url {
        config.node_url = node_url;
    }
    if let Commands::Serve { port: Some(port) } = cli.command {
        config.api_port = port;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = WalletClient::new(config)?;

        match cli.command {
            Commands::Serve { .. } => {
                let port = client.config().api_port;
                cli::cmd_serve(client, port).await?;
            }

            Commands::Status => {
                cli::cmd_status(&client).await?;
            }

            Commands::Wallet { action } => match action {
                WalletCommands::Create { name, password } => {
                    cli::cmd_wallet_create(&client, &name, &password)?;
                }
                WalletCommands::List => {
                    cli::cmd_wallet_list(&client)?;
                }
                WalletCommands::AddAccount {
                    name,
                    password,
                    private_key,
                    label,
                } => {
                    cli::cmd_add_account(&client, &name, &password, private_key, label)?;
                }
                WalletCommands::SetPrimary {
                    name,
                    password,
                    address,
                } => {
                    cli::cmd_set_primary(&client, &name, &password, &address)?;
                }
                WalletCommands::Rename {
                    name,
                    new_name,
                    password,
                } => {
                    cli::cmd_rename(&client, &name, &new_name, &password)?;
                }
                WalletCommands::ChangePassword {
                    name,
                    old_password,
                    new_password,
                } => {
                    cli::cmd_change_password(&client, &name, &old_password, &new_password)?;
                }
            },
        }

        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    Ok(())
}
