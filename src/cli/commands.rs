//! CLI commands for the wallet client
//!
//! Implements all command handlers for the CLI interface.

use crate::api::{create_router, ApiState};
use crate::crypto::Address;
use crate::network::NodePhase;
use crate::service::WalletClient;
use crate::vault::AccountSource;
use zeroize::Zeroizing;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

fn parse_address(client: &WalletClient, address: &str) -> CliResult<Address> {
    Ok(Address::parse(address, client.network())?)
}

/// Create a new, empty wallet
pub fn cmd_wallet_create(client: &WalletClient, name: &str, password: &str) -> CliResult<()> {
    let summary = client.create_wallet(name, password)?;

    println!("✅ Wallet created!");
    println!("   📛 Name: {}", summary.name);
    println!("   🌐 Network: {}", summary.network);
    println!("   Add an account with: wallet add-account --name {}", name);

    Ok(())
}

/// List all wallets
pub fn cmd_wallet_list(client: &WalletClient) -> CliResult<()> {
    let wallets = client.list_wallets()?;

    if wallets.is_empty() {
        println!("📭 No wallets found. Create one with: wallet create");
        return Ok(());
    }

    println!("👛 Wallets ({}):", wallets.len());
    for wallet in wallets {
        println!("\n   {} ({})", wallet.name, wallet.network);
        for account in &wallet.accounts {
            let marker = if account.primary { "★" } else { " " };
            let label = account
                .label
                .clone()
                .or_else(|| client.label(&account.address))
                .unwrap_or_default();
            println!(
                "   {} {}  {}  {}",
                marker, account.address, account.balance, label
            );
        }
    }

    Ok(())
}

/// Generate or import an account
pub fn cmd_add_account(
    client: &WalletClient,
    name: &str,
    password: &str,
    private_key: Option<String>,
    label: Option<String>,
) -> CliResult<()> {
    let source = match private_key {
        Some(key) => AccountSource::Import(Zeroizing::new(key)),
        None => AccountSource::Generate,
    };
    let account = client.add_account(name, password, source, label)?;

    println!("✅ Account added to '{}'", name);
    println!("   📫 Address: {}", account.address);
    if let Some(public_key) = &account.public_key {
        println!("   🔑 Public key: {}", public_key);
    }
    if account.primary {
        println!("   ★ Primary account");
    }

    Ok(())
}

/// Make an account the wallet's primary account
pub fn cmd_set_primary(
    client: &WalletClient,
    name: &str,
    password: &str,
    address: &str,
) -> CliResult<()> {
    let address = parse_address(client, address)?;
    client.vault().set_primary(name, password, &address)?;
    println!("✅ {} is now the primary account of '{}'", address, name);
    Ok(())
}

pub fn cmd_rename(
    client: &WalletClient,
    name: &str,
    new_name: &str,
    password: &str,
) -> CliResult<()> {
    client.vault().rename_wallet(name, new_name, password)?;
    println!("✅ Wallet '{}' renamed to '{}'", name, new_name);
    Ok(())
}

pub fn cmd_change_password(
    client: &WalletClient,
    name: &str,
    old_password: &str,
    new_password: &str,
) -> CliResult<()> {
    client
        .vault()
        .change_password(name, old_password, new_password)?;
    println!("✅ Password of '{}' changed", name);
    Ok(())
}

/// Poll the node once and print its status
pub async fn cmd_status(client: &WalletClient) -> CliResult<()> {
    let snapshot = client.monitor().poll_once().await;

    println!("🌐 Node: {}", client.config().node_url);
    match snapshot.phase {
        NodePhase::Unavailable => println!("   ❌ Unavailable"),
        NodePhase::Booting => println!("   ⏳ Booting"),
        NodePhase::LoadingBlocks { height } => {
            println!("   📦 Loading blocks (height {})", height)
        }
        NodePhase::Synchronizing { height, lag } => {
            println!("   🔄 Synchronizing (height {}, {} behind)", height, lag)
        }
        NodePhase::Synchronized => println!("   ✅ Synchronized"),
    }
    if let Some(height) = snapshot.height {
        println!("   🧱 Height: {}", height);
    }
    if let Some(error) = &snapshot.last_error {
        println!("   ⚠️  Last error: {}", error);
    }
    println!(
        "   Ready for transactions: {}",
        if snapshot.ready_for_transactions() { "yes" } else { "no" }
    );

    Ok(())
}

/// Run the background tasks and the REST API until Ctrl+C
pub async fn cmd_serve(client: WalletClient, port: u16) -> CliResult<()> {
    let handles = client.start();
    let app = create_router(ApiState {
        client: client.clone(),
    });

    let addr = format!("127.0.0.1:{}", port);
    println!("🚀 Wallet API listening on http://{}", addr);
    println!("   Node: {}", client.config().node_url);
    println!();
    println!("📖 Available endpoints:");
    println!("   GET  /health                       - Health check");
    println!("   GET  /api/node/status              - Node status");
    println!("   GET  /api/wallets                  - List wallets");
    println!("   POST /api/wallets                  - Create wallet");
    println!("   POST /api/wallets/{{name}}/accounts - Add account");
    println!("   POST /api/transfers                - Send transfer");
    println!("   GET  /api/transactions             - Tracked transactions");
    println!("   POST /api/harvesting               - Delegated harvesting");
    println!("   POST /api/multisig/conversions     - Convert to multisig");
    println!("   POST /api/multisig/signatures      - Cosign");
    println!("   GET  /api/multisig/pending         - Pending multisig");
    println!();

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let shutdown_client = client.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
            println!("\n📴 Shutting down...");
            shutdown_client.shutdown();
        })
        .await?;

    for handle in handles {
        if let Err(e) = handle.await {
            log::warn!("Background task ended abnormally: {}", e);
        }
    }
    Ok(())
}
