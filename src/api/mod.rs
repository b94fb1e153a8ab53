//! REST API module
//!
//! Local HTTP surface over the wallet client.
//!
//! # Endpoints
//!
//! ## Node
//! - `GET /api/node/status` - Latest node status snapshot
//!
//! ## Wallets
//! - `GET /api/wallets` - List wallets
//! - `POST /api/wallets` - Create wallet
//! - `POST /api/wallets/{name}/accounts` - Generate or import an account
//!
//! ## Transactions
//! - `POST /api/transfers` - Send a transfer
//! - `GET /api/transactions` - Tracked submissions
//! - `POST /api/harvesting` - Activate or deactivate delegated harvesting
//!
//! ## Multisig
//! - `POST /api/multisig/conversions` - Convert an account to multisig
//! - `POST /api/multisig/signatures` - Cosign a pending transaction
//! - `GET /api/multisig/pending` - Pending multisig transactions
//!
//! Failures are returned as `{ code, class, detail }`; transient faults use
//! status 503.

pub mod handlers;
pub mod routes;

pub use handlers::{ApiError, ApiState};
pub use routes::create_router;
