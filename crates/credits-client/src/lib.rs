//! Credits Client SDK.
//!
//! A client for services that debit, grant and hold credits through the
//! credits service.
//!
//! # Example
//!
//! ```no_run
//! use credits_client::{CreditsClient, EntryRequest};
//!
//! # async fn example() -> Result<(), credits_client::ClientError> {
//! let client = CreditsClient::new(
//!     "http://credits.billing-system.svc:8080",
//!     "your-service-api-key",
//! )?;
//!
//! let result = client
//!     .debit("user_1", &EntryRequest::new("render_42", 150, "usage.render"))
//!     .await?;
//!
//! println!("New balance: {} credits", result.balance);
//! # Ok(())
//! # }
//! ```
//!
//! Writes are idempotent on `entry_id`: retrying after a timeout or a
//! [`ClientError::TransactionConflict`] with the same id never applies the
//! entry twice.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod client;
mod error;
mod types;

pub use client::{ClientOptions, CreditsClient};
pub use error::ClientError;
pub use types::*;
