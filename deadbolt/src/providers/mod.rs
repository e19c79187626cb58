//! Bundled identity providers.

pub mod azure;
pub mod discord;

pub use azure::{AzureProvider, DataLoader};
pub use discord::DiscordProvider;
