pub mod helix;
pub mod oauth;

pub use helix::{EventSubPage, HelixClient, HelixError, HelixSubscription, RemoteSubscription};
pub use oauth::{OAuthError, TokenResponse, TwitchOAuthClient};
