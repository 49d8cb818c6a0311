//! OAuth 1.0a: three-legged handshake and HMAC-SHA1 request signing

pub mod filter;
pub mod flow;
pub mod state;

pub use filter::{OAuth1Credentials, OAuth1Filter};
pub use flow::{OAuth1Flow, OAuth1Settings};
pub use state::OAuth1State;
