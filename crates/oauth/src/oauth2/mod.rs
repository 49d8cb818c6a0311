//! OAuth 2.0: authorization-code grant, refresh-token grant, and bearer
//! stamping with hold-back while a refresh is outstanding

pub mod filter;
pub mod flow;
pub mod state;
pub mod token;

pub use filter::{Continuation, OAuth2Filter};
pub use flow::{CredentialsObserver, OAuth2Flow, OAuth2Settings};
pub use state::OAuth2State;
