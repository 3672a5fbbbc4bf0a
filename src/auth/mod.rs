//! Authentication: offline JWT validation and RFC 8693 token exchange

mod exchange;
mod verifier;

pub use exchange::TokenExchanger;
pub use verifier::{AuthenticatedPrincipal, TokenVerifier};
