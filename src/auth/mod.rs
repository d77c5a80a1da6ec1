//! Protocol layer: state handling, SAML and OIDC validation, attribute
//! extraction. Nothing in here touches the database.

pub mod attributes;
mod error;
pub mod jwt;
pub mod oidc;
pub mod saml;
pub mod state;
pub mod xmldsig;

pub use attributes::{ClaimBag, SubjectInfo, normalize};
pub use error::{SsoError, SsoErrorBody, UNKNOWN_ERROR};
pub use state::{CookiePolicy, CookieSigner, OAuthState, RelayState};
