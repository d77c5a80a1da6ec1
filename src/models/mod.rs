mod identity;
mod login_attempt;
mod organization;
mod session;
mod sso_provider;
mod validators;

pub use identity::*;
pub use login_attempt::*;
pub use organization::*;
pub use session::*;
pub use sso_provider::*;
pub use validators::{validate_domains, validate_slug};
