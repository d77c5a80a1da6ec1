mod authn_requests;
mod enterprise_sessions;
mod identity_mappings;
mod login_attempts;
mod organizations;
mod profiles;
mod sso_providers;

pub use authn_requests::*;
pub use enterprise_sessions::*;
pub use identity_mappings::*;
pub use login_attempts::*;
pub use organizations::*;
pub use profiles::*;
pub use sso_providers::*;
