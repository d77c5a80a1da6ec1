mod authn_requests;
mod common;
mod enterprise_sessions;
mod identity_mappings;
mod login_attempts;
mod organizations;
mod profiles;
mod sso_providers;

pub use authn_requests::SqliteAuthnRequestRepo;
pub use enterprise_sessions::SqliteEnterpriseSessionRepo;
pub use identity_mappings::SqliteIdentityMappingRepo;
pub use login_attempts::SqliteLoginAttemptRepo;
pub use organizations::SqliteOrganizationRepo;
pub use profiles::SqliteProfileRepo;
pub use sso_providers::SqliteSsoProviderRepo;
