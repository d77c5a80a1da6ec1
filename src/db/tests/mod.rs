//! Shared database repository test infrastructure
//!
//! Each repository has a test module containing shared test functions that
//! take the repository (or a small context of repositories) by trait object,
//! and a `sqlite_tests` module that runs them against an in-memory database
//! with the real migrations.

mod identity;
mod sso_providers;
