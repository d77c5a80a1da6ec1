mod admin;
mod client_ip;

pub use admin::admin_auth_middleware;
pub use client_ip::{ClientContext, extract_client_ip_from_parts, request_context};
