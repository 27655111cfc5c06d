//! Read-only SOQL queries against the CRM REST API, authenticated through the
//! credbroker token broker.

mod client;

pub use client::{QueryClient, QueryResponse, DEFAULT_API_VERSION};
