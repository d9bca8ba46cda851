//! Web search providers.

mod google;

pub use google::{GoogleSearchClient, GoogleSearchConfig, GOOGLE_SEARCH_URL};
