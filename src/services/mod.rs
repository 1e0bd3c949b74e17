pub mod email;
pub mod ephemeral;
pub mod hashing;
pub mod jwt;
pub mod metrics;
pub mod oauth;
pub mod rate_limit;
pub mod security;
