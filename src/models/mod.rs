pub mod email;
pub mod job;
pub mod metrics;
pub mod verification;
