pub mod converter;
pub mod mailbox;
pub mod orchestrator;
pub mod sampler;
pub mod store;
pub mod strategy;
pub mod verifier;
