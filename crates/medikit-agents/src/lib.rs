//! # Medikit Agents
//!
//! Specialist agents (doctor, health manager, customer service,
//! operations) and the orchestrator that routes a user turn through intent
//! classification, a specialist, the risk gate, and finalization.

pub mod base;
pub mod customer_service;
pub mod diagnosis;
pub mod doctor;
pub mod health_manager;
pub mod operations;
pub mod orchestrator;

pub use base::{Agent, AgentInput};
pub use customer_service::CustomerServiceAgent;
pub use diagnosis::DiagnosisTool;
pub use doctor::DoctorAgent;
pub use health_manager::HealthManagerAgent;
pub use operations::OperationsAgent;
pub use orchestrator::{IntentClassifier, Orchestrator};
