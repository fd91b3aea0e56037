// Hard risk ceilings
pub mod constants;

// Core wire types and enums
pub mod types;

// Trade proposals
pub mod signal;

// Open/closed exposure
pub mod position;

// Versioned settings singleton + audit
pub mod settings;

// Account risk state, budgets, decisions
pub mod risk;

// Order lifecycle state machine
pub mod order;

// Immutable trade journal + performance types
pub mod journal;

// Simulation account model
pub mod simulation;

// Control-plane accounts
pub mod user;

// In-process event fan-out payloads
pub mod events;

// Port interfaces
pub mod ports;

// Repository traits
pub mod repositories;

// Domain-specific error types
pub mod errors;
