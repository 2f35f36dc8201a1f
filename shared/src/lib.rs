//! Shared observability setup for the Spaces gateway

pub mod observability;
