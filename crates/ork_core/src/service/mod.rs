//! Use-case services layered over the resource engine.
//!
//! # Responsibility
//! - Compose engine calls with the audit hook for request handlers.
//! - Keep transport layers decoupled from storage scopes.

pub mod resource_service;
