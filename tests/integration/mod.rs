//! Integration tests for the context resolution engine

mod config_integration;
mod identity_model;
mod tiered_cache;
