//! Convo coordination server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod auth;
pub mod broker;
pub mod chat;
pub mod config;
pub mod db;
pub mod friend;
pub mod routes;
pub mod state;
pub mod user;
pub mod ws;
