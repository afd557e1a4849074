//! Participant placement into matches

pub mod service;

pub use service::SessionService;
