//! Orchestration module for Chatloom
//!
//! This module contains the conversation engine and the gateway adapter
//! that connects it to a host messaging platform.

pub mod engine;
pub mod gateway;

pub use engine::{Orchestrator, UserIdentity, FALLBACK_ANSWER, MAX_ROUNDS, TOPIC_PLACEHOLDER};
pub use gateway::{Gateway, InboundNotification, OutboundSender};
