//! Remote speech session module.
//!
//! Abstractions over a full-duplex speech-to-speech service plus the Hume
//! EVI implementation used on phone calls.
//!
//! # Architecture
//!
//! - [`SpeechSession`] is one live conversation
//! - [`SpeechSessionFactory`] builds a fresh session per call
//! - Inbound traffic is a single ordered [`EventStream`] of [`InboundEvent`]s
//!   instead of per-kind callbacks, so the consumer decides ordering and
//!   back-pressure

mod base;
pub mod hume;

pub use base::{
    ConnectionState, EmotionScores, EventStream, InboundEvent, RealtimeError, RealtimeResult,
    SpeechSession, SpeechSessionFactory,
};
pub use hume::{EVIVersion, HumeEVI, HumeEVIConfig, HumeSessionFactory};
