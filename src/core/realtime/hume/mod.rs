//! Hume AI Realtime Module - Empathic Voice Interface (EVI).
//!
//! One EVI chat per phone call. The caller's PCM16 audio is streamed up as
//! `audio_input` messages and EVI answers with transcripts, prosody scores,
//! synthesized speech and interruption notices.
//!
//! # EVI Versions
//!
//! - **EVI 3**: English only
//! - **EVI 4-mini**: Multilingual, lower latency
//!
//! # Audio Format
//!
//! - **Input**: Linear16 PCM, 16kHz mono by default
//! - **Output**: Base64-encoded WAV, unwrapped to PCM16 before delivery
//!
//! # Example
//!
//! ```rust,ignore
//! use mello_phone_agent::core::realtime::hume::{EVIVersion, HumeEVIConfig, HumeSessionFactory};
//! use mello_phone_agent::core::realtime::SpeechSessionFactory;
//!
//! let config = HumeEVIConfig::new("your-api-key")
//!     .with_config_id("your-config-id")
//!     .with_version(EVIVersion::V3);
//!
//! let factory = HumeSessionFactory::new(config);
//! let session = factory.create("wacid.ABC")?;
//! let mut events = session.connect().await?;
//! ```

mod client;
mod config;
pub mod messages;

pub use client::{HumeEVI, HumeSessionFactory};
pub use config::{EVIVersion, HumeEVIConfig};
pub use messages::{
    AudioEncoding, AudioInput, AudioOutput, AudioSettings, EVIClientMessage, EVIServerMessage,
    HUME_EVI_DEFAULT_CHANNELS, HUME_EVI_DEFAULT_SAMPLE_RATE, HUME_EVI_WEBSOCKET_URL,
    SessionSettings,
};
