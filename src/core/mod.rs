pub mod audio;
pub mod bridge;
pub mod realtime;
pub mod registry;

pub use audio::{AudioFormat, PcmConverter, SESSION_SAMPLE_RATE, WavDecoder};
pub use bridge::{
    BridgeConfig, BridgeState, CallBridge, CallControl, CallOutcome, CancelReason, ConnectError,
    OutputBuffer, run_call,
};
pub use realtime::{
    EmotionScores, InboundEvent, RealtimeError, RealtimeResult, SpeechSession,
    SpeechSessionFactory,
};
pub use registry::{CallRegistry, CompletionCallback, CompletionFuture, RegistryError};
