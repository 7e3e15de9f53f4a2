pub mod signature;

// Re-export middleware functions
pub use signature::{SIGNATURE_HEADER, sign_payload, signature_middleware, verify_signature};
