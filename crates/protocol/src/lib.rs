pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::{HubFault, Message};
pub use types::{PayloadError, RegistrationPayload};
