pub mod classifier;
pub mod credentials;
pub mod orchestrator;

pub use classifier::{ErrorClassifier, FailureClass, SubstringClassifier};
pub use credentials::{
    input_lines, stdin_lines, ApiKeySlot, CredentialPicker, InputLines, KeyRotation, TerminalKeyPicker,
};
pub use orchestrator::{CallState, RetryOrchestrator, RetryPolicy};
