//! Concrete stores and e-mail transports behind the fundraising seams.

pub mod logging;
pub mod memory;
pub mod postgrest;
pub mod resend;

pub use logging::LoggingSender;
pub use memory::InMemoryStore;
pub use postgrest::PostgrestStore;
pub use resend::ResendSender;
