pub mod cache;
pub mod email;

pub use cache::{CachedEntity, EntityCache, EntityKey, TtlCache};
pub use email::{EmailError, EmailSender, EmailService, LoggingMailer};
