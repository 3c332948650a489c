pub mod rules;
pub mod recipients;
pub mod template;
pub mod email;
pub mod notifier;
pub mod outbox;

pub use rules::*;
pub use recipients::*;
pub use template::*;
pub use email::*;
pub use notifier::*;
pub use outbox::*;
