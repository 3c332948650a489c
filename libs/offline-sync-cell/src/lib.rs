pub mod error;
pub mod local_store;
pub mod events;
pub mod validation;
pub mod retry;
pub mod connection;
pub mod sync_queue;
pub mod hybrid;

pub use error::*;
pub use local_store::*;
pub use events::*;
pub use validation::*;
pub use retry::*;
pub use connection::*;
pub use sync_queue::*;
pub use hybrid::*;
