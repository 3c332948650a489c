pub mod lifecycle;
pub mod mapper;
pub mod repository;
pub mod memory;

pub use lifecycle::*;
pub use mapper::*;
pub use repository::*;
pub use memory::*;
