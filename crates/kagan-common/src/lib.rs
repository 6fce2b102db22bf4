pub mod entities;
pub mod errors;
pub mod events;
pub mod ids;
pub mod runtime_dir;

pub use entities::*;
pub use errors::CommonError;
pub use events::DomainEvent;
pub use ids::new_id;
pub use runtime_dir::runtime_dir;
