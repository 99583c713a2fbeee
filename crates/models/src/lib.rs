mod events;
mod follow;

pub use events::*;
pub use follow::*;
