pub mod dialogue;
pub mod events;
pub mod metrics;
pub mod models;
pub mod query;
pub mod server;
pub mod topology;

pub use dialogue::*;
pub use events::*;
pub use metrics::*;
pub use models::*;
pub use query::*;
pub use server::*;
pub use topology::*;
