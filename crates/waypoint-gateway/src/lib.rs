pub mod connection;
pub mod dispatcher;
pub mod engine;

pub use dispatcher::{Dispatcher, Room};
pub use connection::{Handshake, handle_connection};
pub use engine::{DeliveryEngine, EngineSettings, Session};
