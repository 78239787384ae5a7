pub mod handler;
pub mod messages;
pub mod session;

pub use handler::ws_routes;
pub use messages::{ClientMessage, EventMessage};
pub use session::{ClientHandle, ConnectionsManager, RoomConnections};
