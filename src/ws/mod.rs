pub mod admission;
pub mod connctx;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod room;
pub mod room_name;

pub use registry::RoomRegistry;
pub use relay::create_relay_routes;
