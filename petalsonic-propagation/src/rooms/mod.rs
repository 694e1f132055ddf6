//! Rooms, portals and the graph connecting them.

mod graph;
mod portal;
mod room;

pub use graph::{PortalRoute, RoomGraph};
pub use portal::Portal;
pub use room::{ReverbZoneLink, Room};

#[cfg(test)]
pub(crate) use portal::tests::door;
