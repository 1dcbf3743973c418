pub mod fix;
pub mod geo_event;
pub mod trip;

pub use fix::{AuthorizationStatus, Fix, RawFix};
pub use geo_event::GeoEvent;
pub use trip::TripEvent;
