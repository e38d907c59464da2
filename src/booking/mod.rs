//! Bookings: the wire model, the lifecycle table and the per-screen
//! orchestrator that drives transitions.

pub mod model;
pub mod orchestrator;
pub mod transition;

pub use model::{Booking, BookingStatus, Coordinates, CreateBookingRequest, Location, NewBooking, ServiceRef};
pub use orchestrator::{BookingOrchestrator, BookingPartition, BookingRow};
pub use transition::{Party, Transition};
