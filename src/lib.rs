pub mod amount;
pub mod csv;
pub mod engine;
pub mod fees;
pub mod identity;
pub mod model;
pub mod notify;
pub mod processor;

pub use amount::Amount;
pub use engine::{Command, Engine};
pub use fees::{FeeBreakdown, FeeSchedule};
pub use model::{Booking, BookingId, ListingId, RewardId, UserId};
pub use processor::PaymentProcessor;
