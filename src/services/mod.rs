pub mod booking;
pub mod cancellation;
pub mod events;
pub mod notifier;
pub mod payment;

pub use booking::BookingService;
pub use cancellation::{CancellationReport, CancellationService};
pub use events::EventService;
pub use notifier::{LogNotifier, Notifier, NotifyError};
pub use payment::PaymentService;
