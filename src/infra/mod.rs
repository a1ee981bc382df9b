pub mod outbox_delivery;

pub use outbox_delivery::OutboxDelivery;
