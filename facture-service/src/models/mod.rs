//! Models for facture-service.

pub mod counter;
pub mod invoice;
pub mod order;
pub mod party;

pub use counter::SequenceCounter;
pub use invoice::{
    format_reference, Invoice, InvoiceLine, InvoiceSnapshot, InvoiceStatus, InvoiceTotals,
};
pub use order::{
    Address, ClientSnapshot, DeliveryDetails, Order, OrderItem, OrderStatus, PickupPoint,
};
pub use party::{ClientProfile, CompanyProfile};
