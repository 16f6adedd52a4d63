pub mod status;

pub use status::{
    CartStatus, FulfillmentStatus, InvalidTransition, OrderStatus, PaymentRecordStatus,
    PaymentStatus,
};
