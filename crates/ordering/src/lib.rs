//! Ordering bounded context.
//!
//! A small sales-order model used to exercise the event-sourced building
//! blocks end to end: the [`Order`] aggregate owns [`OrderLine`] entities and
//! is described with value objects ([`Money`], [`Sku`], [`Address`],
//! [`Discount`]).

pub mod line;
pub mod order;
pub mod values;

pub use line::OrderLine;
pub use order::{
    DiscountApplied, LineAdded, LineQuantityChanged, LineRemoved, Order, OrderCancelled,
    OrderConfirmed, OrderEvent, OrderIntegrationEvent, OrderPlaced, OrderStatus, OrderSubmitted,
};
pub use values::{Address, Discount, Money, Sku};
