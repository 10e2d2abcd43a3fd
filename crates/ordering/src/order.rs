use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use eventstore_core::{
    AggregateId, AggregateRoot, Applier, DomainError, DomainResult, Handlers, PendingChanges,
    ValidationError, apply_to_entity, domain_events, integration_events,
};

use crate::line::OrderLine;
use crate::values::{Address, Discount, Money, Sku};

/// Sales order status lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Cancelled,
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub customer: String,
    pub currency: String,
    pub shipping_address: Address,
    pub placed_at: DateTime<Utc>,
}

/// Event: LineAdded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineAdded {
    pub line_no: u32,
    pub sku: Sku,
    pub quantity: u32,
    pub unit_price: Money,
}

/// Event: LineQuantityChanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineQuantityChanged {
    pub line_no: u32,
    pub quantity: u32,
}

/// Event: LineRemoved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineRemoved {
    pub line_no: u32,
}

/// Event: DiscountApplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscountApplied {
    pub discount: Discount,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub confirmed_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub reason: String,
}

domain_events! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum OrderEvent {
        OrderPlaced,
        LineAdded,
        LineQuantityChanged,
        LineRemoved,
        DiscountApplied,
        OrderConfirmed,
        OrderCancelled,
    }
}

/// Integration event: an order was confirmed and can be fulfilled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSubmitted {
    pub order_id: AggregateId,
    pub customer: String,
    pub total: Money,
}

integration_events! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum OrderIntegrationEvent {
        OrderSubmitted,
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    id: AggregateId,
    customer: String,
    currency: String,
    shipping_address: Option<Address>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    discount: Option<Discount>,
    next_line_no: u32,

    #[serde(skip)]
    changes: PendingChanges<OrderEvent, OrderIntegrationEvent>,
}

impl AggregateRoot for Order {
    const KIND: &'static str = "order";

    type Event = OrderEvent;
    type IntegrationEvent = OrderIntegrationEvent;

    fn with_id(id: AggregateId) -> Self {
        Self {
            id,
            customer: String::new(),
            currency: String::new(),
            shipping_address: None,
            status: OrderStatus::Draft,
            lines: Vec::new(),
            discount: None,
            next_line_no: 1,
            changes: PendingChanges::new(),
        }
    }

    fn id(&self) -> AggregateId {
        self.id
    }

    fn handlers() -> &'static Handlers<Self> {
        static HANDLERS: OnceLock<Handlers<Order>> = OnceLock::new();
        HANDLERS.get_or_init(|| {
            Handlers::new()
                .on(Order::when_placed)
                .on(Order::when_line_added)
                .on(Order::when_line_quantity_changed)
                .on(|order: &mut Order, e: &LineRemoved| {
                    order.lines.retain(|line| line.line_no() != e.line_no);
                })
                .on(|order: &mut Order, e: &DiscountApplied| {
                    order.discount = Some(e.discount.clone());
                })
                .on(|order: &mut Order, _: &OrderConfirmed| {
                    order.status = OrderStatus::Confirmed;
                })
                .on(|order: &mut Order, _: &OrderCancelled| {
                    order.status = OrderStatus::Cancelled;
                })
        })
    }

    fn changes(&self) -> &PendingChanges<OrderEvent, OrderIntegrationEvent> {
        &self.changes
    }

    fn changes_mut(&mut self) -> &mut PendingChanges<OrderEvent, OrderIntegrationEvent> {
        &mut self.changes
    }
}

// Replay handlers.
impl Order {
    fn when_placed(&mut self, e: &OrderPlaced) {
        self.customer = e.customer.clone();
        self.currency = e.currency.clone();
        self.shipping_address = Some(e.shipping_address.clone());
        self.status = OrderStatus::Draft;
    }

    fn when_line_added(&mut self, e: &LineAdded) {
        self.lines.push(OrderLine::new(
            e.line_no,
            e.sku.clone(),
            e.quantity,
            e.unit_price.clone(),
        ));
        self.next_line_no = e.line_no + 1;
    }

    fn when_line_quantity_changed(&mut self, e: &LineQuantityChanged) {
        let line = self.lines.iter_mut().find(|line| line.line_no() == e.line_no);
        apply_to_entity(line, &OrderEvent::LineQuantityChanged(e.clone()));
    }
}

// Business operations.
impl Order {
    /// Open a new draft order.
    ///
    /// A blank customer is a deferred validation failure: the order is
    /// returned but cannot be staged until it is fixed.
    pub fn place(
        id: AggregateId,
        customer: impl Into<String>,
        currency: impl Into<String>,
        shipping_address: Address,
        placed_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let customer = customer.into();
        let mut order = Self::with_id(id);

        if customer.trim().is_empty() {
            order.add_validation_error(
                ValidationError::for_field("customer", "must not be blank"),
                false,
            )?;
        }

        order.handle(OrderPlaced {
            customer,
            currency: currency.into(),
            shipping_address,
            placed_at,
        })?;
        Ok(order)
    }

    /// Add a line. Every violation found is deferred; nothing is recorded
    /// when there is at least one.
    pub fn add_line(&mut self, sku: Sku, quantity: u32, unit_price: Money) -> DomainResult<()> {
        self.ensure_draft()?;

        let mut violations = Vec::new();
        if quantity == 0 {
            violations.push(ValidationError::for_field("quantity", "must be positive"));
        }
        if unit_price.amount_minor() <= 0 {
            violations.push(ValidationError::for_field("unit_price", "must be positive"));
        }
        if unit_price.currency() != self.currency {
            violations.push(ValidationError::for_field(
                "unit_price",
                format!("must be in {}", self.currency),
            ));
        }
        if self.lines.iter().any(|line| line.sku() == &sku) {
            violations.push(ValidationError::for_field(
                "sku",
                format!("{} is already on the order", sku.code()),
            ));
        }

        if !violations.is_empty() {
            for violation in violations {
                self.add_validation_error(violation, false)?;
            }
            return Ok(());
        }

        self.handle(LineAdded {
            line_no: self.next_line_no,
            sku,
            quantity,
            unit_price,
        })
    }

    /// Change the quantity of an existing line through the line entity.
    pub fn change_line_quantity(&mut self, line_no: u32, quantity: i64) -> DomainResult<()> {
        self.ensure_draft()?;

        let line = self
            .lines
            .iter()
            .find(|line| line.line_no() == line_no)
            .ok_or_else(DomainError::not_found)?;

        let mut applier = Applier::new();
        match line.change_quantity(quantity, &mut applier) {
            Ok(()) => self.apply_requested(applier),
            Err(DomainError::Validation(violation)) => self.add_validation_error(violation, false),
            Err(other) => Err(other),
        }
    }

    pub fn remove_line(&mut self, line_no: u32) -> DomainResult<()> {
        self.ensure_draft()?;

        if !self.lines.iter().any(|line| line.line_no() == line_no) {
            return Err(DomainError::not_found());
        }
        self.handle(LineRemoved { line_no })
    }

    pub fn apply_discount(&mut self, discount: Discount) -> DomainResult<()> {
        self.ensure_draft()?;

        let before = self.validation_failures().len();
        if discount.percent() == 0 || discount.percent() > 100 {
            self.add_validation_error(
                ValidationError::for_field("discount", "percent must be between 1 and 100"),
                false,
            )?;
        }
        if discount.eligible().is_empty() {
            self.add_validation_error(
                ValidationError::for_field("discount", "must cover at least one sku"),
                false,
            )?;
        }
        if self.validation_failures().len() > before {
            return Ok(());
        }

        self.handle(DiscountApplied { discount })
    }

    /// Confirm the order and announce it to downstream consumers.
    pub fn confirm(&mut self, confirmed_at: DateTime<Utc>) -> DomainResult<()> {
        if self.status == OrderStatus::Cancelled {
            self.add_validation_error(
                ValidationError::for_field("status", "a cancelled order cannot be confirmed"),
                true,
            )?;
        }
        self.ensure_draft()?;

        if self.lines.is_empty() {
            return self.add_validation_error(
                ValidationError::for_field("lines", "cannot confirm an order without lines"),
                false,
            );
        }

        let total = self.total()?;
        self.handle(OrderConfirmed { confirmed_at })?;
        self.add_integration_event(OrderSubmitted {
            order_id: self.id,
            customer: self.customer.clone(),
            total,
        });
        Ok(())
    }

    pub fn cancel(&mut self, reason: impl Into<String>) -> DomainResult<()> {
        if self.status == OrderStatus::Cancelled {
            return Err(DomainError::conflict("order is already cancelled"));
        }
        self.handle(OrderCancelled {
            reason: reason.into(),
        })
    }

    fn ensure_draft(&self) -> DomainResult<()> {
        if self.status != OrderStatus::Draft {
            return Err(DomainError::invariant(
                "cannot modify an order once it is confirmed or cancelled",
            ));
        }
        Ok(())
    }
}

// Queries.
impl Order {
    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn shipping_address(&self) -> Option<&Address> {
        self.shipping_address.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn line(&self, line_no: u32) -> Option<&OrderLine> {
        self.lines.iter().find(|line| line.line_no() == line_no)
    }

    pub fn discount(&self) -> Option<&Discount> {
        self.discount.as_ref()
    }

    /// Sum of line subtotals, with the discount applied to eligible lines.
    pub fn total(&self) -> DomainResult<Money> {
        self.lines.iter().try_fold(Money::zero(&self.currency), |total, line| {
            let subtotal = match &self.discount {
                Some(discount) if discount.covers(line.sku()) => {
                    line.subtotal().less_percent(discount.percent())
                }
                _ => line.subtotal(),
            };
            total.plus(&subtotal)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstore_core::DomainEvent;
    use proptest::prelude::*;

    fn address() -> Address {
        Address::new("1 Main St", "Springfield", "12345", "US")
    }

    fn draft() -> Order {
        Order::place(AggregateId::new(), "ada", "USD", address(), Utc::now()).unwrap()
    }

    fn usd(amount: i64) -> Money {
        Money::new(amount, "USD")
    }

    fn replay(order: &Order) -> Order {
        let mut replayed = Order::with_id(order.id());
        for event in order.domain_events().to_vec() {
            replayed.handle(event).unwrap();
        }
        replayed
    }

    fn state(order: &Order) -> serde_json::Value {
        serde_json::to_value(order).unwrap()
    }

    #[test]
    fn place_records_order_placed() {
        let order = draft();

        assert_eq!(order.customer(), "ada");
        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.domain_events().len(), 1);
        assert_eq!(order.domain_events()[0].kind(), "OrderPlaced");
        assert!(order.is_valid());
    }

    #[test]
    fn blank_customer_is_deferred() {
        let order = Order::place(AggregateId::new(), "  ", "USD", address(), Utc::now()).unwrap();

        assert!(!order.is_valid());
        assert_eq!(order.validation_failures()[0].field(), Some("customer"));
        assert_eq!(order.domain_events().len(), 1);
    }

    #[test]
    fn add_line_collects_every_violation_and_records_nothing() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 0, Money::new(-5, "EUR")).unwrap();

        let fields: Vec<_> = order
            .validation_failures()
            .iter()
            .map(|v| v.field().unwrap_or_default().to_string())
            .collect();
        assert_eq!(fields, vec!["quantity", "unit_price", "unit_price"]);
        assert!(order.lines().is_empty());
        assert_eq!(order.domain_events().len(), 1);
    }

    #[test]
    fn duplicate_sku_is_rejected() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 1, usd(100)).unwrap();
        order.add_line(Sku::new("A"), 2, usd(100)).unwrap();

        assert_eq!(order.lines().len(), 1);
        assert_eq!(order.validation_failures().len(), 1);
    }

    #[test]
    fn quantity_change_flows_through_the_line_entity() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 1, usd(100)).unwrap();
        order.change_line_quantity(1, 4).unwrap();

        assert_eq!(order.line(1).unwrap().quantity(), 4);
        assert_eq!(
            order.domain_events().last().unwrap(),
            &OrderEvent::from(LineQuantityChanged {
                line_no: 1,
                quantity: 4
            })
        );
    }

    #[test]
    fn invalid_quantity_change_is_deferred() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 1, usd(100)).unwrap();
        order.change_line_quantity(1, -1).unwrap();

        assert_eq!(order.line(1).unwrap().quantity(), 1);
        assert_eq!(order.validation_failures().len(), 1);
        assert_eq!(
            order.change_line_quantity(9, 1).unwrap_err(),
            DomainError::NotFound
        );
    }

    #[test]
    fn confirm_publishes_submitted_with_discounted_total() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 2, usd(100)).unwrap();
        order.add_line(Sku::new("B"), 1, usd(50)).unwrap();
        order
            .apply_discount(Discount::new("TEN", 10, vec![Sku::new("A")]))
            .unwrap();
        order.confirm(Utc::now()).unwrap();

        assert_eq!(order.status(), OrderStatus::Confirmed);
        assert_eq!(
            order.integration_events(),
            &[OrderIntegrationEvent::from(OrderSubmitted {
                order_id: order.id(),
                customer: "ada".into(),
                total: usd(230),
            })]
        );
    }

    #[test]
    fn confirming_a_discounted_large_order_does_not_overflow() {
        let mut order = draft();
        order
            .add_line(Sku::new("A"), 1, usd(i64::MAX / 10))
            .unwrap();
        order
            .apply_discount(Discount::new("TEN", 10, vec![Sku::new("A")]))
            .unwrap();
        assert!(order.is_valid());

        order.confirm(Utc::now()).unwrap();
        assert_eq!(order.total().unwrap(), usd(i64::MAX / 10).less_percent(10));
        assert_eq!(order.status(), OrderStatus::Confirmed);
    }

    #[test]
    fn confirm_without_lines_is_deferred() {
        let mut order = draft();
        order.confirm(Utc::now()).unwrap();

        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.validation_failures()[0].field(), Some("lines"));
        assert!(order.integration_events().is_empty());
    }

    #[test]
    fn confirming_a_cancelled_order_fails_immediately() {
        let mut order = draft();
        order.cancel("customer request").unwrap();

        let err = order.confirm(Utc::now()).unwrap_err();
        assert!(matches!(err, DomainError::Validation(v) if v.field() == Some("status")));
        assert!(order.is_valid());
    }

    #[test]
    fn confirmed_order_is_frozen() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 1, usd(100)).unwrap();
        order.confirm(Utc::now()).unwrap();

        let err = order.add_line(Sku::new("B"), 1, usd(100)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
        assert!(matches!(order.remove_line(1), Err(DomainError::InvariantViolation(_))));
    }

    #[test]
    fn cancel_twice_is_a_conflict() {
        let mut order = draft();
        order.cancel("first").unwrap();
        assert!(matches!(order.cancel("second"), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn replay_reproduces_a_full_lifecycle() {
        let mut order = draft();
        order.add_line(Sku::new("A"), 2, usd(100)).unwrap();
        order.add_line(Sku::new("B"), 1, usd(50)).unwrap();
        order.change_line_quantity(2, 3).unwrap();
        order.remove_line(1).unwrap();
        order
            .apply_discount(Discount::new("TEN", 10, vec![Sku::new("B")]))
            .unwrap();
        order.confirm(Utc::now()).unwrap();

        let replayed = replay(&order);
        assert_eq!(state(&replayed), state(&order));
        assert_eq!(replayed.total().unwrap(), order.total().unwrap());
    }

    proptest! {
        #[test]
        fn replay_is_deterministic(ops in prop::collection::vec((0u8..4, 1u32..5, 1i64..500), 0..20)) {
            let mut order = draft();
            for (op, a, b) in ops {
                let _ = match op {
                    0 => order.add_line(Sku::new(format!("S{a}")), a, usd(b)),
                    1 => order.change_line_quantity(a, b % 7),
                    2 => order.remove_line(a),
                    _ => order.apply_discount(Discount::new("P", (b % 50) as u8, vec![Sku::new(format!("S{a}"))])),
                };
            }

            let replayed = replay(&order);
            prop_assert_eq!(state(&replayed), state(&order));
            prop_assert_eq!(replayed.domain_events(), order.domain_events());
        }
    }
}
