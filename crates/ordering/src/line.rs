use serde::{Deserialize, Serialize};

use eventstore_core::{Applier, DomainResult, Entity, ValidationError};

use crate::order::{LineQuantityChanged, OrderEvent};
use crate::values::{Money, Sku};

/// Order line entity, owned by [`Order`](crate::Order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    line_no: u32,
    sku: Sku,
    quantity: u32,
    unit_price: Money,
}

impl OrderLine {
    pub(crate) fn new(line_no: u32, sku: Sku, quantity: u32, unit_price: Money) -> Self {
        Self {
            line_no,
            sku,
            quantity,
            unit_price,
        }
    }

    pub fn line_no(&self) -> u32 {
        self.line_no
    }

    pub fn sku(&self) -> &Sku {
        &self.sku
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn unit_price(&self) -> &Money {
        &self.unit_price
    }

    pub fn subtotal(&self) -> Money {
        self.unit_price.times(self.quantity)
    }

    /// Ask the order to record a quantity change for this line.
    pub fn change_quantity(&self, quantity: i64, applier: &mut Applier<OrderEvent>) -> DomainResult<()> {
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| ValidationError::for_field("quantity", "must be a positive number"))?;

        if quantity != self.quantity {
            applier.apply(LineQuantityChanged {
                line_no: self.line_no,
                quantity,
            });
        }
        Ok(())
    }
}

impl Entity for OrderLine {
    type Id = u32;
    type Event = OrderEvent;

    fn id(&self) -> &u32 {
        &self.line_no
    }

    fn when(&mut self, event: &OrderEvent) {
        if let OrderEvent::LineQuantityChanged(e) = event
            && e.line_no == self.line_no
        {
            self.quantity = e.quantity;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventstore_core::DomainError;

    fn line() -> OrderLine {
        OrderLine::new(1, Sku::new("A"), 2, Money::new(100, "EUR"))
    }

    #[test]
    fn change_quantity_requests_an_event() {
        let mut applier = Applier::new();
        line().change_quantity(5, &mut applier).unwrap();

        assert_eq!(
            applier.into_events(),
            vec![OrderEvent::from(LineQuantityChanged {
                line_no: 1,
                quantity: 5
            })]
        );
    }

    #[test]
    fn unchanged_quantity_requests_nothing() {
        let mut applier = Applier::new();
        line().change_quantity(2, &mut applier).unwrap();
        assert!(applier.is_empty());
    }

    #[test]
    fn non_positive_quantity_is_a_validation_error() {
        let mut applier = Applier::new();
        let err = line().change_quantity(0, &mut applier).unwrap_err();

        assert!(matches!(err, DomainError::Validation(e) if e.field() == Some("quantity")));
        assert!(line().change_quantity(-3, &mut applier).is_err());
        assert!(applier.is_empty());
    }

    #[test]
    fn when_only_touches_the_addressed_line() {
        let mut line = line();
        line.handle(&OrderEvent::from(LineQuantityChanged {
            line_no: 9,
            quantity: 7,
        }));
        assert_eq!(line.quantity(), 2);

        line.handle(&OrderEvent::from(LineQuantityChanged {
            line_no: 1,
            quantity: 7,
        }));
        assert_eq!(line.quantity(), 7);
        assert_eq!(line.subtotal(), Money::new(700, "EUR"));
    }
}
