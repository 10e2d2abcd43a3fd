//! Value objects of the ordering context.

use serde::{Deserialize, Serialize};

use eventstore_core::{DomainError, DomainResult, value_object};

/// Amount in the smallest currency unit (e.g. cents) plus ISO currency code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Money {
    amount_minor: i64,
    currency: String,
}

value_object!(Money { value amount_minor, value currency });

impl Money {
    pub fn new(amount_minor: i64, currency: impl Into<String>) -> Self {
        Self {
            amount_minor,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Self::new(0, currency)
    }

    pub fn amount_minor(&self) -> i64 {
        self.amount_minor
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn times(&self, factor: u32) -> Self {
        Self::new(
            self.amount_minor.saturating_mul(i64::from(factor)),
            self.currency.clone(),
        )
    }

    /// Whole-percent reduction, rounded toward zero.
    pub fn less_percent(&self, percent: u8) -> Self {
        let kept = i128::from(100 - percent.min(100));
        let reduced = i128::from(self.amount_minor) * kept / 100;
        // |reduced| <= |amount_minor|, so the narrowing is lossless.
        Self::new(reduced as i64, self.currency.clone())
    }

    pub fn plus(&self, other: &Money) -> DomainResult<Self> {
        if self.currency != other.currency {
            return Err(DomainError::invariant(format!(
                "cannot add {} to {}",
                other.currency, self.currency
            )));
        }
        Ok(Self::new(
            self.amount_minor.saturating_add(other.amount_minor),
            self.currency.clone(),
        ))
    }
}

/// Stock keeping unit code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sku {
    code: String,
}

value_object!(Sku { value code });

impl Sku {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Address {
    street: String,
    city: String,
    postal_code: String,
    country: String,
}

value_object!(Address {
    value street,
    value city,
    value postal_code,
    value country,
});

impl Address {
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        postal_code: impl Into<String>,
        country: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            postal_code: postal_code.into(),
            country: country.into(),
        }
    }

    pub fn city(&self) -> &str {
        &self.city
    }

    pub fn country(&self) -> &str {
        &self.country
    }
}

/// Percentage discount restricted to an ordered list of eligible SKUs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discount {
    code: String,
    percent: u8,
    eligible: Vec<Sku>,
}

value_object!(Discount {
    value code,
    value percent,
    sequence eligible,
});

impl Discount {
    pub fn new(code: impl Into<String>, percent: u8, eligible: Vec<Sku>) -> Self {
        Self {
            code: code.into(),
            percent,
            eligible,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    pub fn eligible(&self) -> &[Sku] {
        &self.eligible
    }

    pub fn covers(&self, sku: &Sku) -> bool {
        self.eligible.contains(sku)
    }
}
