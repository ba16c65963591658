use serde::{Deserialize, Serialize};

use clipcredit_core::{DomainError, ValueObject};

/// Settlement currency. Only USD is sold today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
}

impl Currency {
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
        }
    }
}

impl core::str::FromStr for Currency {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "USD" | "usd" => Ok(Currency::Usd),
            other => Err(DomainError::validation(format!("unsupported currency: {other}"))),
        }
    }
}

/// An amount of money in the currency's smallest unit (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: Currency,
}

impl ValueObject for Money {}

impl Money {
    pub const fn usd_cents(amount_minor: i64) -> Self {
        Self {
            amount_minor,
            currency: Currency::Usd,
        }
    }

    /// Whole dollars, or `None` when the cent amount does not fit.
    pub fn usd(dollars: i64) -> Option<Self> {
        dollars.checked_mul(100).map(Self::usd_cents)
    }

    /// Decimal rendering used in gateway requests, e.g. `"10.00"`.
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.amount_minor < 0 { "-" } else { "" };
        let abs = self.amount_minor.unsigned_abs();
        format!("{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl core::fmt::Display for Money {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} {}", self.to_decimal_string(), self.currency.code())
    }
}

/// A purchasable bundle of tokens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenPackage {
    pub id: &'static str,
    pub name: &'static str,
    pub price: Money,
    pub tokens: i64,
    pub description: &'static str,
    pub is_popular: bool,
}

impl ValueObject for TokenPackage {}

impl TokenPackage {
    /// Line shown on the provider's checkout page.
    pub fn order_description(&self) -> String {
        format!("Purchase of {} tokens", self.tokens)
    }
}

static PACKAGES: [TokenPackage; 3] = [
    TokenPackage {
        id: "basic",
        name: "Basic Package",
        price: Money::usd_cents(1_000),
        tokens: 160,
        description: "16 tokens per dollar",
        is_popular: false,
    },
    TokenPackage {
        id: "standard",
        name: "Standard Package",
        price: Money::usd_cents(2_500),
        tokens: 425,
        description: "17 tokens per dollar (6.25% bonus)",
        is_popular: true,
    },
    TokenPackage {
        id: "premium",
        name: "Premium Package",
        price: Money::usd_cents(5_000),
        tokens: 900,
        description: "18 tokens per dollar (12.5% bonus)",
        is_popular: false,
    },
];

/// Look up a package in the static catalog.
pub fn find_package(package_id: &str) -> Option<&'static TokenPackage> {
    PACKAGES.iter().find(|p| p.id == package_id)
}

pub fn list_packages() -> &'static [TokenPackage] {
    &PACKAGES
}
