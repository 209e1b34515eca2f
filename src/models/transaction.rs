use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::UnknownVariant;

/// Accepted payment methods. The wire names are part of the public contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    BankTransfer,
    EWallet,
}

impl PaymentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "credit_card",
            PaymentMethod::BankTransfer => "bank_transfer",
            PaymentMethod::EWallet => "e_wallet",
        }
    }

    /// Short code embedded in gateway references.
    pub fn code(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "CR",
            PaymentMethod::BankTransfer => "BT",
            PaymentMethod::EWallet => "EW",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            PaymentMethod::CreditCard => "Credit Card",
            PaymentMethod::BankTransfer => "Bank Transfer",
            PaymentMethod::EWallet => "E-Wallet",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "credit_card" => Ok(PaymentMethod::CreditCard),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            "e_wallet" => Ok(PaymentMethod::EWallet),
            other => Err(UnknownVariant::new("payment method", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Cancelled,
    Refunded,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::Cancelled => "CANCELLED",
            TransactionStatus::Refunded => "REFUNDED",
        }
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        matches!(
            (self, next),
            (TransactionStatus::Pending, TransactionStatus::Completed)
                | (TransactionStatus::Pending, TransactionStatus::Cancelled)
                | (TransactionStatus::Completed, TransactionStatus::Refunded)
        )
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "COMPLETED" => Ok(TransactionStatus::Completed),
            "CANCELLED" => Ok(TransactionStatus::Cancelled),
            "REFUNDED" => Ok(TransactionStatus::Refunded),
            other => Err(UnknownVariant::new("transaction status", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub booking_id: i64,
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub external_id: Option<String>,
    pub status: TransactionStatus,
    pub transaction_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub booking_id: i64,
    pub amount: Decimal,
    pub payment_method: Option<PaymentMethod>,
    pub transaction_date: DateTime<Utc>,
}

/// Fields written when a transaction moves between states.
#[derive(Debug, Clone, Default)]
pub struct TransactionChange {
    pub payment_method: Option<PaymentMethod>,
    pub external_id: Option<String>,
    pub transaction_date: Option<DateTime<Utc>>,
}
