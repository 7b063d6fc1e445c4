use crate::domain::patient::PatientId;
use crate::domain::payment::{PaymentId, PaymentMethod, PaymentType};
use crate::domain::subscription::{PlanType, SubscriptionId};
use crate::error::{BillingError, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Register,
    Subscribe,
    Renew,
    Cancel,
    Pay,
    Callback,
    Verify,
    Override,
    Sweep,
}

/// One row of a billing script.
///
/// Only `command` is always required; which other columns matter depends on
/// the command.
#[derive(Debug, Deserialize, PartialEq, Clone)]
pub struct Command {
    pub command: CommandKind,
    #[serde(default)]
    pub patient: Option<PatientId>,
    #[serde(default)]
    pub subscription: Option<SubscriptionId>,
    #[serde(default)]
    pub payment: Option<PaymentId>,
    #[serde(default)]
    pub plan: Option<PlanType>,
    #[serde(default)]
    pub r#type: Option<PaymentType>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub days: Option<u32>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl Command {
    pub fn require<T>(value: Option<T>, column: &str, command: CommandKind) -> Result<T> {
        value.ok_or_else(|| {
            BillingError::ValidationError(format!(
                "Column '{}' is required for {:?}",
                column, command
            ))
        })
    }
}

/// Reads billing commands from a CSV source.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily deserializes one command per row.
    pub fn commands(self) -> impl Iterator<Item = Result<Command>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(BillingError::from))
    }
}
