#![allow(dead_code)]

use clinic_billing::application::ledger::TransactionLedger;
use clinic_billing::application::lifecycle::SubscriptionLifecycle;
use clinic_billing::application::orchestrator::BillingOrchestrator;
use clinic_billing::config::GatewayConfig;
use clinic_billing::domain::patient::Patient;
use clinic_billing::domain::ports::SharedPatientDirectory;
use clinic_billing::infrastructure::gateway::HostedCheckoutGateway;
use clinic_billing::infrastructure::in_memory::{
    InMemoryPatientDirectory, InMemoryPaymentStore, InMemorySubscriptionStore,
};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const SCRIPT_HEADER: [&str; 12] = [
    "command",
    "patient",
    "subscription",
    "payment",
    "plan",
    "type",
    "method",
    "amount",
    "currency",
    "days",
    "status",
    "note",
];

/// Orchestrator over in-memory stores with patients 1 and 2 registered.
pub async fn orchestrator(config: GatewayConfig) -> Arc<BillingOrchestrator> {
    let patients = InMemoryPatientDirectory::new();
    let mut awa = Patient::new(1, "Awa", "Diallo");
    awa.email = Some("awa@example.com".to_string());
    patients.register(awa).await;
    patients.register(Patient::new(2, "Kofi", "Mensah")).await;
    let patients: SharedPatientDirectory = Arc::new(patients);

    Arc::new(BillingOrchestrator::new(
        Arc::new(TransactionLedger::new(
            Box::new(InMemoryPaymentStore::new()),
            patients.clone(),
        )),
        Arc::new(SubscriptionLifecycle::new(
            Box::new(InMemorySubscriptionStore::new()),
            patients.clone(),
        )),
        Box::new(HostedCheckoutGateway::new(config).unwrap()),
        patients,
    ))
}

/// Writes a billing script; each row is given as (command, [(column, value)]).
pub fn write_script(path: &Path, rows: &[(&str, &[(&str, &str)])]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(SCRIPT_HEADER)?;

    for (command, fields) in rows {
        let record: Vec<&str> = SCRIPT_HEADER
            .iter()
            .map(|column| {
                if *column == "command" {
                    return *command;
                }
                fields
                    .iter()
                    .find(|(name, _)| name == column)
                    .map(|(_, value)| *value)
                    .unwrap_or("")
            })
            .collect();
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
