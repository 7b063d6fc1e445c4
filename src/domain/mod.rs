//! Domain layer: billing records, their state machines, and the ports the
//! application layer talks to.

pub mod money;
pub mod patient;
pub mod payment;
pub mod plan;
pub mod ports;
pub mod subscription;
