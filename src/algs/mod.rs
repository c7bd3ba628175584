//! Communication algorithms: the process-group abstraction, wire records and
//! the variable-size collectives.

pub mod collective;
pub mod communicator;
pub mod wire;

pub use collective::{AllToAllv, Outbox, all_to_allv, all_to_allv_ranked, one_to_allv};
pub use communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
