//! Spreading the model search over workers

pub mod comm;
pub mod partition;
pub mod scheduler;

pub use comm::{ChannelCommunicator, Communicator};
#[cfg(feature = "mpi-support")]
pub use comm::MpiCommunicator;
pub use scheduler::{ExecutionMode, Role, SearchStrategy};
