//! Shared data contracts for dataset stores and the artifacts written beside them.

pub mod means;
pub mod store;

pub use means::{ChannelMeans, ContractError};
pub use store::{RecordDType, RecordShape, StoreDescriptor};
