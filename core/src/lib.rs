pub mod bus;
pub mod config;
pub mod fault;
pub mod hostadapter;
pub mod initiator;
pub mod scsi;
pub mod tickable;
pub mod types;
