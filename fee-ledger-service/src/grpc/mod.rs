//! gRPC module for fee-ledger-service.

mod service;

pub use service::FeeLedgerServiceImpl;

/// Generated protobuf code.
pub mod proto {
    tonic::include_proto!("micros.fees.v1");

    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("fees_descriptor");
}
