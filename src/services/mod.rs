pub mod provisioner;
pub mod store_service;
