pub mod barcode;
pub mod config;
pub mod frame;
