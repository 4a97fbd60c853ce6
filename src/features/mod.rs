pub mod capture;
pub mod classifier;
pub mod deep_link;
pub mod presenter;
pub mod qr_scan;
pub mod screens;
pub mod selection;
pub mod test_type;
pub mod workflow;
