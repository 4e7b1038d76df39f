pub mod api_client;
pub mod charts;
pub mod file_check;
pub mod options;
pub mod progress;
pub mod table;
pub mod validation;
