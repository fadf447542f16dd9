pub mod logging;
pub mod sim;
