pub mod browser;
pub mod layout;
pub mod operation;
