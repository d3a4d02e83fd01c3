pub mod discovery;
pub mod listmodels;
pub mod usage;
