//! Network management logic: NAME identity handling, address claiming, and
//! the control-function registry.
pub mod address_claim;
pub mod name;
pub mod registry;
