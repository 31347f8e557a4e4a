pub mod case;
pub mod fulfillment;
pub mod order;
pub mod session;
pub mod tooling;
