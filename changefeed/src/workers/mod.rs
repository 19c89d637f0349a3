pub mod consume;
pub mod policy;
