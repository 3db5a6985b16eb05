pub mod balance_constraints;
pub mod constraints;
pub mod hash;
pub mod lookups;
pub mod params;
pub mod types;
pub mod value;
