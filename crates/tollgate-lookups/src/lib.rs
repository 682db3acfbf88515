pub mod budget;
pub mod fixture;
pub mod registry;

pub use budget::BudgetedLookups;
pub use fixture::FixtureLookup;
pub use registry::LookupRegistry;
