pub mod audit;
pub mod cohort;
