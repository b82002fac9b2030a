pub mod cohort_csv;
pub mod file;
pub mod stdin;
