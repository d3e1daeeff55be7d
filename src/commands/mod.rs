pub mod cache_clear;
pub mod recent;
pub mod record;
pub mod retry_failed;
pub mod run;
pub mod search;
pub mod semantic;
pub mod stats;
