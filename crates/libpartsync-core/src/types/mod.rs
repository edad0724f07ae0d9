pub mod binding;
pub mod change;
pub mod endpoint;
pub mod ids;
pub mod job;
pub mod status;
