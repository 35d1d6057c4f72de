pub mod job_store;
pub mod memory_queue;
pub mod pipeline;
pub mod probe;
pub mod queue;
pub mod storage;
pub mod submission;
pub mod thumbnail;
pub mod tool;
