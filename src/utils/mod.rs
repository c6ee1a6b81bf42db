pub mod command;
pub mod fastq;
pub mod file;
pub mod streams;
pub mod system;
pub mod timing;
