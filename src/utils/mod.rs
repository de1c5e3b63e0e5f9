pub mod buffer;
pub mod checksum;
