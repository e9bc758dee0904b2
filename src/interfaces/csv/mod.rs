//! CSV batch interface: payment requests in, settled results out.

pub mod request_reader;
pub mod result_writer;
