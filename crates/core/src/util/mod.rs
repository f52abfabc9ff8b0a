pub mod byte_buffer;
