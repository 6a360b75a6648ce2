pub mod bitmap;
pub mod block;
pub mod builder;
pub mod element_type;
pub mod page;
pub mod value;
pub mod value_buffer;
pub mod vector;
pub mod wire;
