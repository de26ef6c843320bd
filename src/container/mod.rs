//! Packed model container
//!
//! A container is a little-endian file: a fixed preamble (magic, version,
//! metadata length), a metadata section holding key-value pairs and tensor
//! descriptors, then the tensor data. The data base is the end of the
//! metadata rounded *down* to [`ALIGNMENT`]; descriptor offsets are relative
//! to it.

mod builder;
mod io;
mod reader;
mod types;

pub use builder::ContainerBuilder;
pub use types::{
    data_base_for, Container, ContainerHeader, MetaValue, TensorDescriptor, ALIGNMENT,
    CONTAINER_MAGIC, CONTAINER_VERSION, MAX_ARRAY_LEN, MAX_DIMS, MAX_METADATA_COUNT,
    MAX_TENSOR_COUNT, PREAMBLE_LEN,
};
