//! Data types shared across the update pipeline

pub mod descriptor;

pub use descriptor::ReleaseDescriptor;
