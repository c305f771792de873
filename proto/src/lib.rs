//! Generated wire types for the `input.Input` service.

pub mod input {
    tonic::include_proto!("input");
}

pub use prost_types::Duration;
