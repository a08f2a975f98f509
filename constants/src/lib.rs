pub mod class;
pub mod container;
pub mod quantization;
pub mod tier;
pub mod validation;
