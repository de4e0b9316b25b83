//! Response handling module - image payload encoding

pub mod base64;
