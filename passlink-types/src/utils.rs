pub(crate) mod bytes;
#[macro_use]
pub(crate) mod repr_enum;
pub(crate) mod serde;
#[cfg(test)]
pub(crate) mod rand;

pub mod crypto;
pub mod encoding;
