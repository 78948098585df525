//! Container and record readers shared by the format readers.

pub(crate) mod biff12;
pub(crate) mod biff8;
pub(crate) mod bytes;
pub(crate) mod cfb;
pub(crate) mod reader;
pub(crate) mod xml;
pub(crate) mod zip;
