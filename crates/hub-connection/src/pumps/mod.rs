//! Background tasks driving one hub socket.

pub(crate) mod read;
pub(crate) mod write;
