//! Wire-level types shared by the server and client

pub mod packet;

pub use packet::{find_nul, PacketCodec, RemainderPolicy, DELIMITER};
