pub mod ack;
pub mod api;
pub mod bus;
pub mod history;
mod impls;
pub mod newtypes;
pub mod presence;
pub mod read_receipts;
pub mod send;
pub mod session;
pub mod transport;
pub mod typing;
pub mod unread;
