mod client;

pub use client::{
    Credentials, DavClient, DavError, DeleteReply, DeleteRequest, TransportError, lock_condition,
};
