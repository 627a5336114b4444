//! Remote command and response types.
//!
//! A coordinator sends a [`RemoteCommand`] through the [`RpcManager`]
//! collaborator and gets back a [`Response`] per target. A
//! [`Response::Exception`] means the target ran the command and it failed;
//! that is never confused with a transport failure, which surfaces as an
//! error from the RPC call itself.

mod command;
mod response;
mod rpc;

pub use command::RemoteCommand;
pub use response::{ExceptionResponse, RemoteException, Response};
pub use rpc::RpcManager;
