// Election core, its persistence seams and the async server around it
pub mod config;
pub mod event;
pub mod ledger;
pub mod log;
pub mod node;
pub mod peers;
pub mod persist;
pub mod rpc;
pub mod server;
pub mod state_machine;
pub mod timer;
pub mod transport;
