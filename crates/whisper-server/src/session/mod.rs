pub mod dispatcher;
pub mod handle;
pub mod state;
